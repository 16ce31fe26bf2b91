//! Frequency-domain partitions of an impulse response

use rustfft::num_complex::Complex;

use super::fft::{copy_and_pad, Fft};
use crate::error::{try_zeroed, ConvolverError, Result};

/// Impulse response split into `partition_size` slices, each transformed
/// with a `2 * partition_size` point FFT
#[derive(Debug, Clone)]
pub struct ConvolutionKernel {
    partition_size: usize,
    ir_len: usize,
    /// [ir_channel][segment][bin]
    segments: Vec<Vec<Vec<Complex<f32>>>>,
}

impl ConvolutionKernel {
    /// Partition and transform `channels`
    ///
    /// All channels must have the same, non-zero length. `fft` must be planned
    /// for `2 * partition_size` points.
    pub fn build(channels: &[Vec<f32>], partition_size: usize, fft: &mut Fft) -> Result<Self> {
        let ir_len = channels.first().map(|ch| ch.len()).unwrap_or(0);
        if ir_len == 0 || partition_size == 0 {
            return Err(ConvolverError::InvalidParameter {
                param: "impulse response".to_string(),
                value: format!("{} samples, partition {}", ir_len, partition_size),
                expected: "non-empty response and partition".to_string(),
            });
        }
        debug_assert_eq!(fft.size(), 2 * partition_size);

        let seg_count = ir_len.div_ceil(partition_size);
        let bins = fft.complex_len();
        let mut fft_buffer: Vec<f32> = try_zeroed(2 * partition_size, "kernel fft buffer")?;

        let mut segments = Vec::with_capacity(channels.len());
        for channel in channels {
            let mut channel_segments = Vec::with_capacity(seg_count);
            for i in 0..seg_count {
                let mut segment: Vec<Complex<f32>> = try_zeroed(bins, "kernel segment")?;
                let start = i * partition_size;
                let size_copy = partition_size.min(channel.len().saturating_sub(start));
                if size_copy > 0 {
                    copy_and_pad(&mut fft_buffer, &channel[start..], size_copy);
                    fft.forward(&mut fft_buffer, &mut segment)
                        .map_err(|e| ConvolverError::InvalidParameter {
                            param: "kernel fft".to_string(),
                            value: e.to_string(),
                            expected: format!("{} point transform", fft.size()),
                        })?;
                }
                channel_segments.push(segment);
            }
            segments.push(channel_segments);
        }

        Ok(Self {
            partition_size,
            ir_len,
            segments,
        })
    }

    pub fn partition_size(&self) -> usize {
        self.partition_size
    }

    /// Response length in samples at the processing rate
    pub fn ir_len(&self) -> usize {
        self.ir_len
    }

    pub fn num_channels(&self) -> usize {
        self.segments.len()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.first().map(|ch| ch.len()).unwrap_or(0)
    }

    /// Spectra of one response channel, earliest partition first
    pub fn channel(&self, index: usize) -> &[Vec<Complex<f32>>] {
        &self.segments[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_count_rounds_up() {
        let mut fft = Fft::new(8);
        let kernel = ConvolutionKernel::build(&[vec![0.5; 9]], 4, &mut fft).unwrap();
        assert_eq!(kernel.segment_count(), 3);
        assert_eq!(kernel.ir_len(), 9);
        assert_eq!(kernel.channel(0)[0].len(), 5);
    }

    #[test]
    fn test_dc_bin_holds_partition_sum() {
        let mut fft = Fft::new(8);
        let kernel =
            ConvolutionKernel::build(&[vec![1.0, 2.0, 3.0, 4.0, 5.0]], 4, &mut fft).unwrap();
        assert!((kernel.channel(0)[0][0].re - 10.0).abs() < 1e-5);
        assert!((kernel.channel(0)[1][0].re - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_rejects_empty_response() {
        let mut fft = Fft::new(8);
        assert!(ConvolutionKernel::build(&[vec![]], 4, &mut fft).is_err());
        assert!(ConvolutionKernel::build(&[], 4, &mut fft).is_err());
    }
}
