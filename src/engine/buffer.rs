//! Audio Buffer Management
//!
//! Provides the planar audio buffer that carries one processing block
//! between the host and the convolution core, plus level helpers.

use crate::error::{ConvolverError, Result};

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert linear amplitude to decibels
///
/// Returns -f32::INFINITY for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Calculate the peak level of an audio buffer in dB
///
/// Returns -f32::INFINITY for empty buffers.
pub fn calculate_peak(buffer: &AudioBuffer) -> f32 {
    let peak = buffer
        .samples
        .iter()
        .flat_map(|channel| channel.iter())
        .map(|&s| s.abs())
        .fold(0.0_f32, f32::max);

    linear_to_db(peak)
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// Planar audio buffer used as the processing block
///
/// Each channel is a separate `Vec<f32>`. A host hands one of these to the
/// processor per call; the processor mutates it in place and never keeps it.
///
/// # Example
/// ```
/// use convolver::engine::AudioBuffer;
///
/// let block = AudioBuffer::new(2, 512, 48000);
/// assert_eq!(block.num_channels(), 2);
/// assert_eq!(block.len(), 512);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Sample data: outer Vec is channels, inner Vec is samples
    pub samples: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a silent buffer with the given shape
    pub fn new(num_channels: usize, num_samples: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![vec![0.0_f32; num_samples]; num_channels],
            sample_rate,
        }
    }

    /// Create a buffer from per-channel sample vectors
    ///
    /// All channels must have the same length.
    pub fn from_planar(samples: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if let Some(first) = samples.first() {
            let len = first.len();
            if let Some(bad) = samples.iter().position(|ch| ch.len() != len) {
                return Err(ConvolverError::InvalidParameter {
                    param: format!("channel {}", bad),
                    value: format!("{} samples", samples[bad].len()),
                    expected: format!("{} samples", len),
                });
            }
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Convert the buffer to interleaved format
    pub fn to_interleaved(&self) -> Vec<f32> {
        let num_channels = self.num_channels();
        let num_samples = self.len();

        let mut interleaved = Vec::with_capacity(num_channels * num_samples);
        for sample_idx in 0..num_samples {
            for channel in &self.samples {
                interleaved.push(channel[sample_idx]);
            }
        }

        interleaved
    }

    /// Get the number of channels
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of samples per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map(|ch| ch.len()).unwrap_or(0)
    }

    /// Check if the buffer is empty (no samples)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get immutable access to a channel's samples
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// Get mutable access to a channel's samples
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.samples[index]
    }

    /// Change the number of samples per channel, zero-filling new samples
    ///
    /// Does not allocate when shrinking or when growing within capacity.
    pub fn resize(&mut self, num_samples: usize) {
        for channel in &mut self.samples {
            channel.resize(num_samples, 0.0);
        }
    }

    /// Copy `self.len()` frames from `source` starting at `offset`
    ///
    /// Frames past the end of `source` are zero. Channels missing from
    /// `source` are zero.
    pub fn copy_from(&mut self, source: &AudioBuffer, offset: usize) {
        for (ch, dst) in self.samples.iter_mut().enumerate() {
            dst.fill(0.0);
            if let Some(src) = source.samples.get(ch) {
                if offset < src.len() {
                    let n = dst.len().min(src.len() - offset);
                    dst[..n].copy_from_slice(&src[offset..offset + n]);
                }
            }
        }
    }

    /// Check if all samples are finite (not NaN or Infinity)
    pub fn is_finite(&self) -> bool {
        self.samples
            .iter()
            .flat_map(|ch| ch.iter())
            .all(|s| s.is_finite())
    }
}

// ============================================================================
// Tests
// ============================================================================
