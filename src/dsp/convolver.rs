//! Streaming uniformly-partitioned convolution for one channel
//!
//! Overlap-add over `2 * partition_size` FFTs with a frequency-domain delay
//! line (FDL) of input spectra. The kernel is passed in per call, so the
//! same input history can be convolved with a replacement kernel.

use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use super::fft::{complex_multiply_accumulate, copy_and_pad, sum, Fft};
use crate::error::{try_zeroed, Result};

/// Latency behaviour of the convolution engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LatencyMode {
    /// Output is available in the same call; partial partitions are
    /// transformed on every call
    Zero,
    /// Output is delayed by the partition size (`samples` rounded up to a
    /// power of two); only complete partitions are transformed
    Fixed { samples: usize },
}

impl Default for LatencyMode {
    fn default() -> Self {
        LatencyMode::Zero
    }
}

impl LatencyMode {
    /// Partition size used for a given host block size
    pub fn partition_size(&self, block_size: usize) -> usize {
        match self {
            LatencyMode::Zero => block_size.max(1).next_power_of_two(),
            LatencyMode::Fixed { samples } => (*samples).max(1).next_power_of_two(),
        }
    }

    /// Latency in samples for a given host block size
    pub fn latency(&self, block_size: usize) -> usize {
        match self {
            LatencyMode::Zero => 0,
            LatencyMode::Fixed { .. } => self.partition_size(block_size),
        }
    }
}

/// Per-channel convolution state
#[derive(Debug, Clone)]
pub struct ChannelConvolver {
    mode: LatencyMode,
    partition_size: usize,
    fft: Fft,
    fft_buffer: Vec<f32>,
    /// Ring of input spectra; `current` is the newest
    fdl: Vec<Vec<Complex<f32>>>,
    current: usize,
    pre_multiplied: Vec<Complex<f32>>,
    conv: Vec<Complex<f32>>,
    overlap: Vec<f32>,
    input_buffer: Vec<f32>,
    input_fill: usize,
    /// Completed output of the previous partition (fixed latency only)
    output_buffer: Vec<f32>,
}

impl ChannelConvolver {
    /// Allocate state for a kernel of `segment_count` partitions
    pub fn new(mode: LatencyMode, partition_size: usize, segment_count: usize) -> Result<Self> {
        let fft = Fft::new(2 * partition_size);
        let bins = fft.complex_len();

        let mut fdl = Vec::with_capacity(segment_count);
        for _ in 0..segment_count.max(1) {
            fdl.push(try_zeroed(bins, "input spectrum")?);
        }

        Ok(Self {
            mode,
            partition_size,
            fft_buffer: try_zeroed(2 * partition_size, "fft buffer")?,
            fdl,
            current: 0,
            pre_multiplied: try_zeroed(bins, "pre-multiplied spectrum")?,
            conv: try_zeroed(bins, "convolution spectrum")?,
            overlap: try_zeroed(partition_size, "overlap")?,
            input_buffer: try_zeroed(partition_size, "input buffer")?,
            input_fill: 0,
            output_buffer: try_zeroed(partition_size, "output buffer")?,
            fft,
        })
    }

    pub fn partition_size(&self) -> usize {
        self.partition_size
    }

    /// Convolve `input` with `kernel` into `output`
    ///
    /// `kernel` must have as many segments as this state was built for.
    pub fn process(&mut self, kernel: &[Vec<Complex<f32>>], input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(kernel.len(), self.fdl.len());
        debug_assert_eq!(input.len(), output.len());
        match self.mode {
            LatencyMode::Zero => self.process_immediate(kernel, input, output),
            LatencyMode::Fixed { .. } => self.process_buffered(kernel, input, output),
        }
    }

    fn process_immediate(
        &mut self,
        kernel: &[Vec<Complex<f32>>],
        input: &[f32],
        output: &mut [f32],
    ) {
        let block_size = self.partition_size;
        let seg_count = self.fdl.len();

        let mut processed = 0;
        while processed < output.len() {
            let input_buffer_was_empty = self.input_fill == 0;
            let processing = (output.len() - processed).min(block_size - self.input_fill);

            let input_pos = self.input_fill;
            self.input_buffer[input_pos..input_pos + processing]
                .copy_from_slice(&input[processed..processed + processing]);

            // Forward FFT of the (partial) current partition
            copy_and_pad(&mut self.fft_buffer, &self.input_buffer, block_size);
            if self
                .fft
                .forward(&mut self.fft_buffer, &mut self.fdl[self.current])
                .is_err()
            {
                output.fill(0.0);
                return;
            }

            // Older partitions only change at partition boundaries
            if input_buffer_was_empty {
                self.accumulate_history(kernel);
            }
            self.conv.copy_from_slice(&self.pre_multiplied);
            complex_multiply_accumulate(&mut self.conv, &self.fdl[self.current], &kernel[0]);

            if self.fft.inverse(&mut self.conv, &mut self.fft_buffer).is_err() {
                output.fill(0.0);
                return;
            }

            sum(
                &mut output[processed..processed + processing],
                &self.fft_buffer[input_pos..input_pos + processing],
                &self.overlap[input_pos..input_pos + processing],
            );

            self.input_fill += processing;
            if self.input_fill == block_size {
                self.input_buffer.fill(0.0);
                self.input_fill = 0;
                self.overlap
                    .copy_from_slice(&self.fft_buffer[block_size..block_size * 2]);
                self.current = if self.current > 0 {
                    self.current - 1
                } else {
                    seg_count - 1
                };
            }
            processed += processing;
        }
    }

    fn process_buffered(
        &mut self,
        kernel: &[Vec<Complex<f32>>],
        input: &[f32],
        output: &mut [f32],
    ) {
        let block_size = self.partition_size;
        let seg_count = self.fdl.len();

        let mut processed = 0;
        while processed < output.len() {
            let processing = (output.len() - processed).min(block_size - self.input_fill);
            let input_pos = self.input_fill;

            output[processed..processed + processing]
                .copy_from_slice(&self.output_buffer[input_pos..input_pos + processing]);
            self.input_buffer[input_pos..input_pos + processing]
                .copy_from_slice(&input[processed..processed + processing]);
            self.input_fill += processing;

            if self.input_fill == block_size {
                copy_and_pad(&mut self.fft_buffer, &self.input_buffer, block_size);
                if self
                    .fft
                    .forward(&mut self.fft_buffer, &mut self.fdl[self.current])
                    .is_err()
                {
                    output.fill(0.0);
                    return;
                }

                self.accumulate_history(kernel);
                self.conv.copy_from_slice(&self.pre_multiplied);
                complex_multiply_accumulate(&mut self.conv, &self.fdl[self.current], &kernel[0]);

                if self.fft.inverse(&mut self.conv, &mut self.fft_buffer).is_err() {
                    output.fill(0.0);
                    return;
                }

                sum(
                    &mut self.output_buffer,
                    &self.fft_buffer[..block_size],
                    &self.overlap,
                );
                self.overlap
                    .copy_from_slice(&self.fft_buffer[block_size..block_size * 2]);

                self.input_buffer.fill(0.0);
                self.input_fill = 0;
                self.current = if self.current > 0 {
                    self.current - 1
                } else {
                    seg_count - 1
                };
            }
            processed += processing;
        }
    }

    /// Sum of kernel segments 1.. against the older input spectra
    fn accumulate_history(&mut self, kernel: &[Vec<Complex<f32>>]) {
        let seg_count = self.fdl.len();
        self.pre_multiplied.fill(Complex::new(0.0, 0.0));
        for (i, segment) in kernel.iter().enumerate().skip(1) {
            let index_audio = (self.current + i) % seg_count;
            complex_multiply_accumulate(&mut self.pre_multiplied, segment, &self.fdl[index_audio]);
        }
    }

    /// Take over the stream position of `previous` for use with `kernel`
    ///
    /// Copies the newest input spectra (as many as both delay lines hold), the
    /// partial input partition, the pending overlap and buffered output. Both
    /// states must share the partition size and latency mode.
    pub fn inherit(&mut self, previous: &ChannelConvolver, kernel: &[Vec<Complex<f32>>]) {
        debug_assert_eq!(self.partition_size, previous.partition_size);
        debug_assert_eq!(self.mode, previous.mode);

        let own_len = self.fdl.len();
        let prev_len = previous.fdl.len();
        self.current = 0;
        for (i, spectrum) in self.fdl.iter_mut().enumerate() {
            if i < prev_len {
                spectrum.copy_from_slice(&previous.fdl[(previous.current + i) % prev_len]);
            } else {
                spectrum.fill(Complex::new(0.0, 0.0));
            }
        }
        debug_assert!(own_len > 0);

        self.input_buffer.copy_from_slice(&previous.input_buffer);
        self.input_fill = previous.input_fill;
        self.overlap.copy_from_slice(&previous.overlap);
        self.output_buffer.copy_from_slice(&previous.output_buffer);

        // Mid-partition the cached history sum must reflect the new kernel
        if self.input_fill > 0 && self.mode == LatencyMode::Zero {
            self.accumulate_history(kernel);
        }
    }

    /// Clear all history without reallocating
    pub fn reset(&mut self) {
        for spectrum in &mut self.fdl {
            spectrum.fill(Complex::new(0.0, 0.0));
        }
        self.current = 0;
        self.pre_multiplied.fill(Complex::new(0.0, 0.0));
        self.conv.fill(Complex::new(0.0, 0.0));
        self.overlap.fill(0.0);
        self.input_buffer.fill(0.0);
        self.input_fill = 0;
        self.output_buffer.fill(0.0);
    }
}
