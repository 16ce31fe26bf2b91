//! Real FFT wrapper and spectrum helpers for partitioned convolution

use std::sync::Arc;

use realfft::{ComplexToReal, FftError, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

/// Forward/inverse real FFT pair of one size with preallocated scratch
///
/// `forward` and `inverse` never allocate, so they are safe on the audio
/// thread once the plan exists.
#[derive(Clone)]
pub struct Fft {
    size: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    forward_scratch: Vec<Complex<f32>>,
    inverse_scratch: Vec<Complex<f32>>,
}

impl std::fmt::Debug for Fft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fft").field("size", &self.size).finish()
    }
}

impl Fft {
    /// Plan a real FFT of `size` points
    pub fn new(size: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let forward_scratch = forward.make_scratch_vec();
        let inverse_scratch = inverse.make_scratch_vec();
        Self {
            size,
            forward,
            inverse,
            forward_scratch,
            inverse_scratch,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of complex bins produced for this size
    pub fn complex_len(&self) -> usize {
        complex_size(self.size)
    }

    /// Real-to-complex transform; `input` is used as scratch and clobbered
    pub fn forward(&mut self, input: &mut [f32], output: &mut [Complex<f32>]) -> Result<(), FftError> {
        self.forward
            .process_with_scratch(input, output, &mut self.forward_scratch)
    }

    /// Complex-to-real transform, normalised by the FFT size
    ///
    /// `input` is clobbered. The imaginary parts of the DC and Nyquist bins are
    /// forced to zero first; products of real spectra only carry rounding
    /// noise there.
    pub fn inverse(&mut self, input: &mut [Complex<f32>], output: &mut [f32]) -> Result<(), FftError> {
        if let Some(first) = input.first_mut() {
            first.im = 0.0;
        }
        if self.size % 2 == 0 {
            if let Some(last) = input.last_mut() {
                last.im = 0.0;
            }
        }

        self.inverse
            .process_with_scratch(input, output, &mut self.inverse_scratch)?;

        let norm = 1.0 / self.size as f32;
        output.iter_mut().for_each(|sample| *sample *= norm);
        Ok(())
    }
}

/// Number of complex bins of a real FFT of `size` points
pub fn complex_size(size: usize) -> usize {
    (size / 2) + 1
}

/// Copy `src_size` samples of `src` into `dst` and zero the rest
pub fn copy_and_pad(dst: &mut [f32], src: &[f32], src_size: usize) {
    debug_assert!(dst.len() >= src_size);
    dst[..src_size].copy_from_slice(&src[..src_size]);
    dst[src_size..].fill(0.0);
}

/// `result += a * b`, element-wise
#[inline]
pub fn complex_multiply_accumulate(
    result: &mut [Complex<f32>],
    a: &[Complex<f32>],
    b: &[Complex<f32>],
) {
    debug_assert_eq!(result.len(), a.len());
    debug_assert_eq!(result.len(), b.len());
    for ((r, x), y) in result.iter_mut().zip(a).zip(b) {
        *r += x * y;
    }
}

/// `result = a + b`, element-wise
#[inline]
pub fn sum(result: &mut [f32], a: &[f32], b: &[f32]) {
    debug_assert_eq!(result.len(), a.len());
    debug_assert_eq!(result.len(), b.len());
    for ((r, x), y) in result.iter_mut().zip(a).zip(b) {
        *r = x + y;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_inverse_restores_signal() {
        let mut fft = Fft::new(16);
        let original: Vec<f32> = (0..16).map(|i| (i as f32 * 0.37).sin()).collect();
        let mut input = original.clone();
        let mut spectrum = vec![Complex::new(0.0, 0.0); fft.complex_len()];
        let mut output = vec![0.0; 16];

        fft.forward(&mut input, &mut spectrum).unwrap();
        fft.inverse(&mut spectrum, &mut output).unwrap();

        for (a, b) in original.iter().zip(&output) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_unit_impulse_spectrum_is_flat() {
        let mut fft = Fft::new(8);
        let mut input = vec![0.0; 8];
        input[0] = 1.0;
        let mut spectrum = vec![Complex::new(0.0, 0.0); fft.complex_len()];
        fft.forward(&mut input, &mut spectrum).unwrap();
        for bin in spectrum {
            assert!((bin.re - 1.0).abs() < 1e-7);
            assert!(bin.im.abs() < 1e-7);
        }
    }

    #[test]
    fn test_copy_and_pad() {
        let mut dst = vec![9.0; 6];
        copy_and_pad(&mut dst, &[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(dst, vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_complex_multiply_accumulate() {
        let mut result = vec![Complex::new(1.0, 0.0)];
        complex_multiply_accumulate(
            &mut result,
            &[Complex::new(0.0, 1.0)],
            &[Complex::new(0.0, 1.0)],
        );
        assert_eq!(result[0], Complex::new(0.0, 0.0));
    }

    #[test]
    fn test_sum() {
        let mut result = vec![0.0; 3];
        sum(&mut result, &[1.0, 2.0, 3.0], &[0.5, 0.5, 0.5]);
        assert_eq!(result, vec![1.5, 2.5, 3.5]);
    }
}
