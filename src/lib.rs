//! Convolver - Partitioned Convolution Engine with Dry/Wet Mixing
//!
//! Convolves live audio with a loadable impulse response and blends the
//! result with the unprocessed signal.
//!
//! # Architecture
//!
//! Per audio block, three components run in series:
//! - Impulse response store: owns the active response, builds kernels off the audio thread
//! - Convolution engine: uniformly partitioned FFT convolution, in place
//! - Dry/wet mixer: captures the dry block and recombines it with the wet output
//!
//! [`processor::ConvolverProcessor`] drives all three in that order.

pub mod cli;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod ir;
pub mod processor;

pub use error::{ConvolverError, LoadError, ProcessError, Result};
pub use processor::{ConvolverProcessor, ProcessorOptions, ProcessorState};
