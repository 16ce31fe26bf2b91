//! DSP Library
//!
//! Partitioned FFT convolution and the dry/wet stage around it.

pub mod convolution;
pub mod convolver;
pub mod fft;
pub mod mixer;
pub mod partition;

pub use convolution::{ConvolutionEngine, EngineOptions};
pub use convolver::{ChannelConvolver, LatencyMode};
pub use fft::Fft;
pub use mixer::{DryWetMixer, MixerOptions, MixingRule, WetProportion};
pub use partition::ConvolutionKernel;
