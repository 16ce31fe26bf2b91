//! Impulse response data

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::{resample_linear, AudioBuffer};
use crate::error::{LoadError, Result};

/// Target level of energy normalisation (linear, relative to unit energy)
const NORMALISE_TARGET: f32 = 0.125;

/// Shared, immutable impulse response
pub type ImpulseResponseHandle = Arc<ImpulseResponse>;

/// How a loaded impulse response is turned into a kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrOptions {
    /// Scale the response so its loudest channel has a fixed energy
    pub normalise: bool,
    /// Use every channel of the response; when false only channel 0 is used
    pub per_channel: bool,
}

impl Default for IrOptions {
    fn default() -> Self {
        Self {
            normalise: false,
            per_channel: true,
        }
    }
}

/// Multichannel impulse response at its native sample rate
///
/// Never mutated once built. Replacing the active response swaps the handle.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    channels: Vec<Vec<f32>>,
    sample_rate: f64,
    identity: bool,
}

impl ImpulseResponse {
    /// Build a response from planar samples
    ///
    /// # Errors
    /// * `Empty` - no channels or no frames
    /// * `UnsupportedFormat` - ragged channels, non-finite samples or a bad rate
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: f64) -> std::result::Result<Self, LoadError> {
        let frames = match channels.first() {
            Some(first) => first.len(),
            None => return Err(LoadError::Empty),
        };
        if frames == 0 {
            return Err(LoadError::Empty);
        }
        if channels.iter().any(|ch| ch.len() != frames) {
            return Err(LoadError::UnsupportedFormat {
                reason: "channels have different lengths".to_string(),
                source: None,
            });
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(LoadError::UnsupportedFormat {
                reason: format!("invalid sample rate {}", sample_rate),
                source: None,
            });
        }
        if channels.iter().flatten().any(|s| !s.is_finite()) {
            return Err(LoadError::UnsupportedFormat {
                reason: "response contains NaN or infinite samples".to_string(),
                source: None,
            });
        }

        Ok(Self {
            channels,
            sample_rate,
            identity: false,
        })
    }

    /// Build a response from a decoded audio buffer
    pub fn from_buffer(buffer: AudioBuffer) -> std::result::Result<Self, LoadError> {
        let sample_rate = buffer.sample_rate as f64;
        Self::new(buffer.samples, sample_rate)
    }

    /// The pass-through response used when nothing is loaded
    pub fn identity() -> Self {
        Self {
            channels: vec![vec![1.0]],
            sample_rate: 0.0,
            identity: true,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of frames at the native sample rate
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Native sample rate in Hz (0 for the identity response)
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn duration_secs(&self) -> f64 {
        if self.identity {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate
    }

    /// Channels ready to be partitioned at `sample_rate`
    ///
    /// Applies channel selection, linear resampling when the native rate
    /// differs, and normalisation. The identity response is returned as is.
    ///
    /// # Errors
    /// * `OutOfMemory` - the resampled response does not fit in memory
    pub fn render(&self, sample_rate: f64, options: &IrOptions) -> Result<Vec<Vec<f32>>> {
        if self.identity {
            return Ok(self.channels.clone());
        }

        let used = if options.per_channel {
            self.channels.len()
        } else {
            1
        };

        let mut rendered: Vec<Vec<f32>> = self.channels[..used]
            .iter()
            .map(|ch| resample_linear(ch, self.sample_rate, sample_rate))
            .collect::<Result<_>>()?;

        if options.normalise {
            normalise(&mut rendered);
        }

        Ok(rendered)
    }
}

/// Scale all channels so the most energetic one has energy `NORMALISE_TARGET^2`
fn normalise(channels: &mut [Vec<f32>]) {
    let max_energy = channels
        .iter()
        .map(|ch| ch.iter().map(|&s| s * s).sum::<f32>())
        .fold(0.0_f32, f32::max);

    if max_energy <= f32::EPSILON {
        return;
    }

    let factor = NORMALISE_TARGET / max_energy.sqrt();
    for sample in channels.iter_mut().flatten() {
        *sample *= factor;
    }
}
