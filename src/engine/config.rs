//! Processing configuration pushed in by the host

use serde::{Deserialize, Serialize};

use crate::engine::AudioBuffer;
use crate::error::{ConvolverError, ProcessError, Result};

/// Sample rate, block size and channel count for one processing session
///
/// The engine and the mixer each keep their own validated copy; a host that
/// changes any of these calls `prepare` again.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Maximum number of samples per channel in one block
    pub block_size: usize,
    /// Number of channels in every block
    pub num_channels: usize,
}

impl ProcessConfig {
    pub fn new(sample_rate: f64, block_size: usize, num_channels: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            num_channels,
        }
    }

    /// Check that the configuration can drive the engine
    pub fn validate(&self) -> Result<()> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(ConvolverError::InvalidConfig {
                reason: format!("sample rate must be positive, got {}", self.sample_rate),
            });
        }
        if self.block_size == 0 {
            return Err(ConvolverError::InvalidConfig {
                reason: "block size must be at least 1".to_string(),
            });
        }
        if self.num_channels == 0 {
            return Err(ConvolverError::InvalidConfig {
                reason: "channel count must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Check a block against this configuration
    ///
    /// Blocks shorter than `block_size` are accepted so a host can deliver a
    /// short final block.
    #[inline]
    pub fn check_block(&self, block: &AudioBuffer) -> std::result::Result<(), ProcessError> {
        if block.num_channels() != self.num_channels || block.len() > self.block_size {
            return Err(ProcessError::ConfigMismatch {
                expected_channels: self.num_channels,
                expected_block_size: self.block_size,
                channels: block.num_channels(),
                block_size: block.len(),
            });
        }
        Ok(())
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self::new(48000.0, 512, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(ProcessConfig::default().validate().is_ok());
        assert!(ProcessConfig::new(0.0, 512, 2).validate().is_err());
        assert!(ProcessConfig::new(f64::NAN, 512, 2).validate().is_err());
        assert!(ProcessConfig::new(48000.0, 0, 2).validate().is_err());
        assert!(ProcessConfig::new(48000.0, 512, 0).validate().is_err());
    }

    #[test]
    fn test_check_block() {
        let config = ProcessConfig::new(48000.0, 256, 2);
        assert!(config.check_block(&AudioBuffer::new(2, 256, 48000)).is_ok());
        assert!(config.check_block(&AudioBuffer::new(2, 100, 48000)).is_ok());
        assert_eq!(
            config.check_block(&AudioBuffer::new(1, 256, 48000)),
            Err(ProcessError::ConfigMismatch {
                expected_channels: 2,
                expected_block_size: 256,
                channels: 1,
                block_size: 256,
            })
        );
        assert!(config.check_block(&AudioBuffer::new(2, 257, 48000)).is_err());
    }
}
