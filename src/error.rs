//! Error handling for Convolver
//!
//! Load errors are reported to the control path, process errors come back
//! from the real-time path and never allocate.

use thiserror::Error;

/// Result type alias for Convolver operations
pub type Result<T> = std::result::Result<T, ConvolverError>;

/// Errors raised while loading an impulse response
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Unsupported impulse response format: {reason}")]
    UnsupportedFormat {
        reason: String,
        #[source]
        source: Option<hound::Error>,
    },

    #[error("Impulse response contains no samples")]
    Empty,

    #[error("Out of memory: {details}")]
    OutOfMemory { details: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Misuse of the real-time processing API
///
/// The block passed to the failing call is left untouched.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    #[error("process called before prepare")]
    NotPrepared,

    #[error(
        "block shape {channels}x{block_size} does not fit prepared \
         {expected_channels}x{expected_block_size}"
    )]
    ConfigMismatch {
        expected_channels: usize,
        expected_block_size: usize,
        channels: usize,
        block_size: usize,
    },

    #[error("recombine called without a matching dry capture")]
    DrySnapshotMissing,
}

/// Main error type for Convolver operations
#[derive(Error, Debug)]
pub enum ConvolverError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Invalid processing configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Invalid parameter '{param}': got {value}, expected {expected}")]
    InvalidParameter {
        param: String,
        value: String,
        expected: String,
    },

    #[error("Out of memory: {details}")]
    OutOfMemory { details: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConvolverError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            ConvolverError::Load(LoadError::UnsupportedFormat { .. }) => "UNSUPPORTED_FORMAT",
            ConvolverError::Load(LoadError::Empty) => "EMPTY_AUDIO",
            ConvolverError::Load(LoadError::OutOfMemory { .. }) => "OUT_OF_MEMORY",
            ConvolverError::Load(LoadError::Io(_)) => "IO_ERROR",
            ConvolverError::Process(ProcessError::NotPrepared) => "NOT_PREPARED",
            ConvolverError::Process(ProcessError::ConfigMismatch { .. }) => "CONFIG_MISMATCH",
            ConvolverError::Process(ProcessError::DrySnapshotMissing) => "DRY_SNAPSHOT_MISSING",
            ConvolverError::InvalidConfig { .. } => "INVALID_CONFIG",
            ConvolverError::InvalidParameter { .. } => "INVALID_PARAMETER",
            ConvolverError::OutOfMemory { .. } => "OUT_OF_MEMORY",
            ConvolverError::Io(_) => "IO_ERROR",
            ConvolverError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error is recoverable
    ///
    /// Process errors are programming errors and are not recoverable
    /// mid-stream; everything on the control path can be retried.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ConvolverError::Process(_))
    }
}

/// Allocate a zeroed vector, reporting allocation failure instead of aborting
pub(crate) fn try_zeroed<T: Clone + Default>(len: usize, what: &str) -> Result<Vec<T>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|e| ConvolverError::OutOfMemory {
            details: format!("{} ({} elements): {}", what, len, e),
        })?;
    buffer.resize(len, T::default());
    Ok(buffer)
}

impl From<ConvolverError> for LoadError {
    fn from(err: ConvolverError) -> Self {
        match err {
            ConvolverError::Load(inner) => inner,
            ConvolverError::Io(io) => LoadError::Io(io),
            ConvolverError::OutOfMemory { details } => LoadError::OutOfMemory { details },
            other => LoadError::UnsupportedFormat {
                reason: other.to_string(),
                source: None,
            },
        }
    }
}
