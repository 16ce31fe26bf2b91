//! Audio Engine Module
//!
//! Host-facing plumbing shared by every component:
//! - Audio buffer (the processing block)
//! - Processing configuration
//! - WAV file I/O

pub mod buffer;
pub mod config;
pub mod io;

pub use buffer::{calculate_peak, linear_to_db, AudioBuffer};
pub use config::ProcessConfig;
pub use io::{
    decode_wav, decode_wav_bytes, encode_wav, export_audio, generate_test_tone, import_audio,
    resample_linear, ExportFormat,
};
