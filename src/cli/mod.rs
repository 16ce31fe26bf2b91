//! CLI Module
//!
//! Command-line host for the convolver: renders WAV files through the
//! processor block by block.

pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Convolver - convolution reverb renderer
#[derive(Parser, Debug)]
#[command(name = "convolver-cli")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convolve a WAV file with an impulse response
    #[command(name = "render")]
    Render(RenderArgs),

    /// Print details of an impulse response file
    #[command(name = "info")]
    Info {
        /// Impulse response WAV file
        ir: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RenderArgs {
    /// Input WAV file
    pub input: PathBuf,

    /// Impulse response WAV file (pass-through when omitted)
    #[arg(long)]
    pub ir: Option<PathBuf>,

    /// Output WAV file
    #[arg(short, long)]
    pub output: PathBuf,

    /// Wet proportion, 0 (dry) to 1 (wet)
    #[arg(long, default_value_t = 1.0)]
    pub mix: f32,

    /// Samples per processing block
    #[arg(long, default_value_t = 512)]
    pub block_size: usize,

    /// Run with a fixed latency of this many samples (rounded up to a power of two)
    #[arg(long)]
    pub latency: Option<usize>,

    /// Mixing rule (linear, balanced, sin3db, sin4p5db, sin6db, square_root3db, square_root4p5db)
    #[arg(long)]
    pub rule: Option<String>,

    /// Normalise the impulse response energy
    #[arg(long)]
    pub normalise: bool,

    /// Use only the first channel of the impulse response
    #[arg(long)]
    pub mono_ir: bool,

    /// Stop at the end of the input instead of rendering the reverb tail
    #[arg(long)]
    pub no_tail: bool,

    /// Output bit depth: 16, 24 or 32 (float)
    #[arg(long, default_value_t = 32)]
    pub bit_depth: u16,

    /// JSON file with processor options; flags override it
    #[arg(long)]
    pub config: Option<PathBuf>,
}
