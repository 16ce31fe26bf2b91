//! Convolver CLI - Convolution Reverb Renderer
//!
//! Command-line interface for the convolver processing core.

use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::info;

use convolver::cli::commands;
use convolver::cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    info!("Convolver v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Render(args) => {
            let summary = commands::render(&args)?;
            println!(
                "Rendered {} frames x {} channel(s) @ {} Hz to {}",
                summary.frames,
                summary.channels,
                summary.sample_rate,
                args.output.display()
            );
            if summary.latency > 0 {
                println!("Compensated {} samples of latency", summary.latency);
            }
            println!("Peak: {:+.1} dBFS", summary.peak_db);
            Ok(())
        }
        Commands::Info { ir } => commands::show_info(&ir),
    }
}
