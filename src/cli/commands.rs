//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::Path;

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};

use super::RenderArgs;
use crate::dsp::{LatencyMode, MixingRule};
use crate::engine::{
    calculate_peak, export_audio, import_audio, linear_to_db, AudioBuffer, ExportFormat,
    ProcessConfig,
};
use crate::ir::ImpulseResponseStore;
use crate::processor::{ConvolverProcessor, ProcessorOptions};

/// Outcome of a render, printed by the binary
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSummary {
    pub frames: usize,
    pub channels: usize,
    pub sample_rate: u32,
    pub latency: usize,
    pub tail_length: usize,
    pub peak_db: f32,
}

/// Build processor options from an optional JSON file and CLI overrides.
pub fn resolve_options(args: &RenderArgs) -> Result<ProcessorOptions> {
    let mut options = match &args.config {
        Some(path) => ProcessorOptions::from_json_file(path)
            .with_context(|| format!("Failed to read options from {}", path.display()))?,
        None => ProcessorOptions::default(),
    };

    if args.normalise {
        options.ir.normalise = true;
    }
    if args.mono_ir {
        options.ir.per_channel = false;
    }
    if let Some(samples) = args.latency {
        options.engine.latency = LatencyMode::Fixed { samples };
    }
    if let Some(rule) = &args.rule {
        options.mixer.rule = rule.parse::<MixingRule>()?;
    }
    Ok(options)
}

/// Convolve the input file and write the result.
///
/// Output is latency-compensated and, unless `no_tail` is set, extended by
/// the impulse response length so the tail decays in full.
pub fn render(args: &RenderArgs) -> Result<RenderSummary> {
    if !matches!(args.bit_depth, 16 | 24 | 32) {
        bail!("Unsupported bit depth {} (expected 16, 24 or 32)", args.bit_depth);
    }
    if args.block_size == 0 {
        bail!("Block size must be at least 1");
    }
    if !(0.0..=1.0).contains(&args.mix) {
        warn!("Mix {} outside [0, 1]; clamping", args.mix);
    }

    let options = resolve_options(args)?;
    debug!("Processor options: {:?}", options);
    let mut processor = ConvolverProcessor::new(options);

    if let Some(ir) = &args.ir {
        processor
            .store()
            .load_file(ir)
            .with_context(|| format!("Failed to load impulse response {}", ir.display()))?;
    }

    let input = import_audio(&args.input)
        .with_context(|| format!("Failed to read input {}", args.input.display()))?;
    info!(
        "Input: {} channel(s), {} samples @ {} Hz",
        input.num_channels(),
        input.len(),
        input.sample_rate
    );

    let config = ProcessConfig::new(
        input.sample_rate as f64,
        args.block_size,
        input.num_channels(),
    );
    processor.prepare(config)?;
    processor.wet_proportion().set(args.mix);

    let latency = processor.latency();
    let tail_length = if args.no_tail {
        0
    } else {
        processor.tail_length().saturating_sub(1)
    };
    let frames = input.len() + tail_length;
    let total = frames + latency;

    let mut output = AudioBuffer::new(input.num_channels(), 0, input.sample_rate);
    let mut block = AudioBuffer::new(input.num_channels(), args.block_size, input.sample_rate);
    let mut offset = 0;
    while offset < total {
        let len = args.block_size.min(total - offset);
        if block.len() != len {
            block.resize(len);
        }
        block.copy_from(&input, offset);
        processor.process(&mut block)?;

        // Drop the first `latency` samples so output lines up with input
        let skip = latency.saturating_sub(offset).min(len);
        for (dst, src) in output.samples.iter_mut().zip(&block.samples) {
            dst.extend_from_slice(&src[skip..]);
        }
        offset += len;
    }

    let peak_db = calculate_peak(&output);
    if peak_db > 0.0 {
        warn!("Output peaks at {:+.1} dBFS and will clip in integer formats", peak_db);
    }

    export_audio(&output, &args.output, ExportFormat::new(args.bit_depth))
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    info!("Wrote {}", args.output.display());

    Ok(RenderSummary {
        frames: output.len(),
        channels: output.num_channels(),
        sample_rate: output.sample_rate,
        latency,
        tail_length,
        peak_db,
    })
}

/// Print details of an impulse response file.
pub fn show_info(path: &Path) -> Result<()> {
    let store = ImpulseResponseStore::default();
    let ir = store
        .load_file(path)
        .with_context(|| format!("Failed to load impulse response {}", path.display()))?;

    println!("Impulse response: {}", path.display());
    println!("{:-<60}", "");
    println!("Channels:    {}", ir.num_channels());
    println!("Sample rate: {} Hz", ir.sample_rate());
    println!("Length:      {} samples ({:.3}s)", ir.len(), ir.duration_secs());

    for ch in 0..ir.num_channels() {
        let samples = ir.channel(ch);
        let peak = samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
        let energy: f32 = samples.iter().map(|s| s * s).sum();
        println!(
            "  [{}] peak {:+.1} dBFS, energy {:.4}",
            ch,
            linear_to_db(peak),
            energy
        );
    }

    Ok(())
}
