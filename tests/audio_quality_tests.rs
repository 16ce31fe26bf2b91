//! Audio Quality Tests
//!
//! Objective measurements of the convolution and mix stages.

use approx::assert_abs_diff_eq;
use test_case::test_case;

use convolver::dsp::{ConvolutionEngine, EngineOptions, MixerOptions, MixingRule};
use convolver::engine::{AudioBuffer, ProcessConfig};
use convolver::ir::IrOptions;
use convolver::{ConvolverProcessor, ProcessorOptions};

const SAMPLE_RATE: u32 = 48000;

fn direct_convolution(input: &[f32], response: &[f32]) -> Vec<f32> {
    let mut output = vec![0.0_f64; input.len() + response.len() - 1];
    for (i, &x) in input.iter().enumerate() {
        for (j, &h) in response.iter().enumerate() {
            output[i + j] += x as f64 * h as f64;
        }
    }
    output.into_iter().map(|s| s as f32).collect()
}

fn decaying_response(len: usize, decay: f32) -> Vec<f32> {
    (0..len)
        .map(|i| decay.powi(i as i32) * if i % 3 == 1 { -0.5 } else { 1.0 })
        .collect()
}

fn test_signal(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 * (i as f32 * 0.043).sin() + 0.2 * (i as f32 * 0.31).cos())
        .collect()
}

/// Run a mono signal through the processor in blocks of `block_size`
fn run_mono(processor: &mut ConvolverProcessor, input: &[f32], block_size: usize) -> Vec<f32> {
    let mut output = Vec::with_capacity(input.len());
    for chunk in input.chunks(block_size) {
        let mut block = AudioBuffer::from_planar(vec![chunk.to_vec()], SAMPLE_RATE).unwrap();
        processor.process(&mut block).unwrap();
        output.extend_from_slice(block.channel(0));
    }
    output
}

fn prepared_processor(response: Option<Vec<f32>>, block_size: usize) -> ConvolverProcessor {
    let mut processor = ConvolverProcessor::default();
    if let Some(response) = response {
        processor
            .store()
            .load_samples(vec![response], SAMPLE_RATE as f64)
            .unwrap();
    }
    processor
        .prepare(ProcessConfig::new(SAMPLE_RATE as f64, block_size, 1))
        .unwrap();
    processor
}

// === Identity Tests ===

#[test_case(64 ; "power of two dividing the length")]
#[test_case(100 ; "dividing the length")]
#[test_case(128 ; "power of two not dividing the length")]
#[test_case(250 ; "large dividing block")]
#[test_case(333 ; "odd block with short final block")]
fn test_identity_reproduces_input(block_size: usize) {
    let input = test_signal(1000);
    let mut processor = prepared_processor(None, block_size);

    let output = run_mono(&mut processor, &input, block_size);
    assert_eq!(output.len(), input.len());
    for (i, (out, inp)) in output.iter().zip(&input).enumerate() {
        assert!((out - inp).abs() < 1e-5, "sample {}: {} vs {}", i, out, inp);
    }
}

#[test]
fn test_identity_ignores_session_rate() {
    let input = test_signal(512);
    let mut processor = ConvolverProcessor::default();
    processor.prepare(ProcessConfig::new(44100.0, 128, 1)).unwrap();
    assert_eq!(processor.tail_length(), 1);

    let output = run_mono(&mut processor, &input, 128);
    for (out, inp) in output.iter().zip(&input) {
        assert_abs_diff_eq!(*out, *inp, epsilon = 1e-5);
    }
}

// === Convolution Accuracy ===

#[test]
fn test_tail_decays_to_exact_silence() {
    let block_size = 64;
    let response: Vec<f32> = (0..300).map(|i| 0.99f32.powi(i)).collect();
    let signal_len = 4 * block_size;
    let mut input = vec![0.5; signal_len];
    input.extend(vec![0.0; 1024]);

    let mut processor = prepared_processor(Some(response.clone()), block_size);
    let output = run_mono(&mut processor, &input, block_size);
    let expected = direct_convolution(&input[..signal_len], &response);

    // Last sample of the full convolution is still audible
    let last = signal_len + response.len() - 2;
    assert!(output[last].abs() > 1e-3);
    for i in 0..=last {
        assert!((output[i] - expected[i]).abs() < 1e-3, "sample {}", i);
    }

    // Once the input leaves the delay line the output is exactly zero
    let settled = signal_len + response.len() + 2 * block_size;
    assert!(output[settled..].iter().all(|&s| s == 0.0));
}

#[test]
fn test_silence_in_silence_out() {
    let mut processor = prepared_processor(Some(decaying_response(500, 0.995)), 128);
    let output = run_mono(&mut processor, &vec![0.0; 2048], 128);
    assert!(output.iter().all(|&s| s == 0.0));
}

#[test]
fn test_linearity() {
    let response = decaying_response(200, 0.98);
    let x1 = test_signal(900);
    let x2: Vec<f32> = (0..900).map(|i| ((i * 13) % 17) as f32 / 17.0 - 0.5).collect();
    let (a, b) = (0.7_f32, -1.3_f32);
    let combined: Vec<f32> = x1.iter().zip(&x2).map(|(p, q)| a * p + b * q).collect();

    let y1 = run_mono(&mut prepared_processor(Some(response.clone()), 96), &x1, 96);
    let y2 = run_mono(&mut prepared_processor(Some(response.clone()), 96), &x2, 96);
    let y = run_mono(&mut prepared_processor(Some(response), 96), &combined, 96);

    for i in 0..y.len() {
        assert_abs_diff_eq!(y[i], a * y1[i] + b * y2[i], epsilon = 1e-3);
    }
}

#[test]
fn test_block_size_invariance() {
    let response = decaying_response(700, 0.99);
    let mut input = test_signal(2048);
    input.extend(vec![0.0; 768]);

    let small = run_mono(&mut prepared_processor(Some(response.clone()), 64), &input, 64);
    let large = run_mono(&mut prepared_processor(Some(response.clone()), 256), &input, 256);
    let expected = direct_convolution(&input, &response);

    for i in 0..input.len() {
        assert!((small[i] - large[i]).abs() < 1e-3, "sample {}", i);
        assert!((small[i] - expected[i]).abs() < 2e-3, "sample {}", i);
        assert!((large[i] - expected[i]).abs() < 2e-3, "sample {}", i);
    }
}

#[test]
fn test_resampled_response() {
    // [1, 0, 0, 0] at 24 kHz becomes [1, 0.5, 0, ...] at 48 kHz
    let mut processor = ConvolverProcessor::default();
    processor
        .store()
        .load_samples(vec![vec![1.0, 0.0, 0.0, 0.0]], 24000.0)
        .unwrap();
    processor
        .prepare(ProcessConfig::new(SAMPLE_RATE as f64, 64, 1))
        .unwrap();
    assert_eq!(processor.tail_length(), 8);

    let input = test_signal(256);
    let output = run_mono(&mut processor, &input, 64);
    for i in 1..input.len() {
        assert_abs_diff_eq!(output[i], input[i] + 0.5 * input[i - 1], epsilon = 1e-5);
    }
}

#[test]
fn test_normalised_response() {
    let options = ProcessorOptions {
        ir: IrOptions {
            normalise: true,
            per_channel: true,
        },
        ..Default::default()
    };
    let mut processor = ConvolverProcessor::new(options);
    processor
        .store()
        .load_samples(vec![vec![4.0]], SAMPLE_RATE as f64)
        .unwrap();
    processor
        .prepare(ProcessConfig::new(SAMPLE_RATE as f64, 32, 1))
        .unwrap();

    let input = test_signal(128);
    let output = run_mono(&mut processor, &input, 32);
    for (out, inp) in output.iter().zip(&input) {
        assert_abs_diff_eq!(*out, 0.125 * inp, epsilon = 1e-6);
    }
}

#[test]
fn test_stereo_response_with_mono_option() {
    let options = ProcessorOptions {
        ir: IrOptions {
            normalise: false,
            per_channel: false,
        },
        ..Default::default()
    };
    let mut processor = ConvolverProcessor::new(options);
    processor
        .store()
        .load_samples(vec![vec![0.5, 0.0], vec![0.0, 2.0]], SAMPLE_RATE as f64)
        .unwrap();
    processor
        .prepare(ProcessConfig::new(SAMPLE_RATE as f64, 4, 2))
        .unwrap();

    let mut block =
        AudioBuffer::from_planar(vec![vec![1.0, 0.0, 0.0, 0.0]; 2], SAMPLE_RATE).unwrap();
    processor.process(&mut block).unwrap();
    for ch in 0..2 {
        assert_abs_diff_eq!(block.channel(ch)[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(block.channel(ch)[1], 0.0, epsilon = 1e-6);
    }
}

// === Dry/Wet Tests ===

#[test]
fn test_fully_dry_is_bit_exact() {
    let input = test_signal(1024);
    let mut processor = prepared_processor(Some(decaying_response(300, 0.99)), 128);
    processor.wet_proportion().set(0.0);

    let output = run_mono(&mut processor, &input, 128);
    assert_eq!(output, input);
}

#[test]
fn test_fully_wet_matches_engine() {
    let response = decaying_response(300, 0.99);
    let input = test_signal(1024);
    let mut processor = prepared_processor(Some(response.clone()), 128);
    processor.wet_proportion().set(1.0);
    let output = run_mono(&mut processor, &input, 128);

    let store = convolver::ir::ImpulseResponseStore::default();
    store.load_samples(vec![response], SAMPLE_RATE as f64).unwrap();
    let mut engine = ConvolutionEngine::new(&store, EngineOptions::default());
    engine
        .prepare(ProcessConfig::new(SAMPLE_RATE as f64, 128, 1))
        .unwrap();
    let mut wet = Vec::new();
    for chunk in input.chunks(128) {
        let mut block = AudioBuffer::from_planar(vec![chunk.to_vec()], SAMPLE_RATE).unwrap();
        engine.process(&mut block).unwrap();
        wet.extend_from_slice(block.channel(0));
    }

    assert_eq!(output, wet);
}

#[test_case(MixingRule::Linear, 0.5, 0.5 ; "linear")]
#[test_case(MixingRule::Balanced, 1.0, 1.0 ; "balanced")]
#[test_case(MixingRule::Sin3dB, std::f32::consts::FRAC_1_SQRT_2, std::f32::consts::FRAC_1_SQRT_2 ; "sin 3dB")]
#[test_case(MixingRule::SquareRoot3dB, std::f32::consts::FRAC_1_SQRT_2, std::f32::consts::FRAC_1_SQRT_2 ; "square root 3dB")]
fn test_half_mix_gains(rule: MixingRule, dry_gain: f32, wet_gain: f32) {
    let options = ProcessorOptions {
        mixer: MixerOptions {
            rule,
            ramp_secs: 0.0,
        },
        ..Default::default()
    };
    let mut processor = ConvolverProcessor::new(options);
    processor
        .store()
        .load_samples(vec![vec![0.0, 1.0]], SAMPLE_RATE as f64)
        .unwrap();
    processor
        .prepare(ProcessConfig::new(SAMPLE_RATE as f64, 16, 1))
        .unwrap();
    processor.wet_proportion().set(0.5);

    let input = test_signal(64);
    let output = run_mono(&mut processor, &input, 16);
    for i in 1..input.len() {
        let expected = dry_gain * input[i] + wet_gain * input[i - 1];
        assert_abs_diff_eq!(output[i], expected, epsilon = 1e-5);
    }
}

#[test]
fn test_mix_change_applies_next_block() {
    let mut processor = prepared_processor(Some(vec![0.0, 1.0]), 4);
    processor.wet_proportion().set(0.0);

    let mut first = AudioBuffer::from_planar(vec![vec![1.0; 4]], SAMPLE_RATE).unwrap();
    processor.process(&mut first).unwrap();
    assert_eq!(first.channel(0), &[1.0; 4]);

    processor.wet_proportion().set(1.0);
    let mut second = AudioBuffer::from_planar(vec![vec![0.0; 4]], SAMPLE_RATE).unwrap();
    processor.process(&mut second).unwrap();
    assert_abs_diff_eq!(second.channel(0)[0], 1.0, epsilon = 1e-5);
    assert_abs_diff_eq!(second.channel(0)[1], 0.0, epsilon = 1e-5);
}
