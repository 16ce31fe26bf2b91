//! Audio file I/O for Convolver
//!
//! WAV decoding for impulse responses and input audio, WAV export for
//! rendered output. Decoding keeps the file's native sample rate; the
//! impulse response store resamples when it builds a kernel.

use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::engine::buffer::AudioBuffer;
use crate::error::{try_zeroed, ConvolverError, LoadError, Result};

/// Export format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportFormat {
    /// Bit depth: 16, 24, or 32 (32 = float)
    pub bit_depth: u16,
}

impl Default for ExportFormat {
    fn default() -> Self {
        ExportFormat { bit_depth: 32 }
    }
}

impl ExportFormat {
    pub fn new(bit_depth: u16) -> Self {
        ExportFormat { bit_depth }
    }
}

/// Decode a WAV payload held in memory
///
/// # Errors
/// * `Empty` - zero-length payload or no sample frames
/// * `UnsupportedFormat` - not a WAV file, or an encoding hound cannot read
pub fn decode_wav_bytes(bytes: &[u8]) -> std::result::Result<AudioBuffer, LoadError> {
    if bytes.is_empty() {
        return Err(LoadError::Empty);
    }
    decode_wav(Cursor::new(bytes))
}

/// Decode a WAV stream into a planar buffer at its native sample rate
pub fn decode_wav<R: Read>(source: R) -> std::result::Result<AudioBuffer, LoadError> {
    let reader = WavReader::new(source).map_err(|e| LoadError::UnsupportedFormat {
        reason: format!("Failed to parse WAV header: {}", e),
        source: Some(e),
    })?;

    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(LoadError::UnsupportedFormat {
            reason: "WAV header declares zero channels".to_string(),
            source: None,
        });
    }
    if spec.sample_rate == 0 {
        return Err(LoadError::UnsupportedFormat {
            reason: "WAV header declares a zero sample rate".to_string(),
            source: None,
        });
    }

    let interleaved = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
    if interleaved.len() < channels {
        return Err(LoadError::Empty);
    }

    let channel_data = deinterleave(&interleaved, channels);
    Ok(AudioBuffer {
        samples: channel_data,
        sample_rate: spec.sample_rate,
    })
}

/// Import an audio file at its native sample rate
pub fn import_audio(path: &Path) -> Result<AudioBuffer> {
    let file = std::fs::File::open(path)?;
    let buffer = decode_wav(std::io::BufReader::new(file))?;
    Ok(buffer)
}

/// Export an AudioBuffer to a WAV file at the buffer's sample rate
pub fn export_audio(buffer: &AudioBuffer, path: &Path, format: ExportFormat) -> Result<()> {
    let file = std::fs::File::create(path)?;
    write_wav(buffer, std::io::BufWriter::new(file), format)
}

/// Encode an AudioBuffer as an in-memory WAV payload
pub fn encode_wav(buffer: &AudioBuffer, format: ExportFormat) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    write_wav(buffer, &mut cursor, format)?;
    Ok(cursor.into_inner())
}

/// Write an AudioBuffer as WAV into any seekable sink
pub fn write_wav<W: Write + Seek>(
    buffer: &AudioBuffer,
    sink: W,
    format: ExportFormat,
) -> Result<()> {
    let spec = WavSpec {
        channels: buffer.num_channels() as u16,
        sample_rate: buffer.sample_rate,
        bits_per_sample: format.bit_depth,
        sample_format: if format.bit_depth == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };

    let mut writer = WavWriter::new(sink, spec).map_err(hound_to_io)?;
    let interleaved = buffer.to_interleaved();

    match format.bit_depth {
        16 => {
            for sample in interleaved {
                let scaled = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                writer.write_sample(scaled).map_err(hound_to_io)?;
            }
        }
        24 => {
            for sample in interleaved {
                // 24-bit stored as i32 in hound
                let scaled = (sample * 8388607.0).clamp(-8388608.0, 8388607.0) as i32;
                writer.write_sample(scaled).map_err(hound_to_io)?;
            }
        }
        32 => {
            for sample in interleaved {
                writer.write_sample(sample).map_err(hound_to_io)?;
            }
        }
        other => {
            return Err(ConvolverError::InvalidParameter {
                param: "bit_depth".to_string(),
                value: other.to_string(),
                expected: "16, 24 or 32".to_string(),
            });
        }
    }

    writer.finalize().map_err(hound_to_io)?;
    Ok(())
}

/// Generate a mono sine test tone
pub fn generate_test_tone(frequency: f32, duration_secs: f32, sample_rate: u32) -> AudioBuffer {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let mut buffer = AudioBuffer::new(1, num_samples, sample_rate);

    let angular_freq = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;
    for (i, sample) in buffer.samples[0].iter_mut().enumerate() {
        *sample = (angular_freq * i as f32).sin();
    }

    buffer
}

/// Linear interpolation resampling
///
/// Linear interpolation aliases when downsampling; impulse responses are
/// usually recorded at the session rate so this path is rarely taken.
///
/// # Errors
/// * `OutOfMemory` - the resampled length cannot be represented or allocated
pub fn resample_linear(samples: &[f32], source_rate: f64, target_rate: f64) -> Result<Vec<f32>> {
    if samples.is_empty() || source_rate == target_rate {
        return Ok(samples.to_vec());
    }

    let ratio = target_rate / source_rate;
    let source_len = samples.len();
    let target_len = resampled_len(source_len, ratio)?;
    let mut output: Vec<f32> = try_zeroed(target_len, "resampled impulse response")?;

    for (i, out) in output.iter_mut().enumerate() {
        let src_pos = i as f64 / ratio;
        let src_idx = src_pos.floor() as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        *out = if src_idx + 1 < source_len {
            samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac
        } else if src_idx < source_len {
            samples[src_idx]
        } else {
            0.0
        };
    }

    Ok(output)
}

/// Number of samples `source_len` samples occupy after scaling by `ratio`
fn resampled_len(source_len: usize, ratio: f64) -> Result<usize> {
    let max_len = isize::MAX as usize / std::mem::size_of::<f32>();
    let target = (source_len as f64 * ratio).ceil();
    if !target.is_finite() || target < 0.0 || target > max_len as f64 {
        return Err(ConvolverError::OutOfMemory {
            details: format!(
                "resampling {} samples by {} gives an unrepresentable length",
                source_len, ratio
            ),
        });
    }
    Ok((target as usize).max(1))
}

// ============================================================================
// Internal helper functions
// ============================================================================

fn hound_to_io(e: hound::Error) -> ConvolverError {
    match e {
        hound::Error::IoError(io) => ConvolverError::Io(io),
        other => ConvolverError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            other.to_string(),
        )),
    }
}

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> std::result::Result<Vec<f32>, LoadError> {
    let unreadable = |e: hound::Error| LoadError::UnsupportedFormat {
        reason: format!("Failed to read {}-bit samples: {}", bits_per_sample, e),
        source: Some(e),
    };

    match (sample_format, bits_per_sample) {
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(unreadable),
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|v| v as f32 / 128.0))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(unreadable),
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(unreadable),
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8388608.0))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(unreadable),
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 2147483648.0))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(unreadable),
        (format, bits) => Err(LoadError::UnsupportedFormat {
            reason: format!("{}-bit {:?} audio", bits, format),
            source: None,
        }),
    }
}

/// De-interleave samples from [L,R,L,R,...] to [[L,L,...], [R,R,...]]
///
/// A trailing partial frame is dropped.
fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut result = vec![Vec::with_capacity(frames); channels];

    for frame in samples.chunks_exact(channels) {
        for (ch, &sample) in frame.iter().enumerate() {
            result[ch].push(sample);
        }
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
