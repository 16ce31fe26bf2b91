//! Dry/Wet Mixer
//!
//! Blends the unprocessed block with the convolved block. The dry path runs
//! through a delay line matching the wet path's latency so both stay aligned.

use std::f32::consts::FRAC_PI_2;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use atomic_float::AtomicF32;
use serde::{Deserialize, Serialize};

use crate::engine::{AudioBuffer, ProcessConfig};
use crate::error::{try_zeroed, ConvolverError, ProcessError, Result};

// ============================================================================
// Mixing Rules
// ============================================================================

/// Gain law applied to the wet proportion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MixingRule {
    /// `dry = 1 - p`, `wet = p`; uncorrelated signals dip ~3 dB at the centre
    #[default]
    #[serde(rename = "linear")]
    Linear,
    /// Both sides at full level up to the centre, then fading out
    #[serde(rename = "balanced")]
    Balanced,
    #[serde(rename = "sin3db")]
    Sin3dB,
    #[serde(rename = "sin4p5db")]
    Sin4p5dB,
    #[serde(rename = "sin6db")]
    Sin6dB,
    #[serde(rename = "square_root3db")]
    SquareRoot3dB,
    #[serde(rename = "square_root4p5db")]
    SquareRoot4p5dB,
}

impl MixingRule {
    pub const ALL: [MixingRule; 7] = [
        MixingRule::Linear,
        MixingRule::Balanced,
        MixingRule::Sin3dB,
        MixingRule::Sin4p5dB,
        MixingRule::Sin6dB,
        MixingRule::SquareRoot3dB,
        MixingRule::SquareRoot4p5dB,
    ];

    /// Dry and wet gains for wet proportion `p` in [0, 1]
    ///
    /// # Returns
    /// `(dry_gain, wet_gain)`
    pub fn gains(&self, p: f32) -> (f32, f32) {
        let p = p.clamp(0.0, 1.0);
        match self {
            MixingRule::Linear => (1.0 - p, p),
            MixingRule::Balanced => (2.0 * (1.0 - p).min(0.5), 2.0 * p.min(0.5)),
            MixingRule::Sin3dB => sin_gains(p),
            MixingRule::Sin4p5dB => {
                let (dry, wet) = sin_gains(p);
                (dry.powf(1.5), wet.powf(1.5))
            }
            MixingRule::Sin6dB => {
                let (dry, wet) = sin_gains(p);
                (dry * dry, wet * wet)
            }
            MixingRule::SquareRoot3dB => ((1.0 - p).sqrt(), p.sqrt()),
            MixingRule::SquareRoot4p5dB => ((1.0 - p).sqrt().powf(1.5), p.sqrt().powf(1.5)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MixingRule::Linear => "linear",
            MixingRule::Balanced => "balanced",
            MixingRule::Sin3dB => "sin3db",
            MixingRule::Sin4p5dB => "sin4p5db",
            MixingRule::Sin6dB => "sin6db",
            MixingRule::SquareRoot3dB => "square_root3db",
            MixingRule::SquareRoot4p5dB => "square_root4p5db",
        }
    }
}

fn sin_gains(p: f32) -> (f32, f32) {
    // Endpoints pinned so p = 0 and p = 1 pass one side through exactly
    if p <= 0.0 {
        return (1.0, 0.0);
    }
    if p >= 1.0 {
        return (0.0, 1.0);
    }
    ((FRAC_PI_2 * (1.0 - p)).sin(), (FRAC_PI_2 * p).sin())
}

impl fmt::Display for MixingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MixingRule {
    type Err = ConvolverError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.to_ascii_lowercase().replace(['-', '_'], "");
        MixingRule::ALL
            .into_iter()
            .find(|rule| rule.name().replace('_', "") == wanted)
            .ok_or_else(|| ConvolverError::InvalidParameter {
                param: "mixing rule".to_string(),
                value: s.to_string(),
                expected: MixingRule::ALL
                    .iter()
                    .map(|r| r.name())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

// ============================================================================
// Wet Proportion
// ============================================================================

/// Lock-free handle to the wet proportion, shared between control and audio threads
///
/// Writes clamp to [0, 1]; non-finite writes are ignored.
#[derive(Debug, Clone)]
pub struct WetProportion(Arc<AtomicF32>);

impl WetProportion {
    pub fn new(value: f32) -> Self {
        let handle = Self(Arc::new(AtomicF32::new(1.0)));
        handle.set(value);
        handle
    }

    pub fn set(&self, value: f32) {
        if value.is_finite() {
            self.0.store(value.clamp(0.0, 1.0), Ordering::Relaxed);
        }
    }

    pub fn get(&self) -> f32 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for WetProportion {
    fn default() -> Self {
        Self::new(1.0)
    }
}

// ============================================================================
// Gain Ramp
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct GainRamp {
    current: f32,
    target: f32,
    step: f32,
    remaining: usize,
}

impl GainRamp {
    fn settled(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            remaining: 0,
        }
    }

    fn retarget(&mut self, target: f32, ramp_len: usize) {
        if target == self.target {
            return;
        }
        if ramp_len == 0 {
            *self = Self::settled(target);
            return;
        }
        self.target = target;
        self.step = (target - self.current) / ramp_len as f32;
        self.remaining = ramp_len;
    }

    #[inline]
    fn next(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.current = if self.remaining == 0 {
                self.target
            } else {
                self.current + self.step
            };
        }
        self.current
    }

    fn is_settled(&self) -> bool {
        self.remaining == 0
    }
}

// ============================================================================
// Dry/Wet Mixer
// ============================================================================

/// Mixer behaviour fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerOptions {
    pub rule: MixingRule,
    /// Duration of gain changes in seconds; 0 applies changes instantly
    pub ramp_secs: f32,
}

impl Default for MixerOptions {
    fn default() -> Self {
        Self {
            rule: MixingRule::Linear,
            ramp_secs: 0.0,
        }
    }
}

struct MixerState {
    config: ProcessConfig,
    latency: usize,
    /// Per-channel ring delaying the dry path by `latency` samples
    delay: Vec<Vec<f32>>,
    delay_pos: usize,
    /// Delayed dry copy of the captured block
    dry: Vec<Vec<f32>>,
    captured: Option<usize>,
    ramp_len: usize,
    dry_gain: GainRamp,
    wet_gain: GainRamp,
}

/// Dry/wet blend around an in-place wet stage
///
/// # Example
/// ```
/// use convolver::dsp::{DryWetMixer, MixerOptions};
/// use convolver::engine::{AudioBuffer, ProcessConfig};
///
/// let mut mixer = DryWetMixer::new(MixerOptions::default());
/// mixer.prepare(ProcessConfig::new(48000.0, 4, 1), 0).unwrap();
/// mixer.set_wet_proportion(0.25);
///
/// let mut block = AudioBuffer::from_planar(vec![vec![1.0; 4]], 48000).unwrap();
/// mixer.capture_dry(&block).unwrap();
/// block.channel_mut(0).fill(0.0);
/// mixer.recombine(&mut block).unwrap();
/// assert_eq!(block.channel(0), &[0.75; 4]);
/// ```
pub struct DryWetMixer {
    options: MixerOptions,
    wet: WetProportion,
    state: Option<MixerState>,
}

impl fmt::Debug for DryWetMixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DryWetMixer")
            .field("options", &self.options)
            .field("wet_proportion", &self.wet.get())
            .field("config", &self.config())
            .finish()
    }
}

impl DryWetMixer {
    pub fn new(options: MixerOptions) -> Self {
        Self::with_wet_proportion(options, WetProportion::default())
    }

    /// Build a mixer reading an existing wet proportion handle
    pub fn with_wet_proportion(options: MixerOptions, wet: WetProportion) -> Self {
        Self {
            options,
            wet,
            state: None,
        }
    }

    /// Allocate buffers for `config` with the dry path delayed by `wet_latency`
    ///
    /// Clears any pending snapshot and delay history.
    pub fn prepare(&mut self, config: ProcessConfig, wet_latency: usize) -> Result<()> {
        config.validate()?;
        if !self.options.ramp_secs.is_finite() || self.options.ramp_secs < 0.0 {
            return Err(ConvolverError::InvalidParameter {
                param: "ramp_secs".to_string(),
                value: self.options.ramp_secs.to_string(),
                expected: "finite value >= 0".to_string(),
            });
        }

        let mut delay = Vec::with_capacity(config.num_channels);
        let mut dry = Vec::with_capacity(config.num_channels);
        for _ in 0..config.num_channels {
            delay.push(try_zeroed(wet_latency, "dry delay line")?);
            dry.push(try_zeroed(config.block_size, "dry snapshot")?);
        }

        let (dry_gain, wet_gain) = self.options.rule.gains(self.wet.get());
        self.state = Some(MixerState {
            config,
            latency: wet_latency,
            delay,
            delay_pos: 0,
            dry,
            captured: None,
            ramp_len: (self.options.ramp_secs as f64 * config.sample_rate).round() as usize,
            dry_gain: GainRamp::settled(dry_gain),
            wet_gain: GainRamp::settled(wet_gain),
        });
        Ok(())
    }

    pub fn is_prepared(&self) -> bool {
        self.state.is_some()
    }

    pub fn config(&self) -> Option<ProcessConfig> {
        self.state.as_ref().map(|s| s.config)
    }

    /// Delay applied to the dry path, in samples
    pub fn latency(&self) -> usize {
        self.state.as_ref().map(|s| s.latency).unwrap_or(0)
    }

    pub fn options(&self) -> MixerOptions {
        self.options
    }

    pub fn mixing_rule(&self) -> MixingRule {
        self.options.rule
    }

    /// Change the gain law; takes effect from the next recombination
    pub fn set_mixing_rule(&mut self, rule: MixingRule) {
        self.options.rule = rule;
    }

    pub fn set_wet_proportion(&self, value: f32) {
        self.wet.set(value);
    }

    pub fn wet_proportion(&self) -> f32 {
        self.wet.get()
    }

    /// Handle for changing the wet proportion from another thread
    pub fn wet_proportion_handle(&self) -> WetProportion {
        self.wet.clone()
    }

    /// Snapshot `block` as the dry signal for the next `recombine`
    ///
    /// Misuse returns `Err` in debug and release builds alike; nothing asserts.
    pub fn capture_dry(&mut self, block: &AudioBuffer) -> std::result::Result<(), ProcessError> {
        let state = self.state.as_mut().ok_or(ProcessError::NotPrepared)?;
        state.config.check_block(block)?;

        let len = block.len();
        let latency = state.latency;
        for (ch, dry) in state.dry.iter_mut().enumerate() {
            let input = block.channel(ch);
            if latency == 0 {
                dry[..len].copy_from_slice(input);
                continue;
            }
            let ring = &mut state.delay[ch];
            let mut pos = state.delay_pos;
            for (out, &sample) in dry[..len].iter_mut().zip(input) {
                *out = ring[pos];
                ring[pos] = sample;
                pos += 1;
                if pos == latency {
                    pos = 0;
                }
            }
        }
        if latency > 0 {
            state.delay_pos = (state.delay_pos + len) % latency;
        }
        state.captured = Some(len);
        Ok(())
    }

    /// Blend the captured dry signal into the wet `block` in place
    ///
    /// The wet proportion is read once per call. On error the block is left
    /// untouched, in debug builds as well as release.
    pub fn recombine(&mut self, block: &mut AudioBuffer) -> std::result::Result<(), ProcessError> {
        let state = self.state.as_mut().ok_or(ProcessError::NotPrepared)?;
        state.config.check_block(block)?;
        let len = block.len();
        if state.captured != Some(len) {
            return Err(ProcessError::DrySnapshotMissing);
        }
        state.captured = None;

        let (dry_target, wet_target) = self.options.rule.gains(self.wet.get());
        state.dry_gain.retarget(dry_target, state.ramp_len);
        state.wet_gain.retarget(wet_target, state.ramp_len);

        if state.dry_gain.is_settled() && state.wet_gain.is_settled() {
            let (dry_gain, wet_gain) = (state.dry_gain.current, state.wet_gain.current);
            for (ch, dry) in state.dry.iter().enumerate() {
                for (out, &d) in block.channel_mut(ch).iter_mut().zip(&dry[..len]) {
                    *out = d * dry_gain + *out * wet_gain;
                }
            }
            return Ok(());
        }

        // Every channel follows the same ramp
        let (start_dry, start_wet) = (state.dry_gain, state.wet_gain);
        for (ch, dry) in state.dry.iter().enumerate() {
            state.dry_gain = start_dry;
            state.wet_gain = start_wet;
            for (out, &d) in block.channel_mut(ch).iter_mut().zip(&dry[..len]) {
                *out = d * state.dry_gain.next() + *out * state.wet_gain.next();
            }
        }
        Ok(())
    }

    /// Clear the delay line and any pending snapshot
    pub fn reset(&mut self) {
        if let Some(state) = &mut self.state {
            for ring in &mut state.delay {
                ring.fill(0.0);
            }
            for dry in &mut state.dry {
                dry.fill(0.0);
            }
            state.delay_pos = 0;
            state.captured = None;
            let (dry_gain, wet_gain) = self.options.rule.gains(self.wet.get());
            state.dry_gain = GainRamp::settled(dry_gain);
            state.wet_gain = GainRamp::settled(wet_gain);
        }
    }
}

impl Default for DryWetMixer {
    fn default() -> Self {
        Self::new(MixerOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use test_case::test_case;

    fn prepared(latency: usize) -> DryWetMixer {
        let mut mixer = DryWetMixer::default();
        mixer
            .prepare(ProcessConfig::new(48000.0, 4, 2), latency)
            .unwrap();
        mixer
    }

    fn block(values: [f32; 4]) -> AudioBuffer {
        AudioBuffer::from_planar(vec![values.to_vec(), values.to_vec()], 48000).unwrap()
    }

    #[test_case(MixingRule::Linear)]
    #[test_case(MixingRule::Balanced)]
    #[test_case(MixingRule::Sin3dB)]
    #[test_case(MixingRule::Sin4p5dB)]
    #[test_case(MixingRule::Sin6dB)]
    #[test_case(MixingRule::SquareRoot3dB)]
    #[test_case(MixingRule::SquareRoot4p5dB)]
    fn test_rule_endpoints(rule: MixingRule) {
        assert_eq!(rule.gains(0.0), (1.0, 0.0));
        assert_eq!(rule.gains(1.0), (0.0, 1.0));
    }

    #[test]
    fn test_rule_midpoints() {
        assert_eq!(MixingRule::Linear.gains(0.5), (0.5, 0.5));
        assert_eq!(MixingRule::Balanced.gains(0.25), (1.0, 0.5));
        let (dry, wet) = MixingRule::Sin3dB.gains(0.5);
        assert_abs_diff_eq!(dry, std::f32::consts::FRAC_1_SQRT_2, epsilon = 1e-6);
        assert_abs_diff_eq!(wet, std::f32::consts::FRAC_1_SQRT_2, epsilon = 1e-6);
        let (dry, _) = MixingRule::Sin6dB.gains(0.5);
        assert_abs_diff_eq!(dry, 0.5, epsilon = 1e-6);
        let (_, wet) = MixingRule::SquareRoot3dB.gains(0.25);
        assert_abs_diff_eq!(wet, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_rule_parse() {
        assert_eq!("linear".parse::<MixingRule>().unwrap(), MixingRule::Linear);
        assert_eq!("Sin3dB".parse::<MixingRule>().unwrap(), MixingRule::Sin3dB);
        assert_eq!(
            "square-root-4p5db".parse::<MixingRule>().unwrap(),
            MixingRule::SquareRoot4p5dB
        );
        assert!("loud".parse::<MixingRule>().is_err());
        for rule in MixingRule::ALL {
            assert_eq!(rule.to_string().parse::<MixingRule>().unwrap(), rule);
        }
    }

    #[test]
    fn test_wet_proportion_clamps() {
        let wet = WetProportion::new(2.0);
        assert_eq!(wet.get(), 1.0);
        wet.set(-0.5);
        assert_eq!(wet.get(), 0.0);
        wet.set(0.3);
        wet.set(f32::NAN);
        assert_eq!(wet.get(), 0.3);
    }

    #[test]
    fn test_boundaries_are_exact() {
        let mut mixer = prepared(0);
        let dry = block([0.1, 0.2, 0.3, 0.4]);
        let wet = block([0.9, -0.8, 0.7, -0.6]);

        mixer.set_wet_proportion(0.0);
        let mut out = wet.clone();
        mixer.capture_dry(&dry).unwrap();
        mixer.recombine(&mut out).unwrap();
        assert_eq!(out, dry);

        mixer.set_wet_proportion(1.0);
        let mut out = wet.clone();
        mixer.capture_dry(&dry).unwrap();
        mixer.recombine(&mut out).unwrap();
        assert_eq!(out, wet);
    }

    #[test]
    fn test_dry_path_is_delayed() {
        let mut mixer = prepared(3);
        mixer.set_wet_proportion(0.0);

        let mut first = block([1.0, 2.0, 3.0, 4.0]);
        mixer.capture_dry(&first).unwrap();
        mixer.recombine(&mut first).unwrap();
        assert_eq!(first.channel(0), &[0.0, 0.0, 0.0, 1.0]);

        let mut second = block([5.0, 6.0, 7.0, 8.0]);
        mixer.capture_dry(&second).unwrap();
        mixer.recombine(&mut second).unwrap();
        assert_eq!(second.channel(1), &[2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_recombine_requires_snapshot() {
        let mut mixer = prepared(0);
        let mut out = block([1.0; 4]);
        assert_eq!(
            mixer.recombine(&mut out),
            Err(ProcessError::DrySnapshotMissing)
        );

        mixer.capture_dry(&block([0.5; 4])).unwrap();
        mixer.recombine(&mut out).unwrap();
        assert_eq!(
            mixer.recombine(&mut out),
            Err(ProcessError::DrySnapshotMissing)
        );
    }

    #[test]
    fn test_snapshot_length_must_match() {
        let mut mixer = prepared(0);
        mixer.capture_dry(&block([0.5; 4])).unwrap();
        let mut short = AudioBuffer::new(2, 2, 48000);
        assert_eq!(
            mixer.recombine(&mut short),
            Err(ProcessError::DrySnapshotMissing)
        );
    }

    #[test]
    fn test_unprepared_and_mismatch_err_in_debug_builds() {
        let mut mixer = DryWetMixer::default();
        let mut out = block([1.0; 4]);
        assert_eq!(mixer.capture_dry(&out), Err(ProcessError::NotPrepared));
        assert_eq!(mixer.recombine(&mut out), Err(ProcessError::NotPrepared));

        let mut mixer = prepared(0);
        let mut mono = AudioBuffer::from_planar(vec![vec![1.0; 4]], 48000).unwrap();
        assert!(matches!(
            mixer.capture_dry(&mono),
            Err(ProcessError::ConfigMismatch { .. })
        ));
        assert!(matches!(
            mixer.recombine(&mut mono),
            Err(ProcessError::ConfigMismatch { .. })
        ));
        assert_eq!(mono.channel(0), &[1.0; 4]);
    }

    #[test]
    fn test_ramp_reaches_target() {
        let mut mixer = DryWetMixer::new(MixerOptions {
            rule: MixingRule::Linear,
            ramp_secs: 4.0 / 48000.0,
        });
        mixer
            .prepare(ProcessConfig::new(48000.0, 4, 2), 0)
            .unwrap();
        mixer.set_wet_proportion(0.0);

        let mut out = block([0.0; 4]);
        mixer.capture_dry(&block([1.0; 4])).unwrap();
        mixer.recombine(&mut out).unwrap();
        for ch in 0..2 {
            let samples = out.channel(ch);
            assert_abs_diff_eq!(samples[0], 0.25, epsilon = 1e-6);
            assert_abs_diff_eq!(samples[1], 0.5, epsilon = 1e-6);
            assert_eq!(samples[3], 1.0);
        }

        let mut out = block([0.0; 4]);
        mixer.capture_dry(&block([1.0; 4])).unwrap();
        mixer.recombine(&mut out).unwrap();
        assert_eq!(out.channel(0), &[1.0; 4]);
    }

    #[test]
    fn test_reset_clears_delay() {
        let mut mixer = prepared(2);
        mixer.set_wet_proportion(0.0);
        mixer.capture_dry(&block([1.0; 4])).unwrap();
        mixer.reset();

        let mut out = block([0.0; 4]);
        assert_eq!(
            mixer.recombine(&mut out),
            Err(ProcessError::DrySnapshotMissing)
        );
        mixer.capture_dry(&block([0.0; 4])).unwrap();
        mixer.recombine(&mut out).unwrap();
        assert_eq!(out.channel(0), &[0.0; 4]);
    }

    #[test]
    fn test_options_serde_defaults() {
        let options: MixerOptions = serde_json::from_str(r#"{"rule": "sin3db"}"#).unwrap();
        assert_eq!(options.rule, MixingRule::Sin3dB);
        assert_eq!(options.ramp_secs, 0.0);
        let empty: MixerOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, MixerOptions::default());
    }
}
