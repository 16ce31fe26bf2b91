//! Convolver Processor
//!
//! Wires the impulse response store, convolution engine and dry/wet mixer in
//! per-block order and persists the mix parameter.

use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::dsp::{ConvolutionEngine, DryWetMixer, EngineOptions, MixerOptions, WetProportion};
use crate::engine::{AudioBuffer, ProcessConfig};
use crate::error::{ProcessError, Result};
use crate::ir::{ImpulseResponseStore, IrOptions};

/// Everything configurable about a processor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorOptions {
    pub ir: IrOptions,
    pub engine: EngineOptions,
    pub mixer: MixerOptions,
}

impl ProcessorOptions {
    /// Load options from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Persisted processor parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorState {
    #[serde(alias = "drywet")]
    pub wet_proportion: f32,
}

impl Default for ProcessorState {
    fn default() -> Self {
        Self {
            wet_proportion: 1.0,
        }
    }
}

/// Convolution reverb core: IR store, engine and mixer driven together
///
/// # Example
/// ```
/// use convolver::engine::{AudioBuffer, ProcessConfig};
/// use convolver::processor::{ConvolverProcessor, ProcessorOptions};
///
/// let mut processor = ConvolverProcessor::new(ProcessorOptions::default());
/// processor.store().load_samples(vec![vec![0.5]], 48000.0).unwrap();
/// processor.prepare(ProcessConfig::new(48000.0, 4, 1)).unwrap();
/// processor.wet_proportion().set(0.5);
///
/// let mut block = AudioBuffer::from_planar(vec![vec![1.0; 4]], 48000).unwrap();
/// processor.process(&mut block).unwrap();
/// assert!((block.channel(0)[0] - 0.75).abs() < 1e-5);
/// ```
#[derive(Debug)]
pub struct ConvolverProcessor {
    options: ProcessorOptions,
    store: ImpulseResponseStore,
    engine: ConvolutionEngine,
    mixer: DryWetMixer,
}

impl ConvolverProcessor {
    pub fn new(options: ProcessorOptions) -> Self {
        let store = ImpulseResponseStore::new(options.ir);
        let engine = ConvolutionEngine::new(&store, options.engine);
        let mixer = DryWetMixer::new(options.mixer);
        Self {
            options,
            store,
            engine,
            mixer,
        }
    }

    pub fn options(&self) -> ProcessorOptions {
        self.options
    }

    /// Handle for loading impulse responses from any thread
    pub fn store(&self) -> ImpulseResponseStore {
        self.store.clone()
    }

    /// Handle for changing the mix from any thread
    pub fn wet_proportion(&self) -> WetProportion {
        self.mixer.wet_proportion_handle()
    }

    pub fn engine(&self) -> &ConvolutionEngine {
        &self.engine
    }

    pub fn mixer(&self) -> &DryWetMixer {
        &self.mixer
    }

    /// Prepare the engine, then the mixer with the engine's latency
    pub fn prepare(&mut self, config: ProcessConfig) -> Result<()> {
        self.engine.prepare(config)?;
        self.mixer.prepare(config, self.engine.latency())?;
        info!(
            "Processor prepared: {} Hz, block {}, {} channel(s), latency {} samples",
            config.sample_rate,
            config.block_size,
            config.num_channels,
            self.latency()
        );
        Ok(())
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared_config().is_some()
    }

    fn prepared_config(&self) -> Option<ProcessConfig> {
        let config = self.engine.config()?;
        (self.mixer.config() == Some(config) && self.mixer.latency() == self.engine.latency())
            .then_some(config)
    }

    /// Convolve and mix one block in place
    ///
    /// Shape and state are checked before anything is touched; on error the
    /// block is returned unchanged. Debug builds return the same `Err` and do
    /// not assert.
    pub fn process(&mut self, block: &mut AudioBuffer) -> std::result::Result<(), ProcessError> {
        let config = self.prepared_config().ok_or(ProcessError::NotPrepared)?;
        config.check_block(block)?;

        self.mixer.capture_dry(block)?;
        self.engine.process(block)?;
        self.mixer.recombine(block)
    }

    /// Latency in samples for the host to compensate
    pub fn latency(&self) -> usize {
        self.engine.latency()
    }

    /// Samples of output that follow the last non-silent input
    pub fn tail_length(&self) -> usize {
        self.engine.tail_length()
    }

    pub fn tail_length_secs(&self) -> f64 {
        match self.engine.config() {
            Some(config) => self.tail_length() as f64 / config.sample_rate,
            None => self.store.current().duration_secs(),
        }
    }

    /// Clear convolution history and the dry delay line
    pub fn reset(&mut self) {
        self.engine.reset();
        self.mixer.reset();
    }

    pub fn state(&self) -> ProcessorState {
        ProcessorState {
            wet_proportion: self.mixer.wet_proportion(),
        }
    }

    /// Apply saved parameters; out-of-range values are clamped
    pub fn restore_state(&self, state: &ProcessorState) {
        self.mixer.set_wet_proportion(state.wet_proportion);
    }

    pub fn save_state_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.state())?)
    }

    pub fn restore_state_json(&self, json: &str) -> Result<()> {
        let state: ProcessorState = serde_json::from_str(json)?;
        self.restore_state(&state);
        Ok(())
    }
}

impl Default for ConvolverProcessor {
    fn default() -> Self {
        Self::new(ProcessorOptions::default())
    }
}
