//! Convolution Engine
//!
//! Real-time multichannel convolution against the response held by an
//! [`ImpulseResponseStore`]. Kernel changes arrive as prebuilt bundles and
//! are adopted at the start of a block, so `process` never allocates,
//! locks or frees. An adopted bundle is faded in over `crossfade_secs`
//! while the outgoing one keeps running.

use std::mem;

use crossbeam_channel::{Receiver, Sender};
use log::debug;
use serde::{Deserialize, Serialize};

use super::convolver::{ChannelConvolver, LatencyMode};
use super::fft::Fft;
use super::partition::ConvolutionKernel;
use crate::engine::{AudioBuffer, ProcessConfig};
use crate::error::{try_zeroed, ProcessError, Result};
use crate::ir::{ImpulseResponseHandle, ImpulseResponseStore, IrOptions};

/// Default length of the fade between outgoing and incoming kernels
pub const DEFAULT_CROSSFADE_SECS: f64 = 0.05;

/// Engine settings fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub latency: LatencyMode,
    /// Fade between kernels on a response change; 0 switches at the block boundary
    pub crossfade_secs: f64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            latency: LatencyMode::default(),
            crossfade_secs: DEFAULT_CROSSFADE_SECS,
        }
    }
}

impl EngineOptions {
    /// Crossfade length in samples at `sample_rate`
    pub fn crossfade_len(&self, sample_rate: f64) -> usize {
        if !self.crossfade_secs.is_finite() || self.crossfade_secs <= 0.0 {
            return 0;
        }
        (self.crossfade_secs * sample_rate).round() as usize
    }
}

/// Configuration a kernel bundle is built for
#[derive(Debug, Clone, Copy)]
pub(crate) struct KernelTarget {
    pub config: ProcessConfig,
    pub mode: LatencyMode,
    pub generation: u64,
}

/// Everything the audio thread needs to convolve with one response
pub(crate) struct KernelBundle {
    generation: u64,
    response: ImpulseResponseHandle,
    kernel: ConvolutionKernel,
    convolvers: Vec<ChannelConvolver>,
    /// Response channel used by each audio channel
    channel_map: Vec<usize>,
}

impl KernelBundle {
    pub(crate) fn build(
        response: ImpulseResponseHandle,
        options: &IrOptions,
        target: &KernelTarget,
    ) -> Result<Self> {
        let config = &target.config;
        let partition_size = target.mode.partition_size(config.block_size);
        let rendered = response.render(config.sample_rate, options)?;

        let mut fft = Fft::new(2 * partition_size);
        let kernel = ConvolutionKernel::build(&rendered, partition_size, &mut fft)?;

        let channel_map = (0..config.num_channels)
            .map(|ch| ch % kernel.num_channels())
            .collect();
        let mut convolvers = Vec::with_capacity(config.num_channels);
        for _ in 0..config.num_channels {
            convolvers.push(ChannelConvolver::new(
                target.mode,
                partition_size,
                kernel.segment_count(),
            )?);
        }

        Ok(Self {
            generation: target.generation,
            response,
            kernel,
            convolvers,
            channel_map,
        })
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn ir_len(&self) -> usize {
        self.kernel.ir_len()
    }

    pub(crate) fn segment_count(&self) -> usize {
        self.kernel.segment_count()
    }

    pub(crate) fn partition_size(&self) -> usize {
        self.kernel.partition_size()
    }

    /// Continue the stream of `previous` with this bundle's kernel
    fn inherit(&mut self, previous: &KernelBundle) {
        for (ch, convolver) in self.convolvers.iter_mut().enumerate() {
            let kernel = self.kernel.channel(self.channel_map[ch]);
            convolver.inherit(&previous.convolvers[ch], kernel);
        }
    }

    fn reset(&mut self) {
        for convolver in &mut self.convolvers {
            convolver.reset();
        }
    }
}

/// Linear fade from the outgoing bundle to the active one
struct Crossfade {
    outgoing: Option<Box<KernelBundle>>,
    len: usize,
    pos: usize,
}

impl Crossfade {
    /// Blend `old` into `new` for the next `new.len()` samples of the fade
    fn apply(&self, old: &[f32], new: &mut [f32]) {
        let len = self.len as f32;
        for (i, (out, &faded)) in new.iter_mut().zip(old).enumerate() {
            let gain = ((self.pos + i + 1) as f32 / len).min(1.0);
            *out = faded + (*out - faded) * gain;
        }
    }
}

struct Prepared {
    config: ProcessConfig,
    generation: u64,
    active: Box<KernelBundle>,
    fade: Crossfade,
    scratch: Vec<f32>,
    /// Output of the outgoing bundle during a crossfade
    faded: Vec<f32>,
}

/// Streaming convolution of audio blocks with the store's current response
///
/// # Example
/// ```
/// use convolver::dsp::{ConvolutionEngine, EngineOptions};
/// use convolver::engine::{AudioBuffer, ProcessConfig};
/// use convolver::ir::ImpulseResponseStore;
///
/// let store = ImpulseResponseStore::default();
/// store.load_samples(vec![vec![0.0, 1.0]], 48000.0).unwrap();
///
/// let mut engine = ConvolutionEngine::new(&store, EngineOptions::default());
/// engine.prepare(ProcessConfig::new(48000.0, 4, 1)).unwrap();
///
/// let mut block = AudioBuffer::from_planar(vec![vec![1.0, 0.0, 0.0, 0.0]], 48000).unwrap();
/// engine.process(&mut block).unwrap();
/// assert!((block.channel(0)[1] - 1.0).abs() < 1e-5);
/// ```
pub struct ConvolutionEngine {
    options: EngineOptions,
    store: ImpulseResponseStore,
    inbox: Receiver<Box<KernelBundle>>,
    retired: Sender<Box<KernelBundle>>,
    prepared: Option<Prepared>,
}

impl std::fmt::Debug for ConvolutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvolutionEngine")
            .field("options", &self.options)
            .field("config", &self.config())
            .finish()
    }
}

impl ConvolutionEngine {
    pub fn new(store: &ImpulseResponseStore, options: EngineOptions) -> Self {
        let (inbox, retired) = store.engine_endpoints();
        Self {
            options,
            store: store.clone(),
            inbox,
            retired,
            prepared: None,
        }
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Allocate state for `config` and build the kernel for the current response
    ///
    /// Must be called off the audio thread. Clears all convolution history.
    pub fn prepare(&mut self, config: ProcessConfig) -> Result<()> {
        config.validate()?;
        let active = self.store.prepare_target(config, self.options.latency)?;
        let scratch = try_zeroed(config.block_size, "engine scratch")?;
        let faded = try_zeroed(config.block_size, "crossfade scratch")?;

        debug!(
            "Engine prepared: {} Hz, block {}, {} channel(s), partition {}, latency {}",
            config.sample_rate,
            config.block_size,
            config.num_channels,
            active.partition_size(),
            self.options.latency.latency(config.block_size)
        );

        self.prepared = Some(Prepared {
            config,
            generation: active.generation(),
            active,
            fade: Crossfade {
                outgoing: None,
                len: self.options.crossfade_len(config.sample_rate),
                pos: 0,
            },
            scratch,
            faded,
        });
        Ok(())
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    pub fn config(&self) -> Option<ProcessConfig> {
        self.prepared.as_ref().map(|p| p.config)
    }

    /// Convolve `block` in place
    ///
    /// The block may be shorter than the prepared block size. Misuse returns
    /// `Err` in every build, debug included, and leaves the block untouched.
    pub fn process(&mut self, block: &mut AudioBuffer) -> std::result::Result<(), ProcessError> {
        let Self {
            inbox,
            retired,
            prepared,
            ..
        } = self;
        let prepared = prepared.as_mut().ok_or(ProcessError::NotPrepared)?;
        prepared.config.check_block(block)?;

        // A response change waits in the inbox until the running fade completes
        if prepared.fade.outgoing.is_none() {
            while let Ok(bundle) = inbox.try_recv() {
                if adopt(prepared, bundle, retired) {
                    break;
                }
            }
        }

        let len = block.len();
        let Prepared {
            active,
            fade,
            scratch,
            faded,
            ..
        } = prepared;
        let KernelBundle {
            kernel,
            convolvers,
            channel_map,
            ..
        } = &mut **active;
        for (ch, convolver) in convolvers.iter_mut().enumerate() {
            let input = &mut scratch[..len];
            input.copy_from_slice(block.channel(ch));
            if let Some(old) = fade.outgoing.as_deref_mut() {
                let source = old.kernel.channel(old.channel_map[ch]);
                old.convolvers[ch].process(source, input, &mut faded[..len]);
            }
            convolver.process(kernel.channel(channel_map[ch]), input, block.channel_mut(ch));
            if fade.outgoing.is_some() {
                fade.apply(&faded[..len], block.channel_mut(ch));
            }
        }

        if fade.outgoing.is_some() {
            fade.pos += len;
            if fade.pos >= fade.len {
                if let Some(old) = fade.outgoing.take() {
                    // Freed here only when the retire queue is full
                    let _ = retired.try_send(old);
                }
            }
        }
        Ok(())
    }

    /// Latency reported to the host, in samples
    pub fn latency(&self) -> usize {
        let block_size = self.config().map(|c| c.block_size).unwrap_or(1);
        self.options.latency.latency(block_size)
    }

    /// Length of the active response at the processing rate
    pub fn tail_length(&self) -> usize {
        self.prepared
            .as_ref()
            .map(|p| p.active.ir_len())
            .unwrap_or(0)
    }

    /// Response the engine is currently convolving with
    pub fn active_response(&self) -> Option<ImpulseResponseHandle> {
        self.prepared.as_ref().map(|p| p.active.response.clone())
    }

    /// Whether a kernel change is still being faded in
    pub fn is_crossfading(&self) -> bool {
        self.prepared
            .as_ref()
            .map_or(false, |p| p.fade.outgoing.is_some())
    }

    /// Clear convolution history, keeping the kernel
    ///
    /// A crossfade in progress is cut short.
    pub fn reset(&mut self) {
        if let Some(prepared) = &mut self.prepared {
            if let Some(old) = prepared.fade.outgoing.take() {
                let _ = self.retired.try_send(old);
            }
            prepared.active.reset();
        }
    }
}

/// Make `bundle` active; returns false if it was built for an earlier configuration
fn adopt(
    prepared: &mut Prepared,
    mut bundle: Box<KernelBundle>,
    retired: &Sender<Box<KernelBundle>>,
) -> bool {
    if bundle.generation != prepared.generation {
        let _ = retired.try_send(bundle);
        return false;
    }
    bundle.inherit(&prepared.active);
    let previous = mem::replace(&mut prepared.active, bundle);
    if prepared.fade.len > 0 {
        prepared.fade.outgoing = Some(previous);
        prepared.fade.pos = 0;
    } else {
        // Freed here only when the retire queue is full
        let _ = retired.try_send(previous);
    }
    true
}
