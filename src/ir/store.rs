//! Impulse Response Store
//!
//! Owns the active impulse response and publishes kernels to the
//! convolution engine. All kernel building happens on the thread that calls
//! `load`/`prepare`; the audio thread only ever receives finished bundles.

use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, info, warn};
use parking_lot::Mutex;

use super::response::{ImpulseResponse, ImpulseResponseHandle, IrOptions};
use crate::dsp::convolution::{KernelBundle, KernelTarget};
use crate::dsp::LatencyMode;
use crate::engine::{decode_wav_bytes, ProcessConfig};
use crate::error::{LoadError, Result};

/// Replaced bundles waiting to be freed off the audio thread
const RETIRE_QUEUE_DEPTH: usize = 8;

/// Configuration the engine was last prepared with
struct TargetState {
    target: Option<KernelTarget>,
    generation: u64,
}

struct Shared {
    options: IrOptions,
    current: Mutex<ImpulseResponseHandle>,
    /// Held while building and publishing so loads and prepares never interleave
    target: Mutex<TargetState>,
    inbox_tx: Sender<Box<KernelBundle>>,
    inbox_rx: Receiver<Box<KernelBundle>>,
    retired_tx: Sender<Box<KernelBundle>>,
    retired_rx: Receiver<Box<KernelBundle>>,
}

/// Cloneable handle to the impulse response shared by a control thread and
/// one convolution engine
///
/// # Example
/// ```
/// use convolver::ir::{ImpulseResponseStore, IrOptions};
///
/// let store = ImpulseResponseStore::new(IrOptions::default());
/// assert!(store.current().is_identity());
/// store.load_samples(vec![vec![1.0, 0.5, 0.25]], 48000.0).unwrap();
/// assert_eq!(store.current().len(), 3);
/// ```
#[derive(Clone)]
pub struct ImpulseResponseStore {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ImpulseResponseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImpulseResponseStore")
            .field("options", &self.shared.options)
            .field("current", &self.shared.current.lock().len())
            .finish()
    }
}

impl ImpulseResponseStore {
    pub fn new(options: IrOptions) -> Self {
        let (inbox_tx, inbox_rx) = bounded(1);
        let (retired_tx, retired_rx) = bounded(RETIRE_QUEUE_DEPTH);
        Self {
            shared: Arc::new(Shared {
                options,
                current: Mutex::new(Arc::new(ImpulseResponse::identity())),
                target: Mutex::new(TargetState {
                    target: None,
                    generation: 0,
                }),
                inbox_tx,
                inbox_rx,
                retired_tx,
                retired_rx,
            }),
        }
    }

    pub fn options(&self) -> IrOptions {
        self.shared.options
    }

    /// Decode a WAV payload and make it the active response
    ///
    /// On failure the previous response stays active.
    pub fn load(&self, source_bytes: &[u8]) -> std::result::Result<ImpulseResponseHandle, LoadError> {
        let buffer = decode_wav_bytes(source_bytes)?;
        self.replace(ImpulseResponse::from_buffer(buffer)?)
    }

    /// Read a WAV file and make it the active response
    pub fn load_file(&self, path: &Path) -> std::result::Result<ImpulseResponseHandle, LoadError> {
        let bytes = std::fs::read(path)?;
        info!("Loading impulse response from {}", path.display());
        self.load(&bytes)
    }

    /// Make already-decoded planar samples the active response
    pub fn load_samples(
        &self,
        channels: Vec<Vec<f32>>,
        sample_rate: f64,
    ) -> std::result::Result<ImpulseResponseHandle, LoadError> {
        self.replace(ImpulseResponse::new(channels, sample_rate)?)
    }

    /// Revert to the pass-through response
    pub fn clear(&self) -> std::result::Result<ImpulseResponseHandle, LoadError> {
        self.replace(ImpulseResponse::identity())
    }

    /// The active response; the identity response if nothing is loaded
    pub fn current(&self) -> ImpulseResponseHandle {
        self.shared.current.lock().clone()
    }

    fn replace(&self, response: ImpulseResponse) -> std::result::Result<ImpulseResponseHandle, LoadError> {
        let handle = Arc::new(response);
        let state = self.shared.target.lock();
        self.drain_retired();

        if let Some(target) = &state.target {
            let bundle = KernelBundle::build(handle.clone(), &self.shared.options, target)?;
            debug!(
                "Built kernel: {} segments of {} samples, generation {}",
                bundle.segment_count(),
                bundle.partition_size(),
                target.generation
            );
            self.publish(Box::new(bundle));
        }

        *self.shared.current.lock() = handle.clone();
        info!(
            "Impulse response active: {} channel(s), {} samples, {:.3}s",
            handle.num_channels(),
            handle.len(),
            handle.duration_secs()
        );
        Ok(handle)
    }

    fn publish(&self, bundle: Box<KernelBundle>) {
        // An unread bundle is stale now; free it here rather than on the audio thread
        while let Ok(stale) = self.shared.inbox_rx.try_recv() {
            debug!("Discarding unread kernel (generation {})", stale.generation());
        }
        match self.shared.inbox_tx.try_send(bundle) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                warn!("Kernel inbox unavailable; impulse response will apply on next prepare");
            }
        }
    }

    fn drain_retired(&self) {
        let mut freed = 0;
        while self.shared.retired_rx.try_recv().is_ok() {
            freed += 1;
        }
        if freed > 0 {
            debug!("Freed {} retired kernel(s)", freed);
        }
    }

    /// Record a new engine configuration and build its first bundle
    ///
    /// Bumps the generation so bundles built for the old configuration are
    /// discarded by the engine.
    pub(crate) fn prepare_target(
        &self,
        config: ProcessConfig,
        mode: LatencyMode,
    ) -> Result<Box<KernelBundle>> {
        let mut state = self.shared.target.lock();
        self.drain_retired();
        while self.shared.inbox_rx.try_recv().is_ok() {}

        let target = KernelTarget {
            config,
            mode,
            generation: state.generation + 1,
        };
        let bundle = KernelBundle::build(self.current(), &self.shared.options, &target)?;

        state.generation = target.generation;
        state.target = Some(target);
        Ok(Box::new(bundle))
    }

    /// Channel endpoints used by the engine on the audio thread
    pub(crate) fn engine_endpoints(&self) -> (Receiver<Box<KernelBundle>>, Sender<Box<KernelBundle>>) {
        (
            self.shared.inbox_rx.clone(),
            self.shared.retired_tx.clone(),
        )
    }
}

impl Default for ImpulseResponseStore {
    fn default() -> Self {
        Self::new(IrOptions::default())
    }
}
