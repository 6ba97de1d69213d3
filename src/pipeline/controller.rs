//! Lifecycle owner of the frame pipeline: start/stop, frame intake, result
//! polling, variant rotation and status.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::slot::{FrameSlot, SlotStats};
use super::variant::VariantSelector;
use super::worker::{self, ProcessedResult, WorkerContext};
use super::PipelineError;
use crate::capture::{decode_image, DataUrlCodec, Frame, FrameCodec};
use crate::transform::{self, Colormap, SharedTransformer, Transformer};
use crate::{Config, ConfigError, PipelineConfig};

/// Input and output legs of one pipeline run
#[derive(Default)]
pub struct PipelineSlots {
    pub input: FrameSlot<Frame>,
    pub output: FrameSlot<ProcessedResult>,
}

impl PipelineSlots {
    fn clear(&self) {
        self.input.clear();
        self.output.clear();
    }
}

/// Transformation capability fixed at construction
pub enum Backend {
    Ready(SharedTransformer),
    /// No transformer could be built; `start` always fails
    Unavailable(String),
}

impl Backend {
    pub fn ready(transformer: impl Transformer) -> Self {
        Backend::Ready(transform::shared(transformer))
    }
}

enum State {
    Stopped,
    Running(Running),
}

struct Running {
    run: u64,
    slots: Arc<PipelineSlots>,
    /// Dropped to signal the worker
    stop_tx: flume::Sender<()>,
    handle: JoinHandle<()>,
}

struct Inner {
    state: State,
    variants: VariantSelector,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) submitted: AtomicU64,
    pub(crate) input_dropped: AtomicU64,
    pub(crate) transformed: AtomicU64,
    pub(crate) failures: AtomicU64,
    pub(crate) results_dropped: AtomicU64,
    pub(crate) workers_started: AtomicU64,
    pub(crate) last_transform_us: AtomicU64,
}

pub(crate) struct Shared {
    inner: Mutex<Inner>,
    backend: Backend,
    pub(crate) codec: Arc<dyn FrameCodec>,
    pub(crate) timing: PipelineConfig,
    next_sequence: AtomicU64,
    pub(crate) counters: Counters,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn current_variant(&self) -> Colormap {
        self.lock().variants.current()
    }

    fn running_slots(&self) -> Option<Arc<PipelineSlots>> {
        match &self.lock().state {
            State::Running(running) => Some(running.slots.clone()),
            State::Stopped => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Started {
    /// 1-based count of workers spawned by this controller
    pub run: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stopped {
    /// Worker exited within the stop timeout
    Graceful,
    /// Worker did not exit in time and was aborted
    Abandoned(Duration),
}

impl Stopped {
    pub fn timeout_warning(&self) -> Option<PipelineError> {
        match self {
            Stopped::Graceful => None,
            Stopped::Abandoned(limit) => Some(PipelineError::ShutdownTimeout(*limit)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub sequence: u64,
    /// An earlier frame was still waiting and got discarded
    pub replaced: bool,
}

#[derive(Debug, Clone)]
pub enum ResultStatus {
    Ready(Arc<ProcessedResult>),
    /// Running, but no unread result yet
    Processing,
    NotRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantChange {
    pub variant: Colormap,
    pub index: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub frames_submitted: u64,
    /// Input frames overwritten before the worker took them
    pub frames_dropped: u64,
    pub frames_transformed: u64,
    pub transform_failures: u64,
    /// Results overwritten before anyone polled them
    pub results_dropped: u64,
    pub workers_started: u64,
    pub last_transform_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_slot: Option<SlotStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_slot: Option<SlotStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub available: bool,
    #[serde(rename = "enabled")]
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unavailable_reason: Option<String>,
    pub variant: &'static str,
    pub variant_index: usize,
    pub variant_list: Vec<&'static str>,
    pub stats: PipelineStats,
}

/// Owns the pipeline state machine.
///
/// `Stopped --start()--> Running --stop()--> Stopped`. Every `start` gets
/// fresh slots and a fresh worker task; the transformer itself is shared
/// between runs behind a mutex, so an aborted worker that is still inside a
/// transformation delays the next run's first transformation instead of
/// running concurrently with it.
pub struct PipelineController {
    shared: Arc<Shared>,
}

impl PipelineController {
    pub fn new(
        backend: Backend,
        codec: Arc<dyn FrameCodec>,
        variants: VariantSelector,
        timing: PipelineConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: State::Stopped,
                    variants,
                }),
                backend,
                codec,
                timing,
                next_sequence: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        }
    }

    /// Build the controller described by `config`. A transformer that fails
    /// to load leaves the controller unavailable rather than failing here.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let variants = VariantSelector::new(config.transform.colormaps()?)
            .ok_or_else(|| ConfigError::Invalid("transform.variants is empty".into()))?;

        let backend = match transform::load(&config.transform) {
            Ok(transformer) => {
                info!(backend = transformer.name(), "transformer loaded");
                Backend::Ready(Arc::new(Mutex::new(transformer)))
            }
            Err(err) => {
                warn!("frame pipeline disabled: {err}");
                Backend::Unavailable(err.to_string())
            }
        };

        Ok(Self::new(
            backend,
            Arc::new(DataUrlCodec::new(config.codec.jpeg_quality)),
            variants,
            config.pipeline.clone(),
        ))
    }

    pub fn is_available(&self) -> bool {
        matches!(self.shared.backend, Backend::Ready(_))
    }

    pub fn is_running(&self) -> bool {
        matches!(self.shared.lock().state, State::Running(_))
    }

    /// Slots of the current run, if any
    pub fn slots(&self) -> Option<Arc<PipelineSlots>> {
        self.shared.running_slots()
    }

    /// Spawn a worker on the current tokio runtime
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<Started, PipelineError> {
        let transformer = match &self.shared.backend {
            Backend::Ready(transformer) => transformer.clone(),
            Backend::Unavailable(reason) => return Err(PipelineError::Unavailable(reason.clone())),
        };
        let runtime = Handle::try_current()
            .map_err(|e| PipelineError::Unavailable(format!("no async runtime: {e}")))?;

        let mut inner = self.shared.lock();
        if matches!(inner.state, State::Running(_)) {
            return Err(PipelineError::AlreadyRunning);
        }

        let run = self
            .shared
            .counters
            .workers_started
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        let slots = Arc::new(PipelineSlots::default());
        let (stop_tx, stop_rx) = flume::bounded(1);

        let handle = runtime.spawn(worker::run(WorkerContext {
            run,
            shared: self.shared.clone(),
            transformer,
            slots: slots.clone(),
            stop_rx,
        }));

        inner.state = State::Running(Running {
            run,
            slots,
            stop_tx,
            handle,
        });
        info!(run, variant = %inner.variants.current(), "pipeline started");

        Ok(Started { run })
    }

    /// Signal the worker, discard pending frames and results, and wait up to
    /// the configured stop timeout for the worker to exit.
    ///
    /// The controller is `Stopped` as soon as this is called; a worker that
    /// overruns the timeout is aborted and reported as [`Stopped::Abandoned`].
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<Stopped, PipelineError> {
        let Running {
            run,
            slots,
            stop_tx,
            mut handle,
        } = {
            let mut inner = self.shared.lock();
            match mem::replace(&mut inner.state, State::Stopped) {
                State::Running(running) => running,
                State::Stopped => return Err(PipelineError::NotRunning),
            }
        };

        drop(stop_tx);
        slots.clear();

        let limit = self.shared.timing.stop_timeout();
        let outcome = match tokio::time::timeout(limit, &mut handle).await {
            Ok(Ok(())) => Stopped::Graceful,
            Ok(Err(join_err)) => {
                warn!(run, "worker ended abnormally: {join_err}");
                Stopped::Graceful
            }
            Err(_) => {
                handle.abort();
                warn!(run, "{}", PipelineError::ShutdownTimeout(limit));
                Stopped::Abandoned(limit)
            }
        };

        // A result may have landed between the first clear and the join.
        slots.clear();
        info!(run, ?outcome, "pipeline stopped");

        Ok(outcome)
    }

    /// Decode a base64 / data-URL frame and hand it to the worker
    pub fn submit_frame(&self, encoded: &str) -> Result<Accepted, PipelineError> {
        let slots = self.shared.running_slots().ok_or(PipelineError::NotRunning)?;
        let frame = self.shared.codec.decode(encoded, self.next_sequence())?;
        Ok(self.enqueue(&slots, frame))
    }

    /// Like [`submit_frame`](Self::submit_frame) for raw JPEG/PNG bytes
    pub fn submit_image(&self, data: &[u8]) -> Result<Accepted, PipelineError> {
        let slots = self.shared.running_slots().ok_or(PipelineError::NotRunning)?;
        let frame = decode_image(data, self.next_sequence())?;
        Ok(self.enqueue(&slots, frame))
    }

    fn next_sequence(&self) -> u64 {
        self.shared.next_sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn enqueue(&self, slots: &PipelineSlots, frame: Frame) -> Accepted {
        let sequence = frame.sequence();
        let replaced = slots.input.put(frame);

        let counters = &self.shared.counters;
        counters.submitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("pipeline_frames_submitted_total").increment(1);
        if replaced {
            counters.input_dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("pipeline_frames_dropped_total").increment(1);
        }

        debug!(sequence, replaced, "frame queued");
        Accepted { sequence, replaced }
    }

    /// Take the latest unread result without waiting
    pub fn poll_result(&self) -> ResultStatus {
        match self.shared.running_slots() {
            None => ResultStatus::NotRunning,
            Some(slots) => match slots.output.try_take() {
                Some(result) => ResultStatus::Ready(result),
                None => ResultStatus::Processing,
            },
        }
    }

    /// Rotate to the next colormap. Takes effect from the next transformation.
    pub fn next_variant(&self) -> VariantChange {
        let mut inner = self.shared.lock();
        let variant = inner.variants.advance();
        let index = inner.variants.index();
        info!(%variant, index, "variant changed");

        VariantChange { variant, index }
    }

    /// Drop any pending frame and unread result while keeping the worker
    pub fn reset(&self) -> Result<(), PipelineError> {
        let slots = self.shared.running_slots().ok_or(PipelineError::NotRunning)?;
        slots.clear();
        debug!("pipeline slots cleared");
        Ok(())
    }

    pub fn status(&self) -> PipelineStatus {
        let inner = self.shared.lock();
        let slots = match &inner.state {
            State::Running(running) => Some(running.slots.clone()),
            State::Stopped => None,
        };
        let counters = &self.shared.counters;

        let stats = PipelineStats {
            frames_submitted: counters.submitted.load(Ordering::Relaxed),
            frames_dropped: counters.input_dropped.load(Ordering::Relaxed),
            frames_transformed: counters.transformed.load(Ordering::Relaxed),
            transform_failures: counters.failures.load(Ordering::Relaxed),
            results_dropped: counters.results_dropped.load(Ordering::Relaxed),
            workers_started: counters.workers_started.load(Ordering::Relaxed),
            last_transform_ms: counters.last_transform_us.load(Ordering::Relaxed) as f64 / 1000.0,
            input_slot: slots.as_ref().map(|s| s.input.stats()),
            output_slot: slots.as_ref().map(|s| s.output.stats()),
        };

        PipelineStatus {
            available: self.is_available(),
            running: slots.is_some(),
            unavailable_reason: match &self.shared.backend {
                Backend::Ready(_) => None,
                Backend::Unavailable(reason) => Some(reason.clone()),
            },
            variant: inner.variants.current().name(),
            variant_index: inner.variants.index(),
            variant_list: inner.variants.names(),
            stats,
        }
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        // The worker holds a reference to `Shared`; closing the stop channel
        // is what lets it go.
        if let State::Running(running) = mem::replace(&mut inner.state, State::Stopped) {
            debug!(run = running.run, "controller dropped while running");
            drop(running.stop_tx);
            running.slots.clear();
        }
    }
}
