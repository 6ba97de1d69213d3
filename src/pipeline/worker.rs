//! Background task that turns the latest input frame into the latest output

use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use tokio::task;
use tracing::{debug, instrument, warn};

use super::controller::{PipelineSlots, Shared};
use super::PipelineError;
use crate::capture::Frame;
use crate::transform::{Colormap, SharedTransformer, TransformError};

/// Latest output of the pipeline
#[derive(Debug, Clone)]
pub struct ProcessedResult {
    /// Encoded visualisation (JPEG data URL)
    pub payload: String,
    /// Colormap the result was rendered with
    pub variant: Colormap,
    /// Sequence number of the frame it was computed from
    pub source_sequence: u64,
    /// Wall time spent in transform + encode
    pub elapsed: Duration,
}

pub(crate) struct WorkerContext {
    pub(crate) run: u64,
    pub(crate) shared: Arc<Shared>,
    pub(crate) transformer: SharedTransformer,
    pub(crate) slots: Arc<PipelineSlots>,
    pub(crate) stop_rx: flume::Receiver<()>,
}

impl WorkerContext {
    /// A message or a closed channel both mean stop
    fn stop_requested(&self) -> bool {
        !matches!(self.stop_rx.try_recv(), Err(flume::TryRecvError::Empty))
    }

    /// Sleep for `duration` unless stopped first. Returns `true` on stop.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.stop_rx.recv_async() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}

#[instrument(name = "pipeline.worker", skip_all, fields(run = ctx.run))]
pub(crate) async fn run(ctx: WorkerContext) {
    let timing = ctx.shared.timing.clone();
    let counters = &ctx.shared.counters;
    let mut last_started: Option<Instant> = None;
    let mut consecutive_failures: u32 = 0;

    debug!("worker started");

    loop {
        if ctx.stop_requested() {
            break;
        }

        let Some(mut frame) = ctx.slots.input.try_take() else {
            if ctx.pause(timing.poll_interval()).await {
                break;
            }
            continue;
        };

        // Throttle: keep at least `process_interval` between transformation starts
        if let Some(wait) =
            last_started.and_then(|t| timing.process_interval().checked_sub(t.elapsed()))
        {
            if ctx.pause(wait).await {
                break;
            }
            if let Some(newer) = ctx.slots.input.try_take() {
                counters.input_dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("pipeline_frames_dropped_total").increment(1);
                frame = newer;
            }
        }

        last_started = Some(Instant::now());
        match transform_frame(&ctx, frame).await {
            Ok(result) => {
                consecutive_failures = 0;
                counters.transformed.fetch_add(1, Ordering::Relaxed);
                counters
                    .last_transform_us
                    .store(result.elapsed.as_micros() as u64, Ordering::Relaxed);
                metrics::histogram!("pipeline_transform_time_us")
                    .record(result.elapsed.as_micros() as f64);
                debug!(
                    sequence = result.source_sequence,
                    variant = %result.variant,
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    "result published"
                );

                if ctx.slots.output.put(result) {
                    counters.results_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                counters.failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("pipeline_transform_failures_total").increment(1);
                warn!(consecutive_failures, "frame skipped: {err}");

                if ctx.pause(timing.failure_backoff()).await {
                    break;
                }
            }
        }
    }

    debug!("worker exited");
}

async fn transform_frame(
    ctx: &WorkerContext,
    frame: Arc<Frame>,
) -> Result<ProcessedResult, PipelineError> {
    // Sampled once per call: a variant change applies from the next frame on.
    let variant = ctx.shared.current_variant();
    let transformer = ctx.transformer.clone();
    let codec = ctx.shared.codec.clone();
    let source_sequence = frame.sequence();
    debug!(
        sequence = source_sequence,
        queued_ms = frame.age().as_millis() as u64,
        %variant,
        "transforming frame"
    );
    let started = Instant::now();

    let payload = task::spawn_blocking(move || -> Result<String, PipelineError> {
        let image = {
            let mut backend = transformer.lock().unwrap_or_else(PoisonError::into_inner);
            backend.transform(&frame, variant)?
        };
        codec.encode(&image).map_err(PipelineError::Encode)
    })
    .await
    .map_err(|_| TransformError::Panicked)??;

    Ok(ProcessedResult {
        payload,
        variant,
        source_sequence,
        elapsed: started.elapsed(),
    })
}
