// Pipeline controller tests
// Lifecycle, latest-wins delivery, failure recovery and shutdown behaviour

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, Rgb, RgbImage};

use nautilus::capture::{DataUrlCodec, Frame};
use nautilus::pipeline::{
    Backend, PipelineController, PipelineError, ProcessedResult, ResultStatus, Stopped,
    VariantSelector,
};
use nautilus::transform::{Colormap, Passthrough, TransformError, Transformer, TransformerKind};
use nautilus::{Config, PipelineConfig};

fn fast_timing() -> PipelineConfig {
    PipelineConfig {
        poll_interval_ms: 10,
        process_interval_ms: 10,
        stop_timeout_ms: 500,
        failure_backoff_ms: 5,
    }
}

fn controller_with(backend: Backend, timing: PipelineConfig) -> PipelineController {
    PipelineController::new(
        backend,
        Arc::new(DataUrlCodec::default()),
        VariantSelector::default(),
        timing,
    )
}

/// Base64 PNG whose pixels all carry `value`
fn encoded_frame(value: u8) -> String {
    let image = RgbImage::from_pixel(4, 4, Rgb([value, value, value]));
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png).unwrap();
    STANDARD.encode(buf.into_inner())
}

async fn wait_for_result(controller: &PipelineController) -> Arc<ProcessedResult> {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        match controller.poll_result() {
            ResultStatus::Ready(result) => return result,
            ResultStatus::Processing => {}
            ResultStatus::NotRunning => panic!("pipeline stopped while waiting for a result"),
        }
        assert!(Instant::now() < deadline, "timed out waiting for a result");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Records the pixel value and variant of every frame it sees
#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<(u8, Colormap)>>>,
}

impl Transformer for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn transform(&mut self, frame: &Frame, variant: Colormap) -> Result<RgbImage, TransformError> {
        self.seen.lock().unwrap().push((frame.data[0], variant));
        Ok(frame.to_image())
    }
}

struct AlwaysFails {
    calls: Arc<AtomicUsize>,
}

impl Transformer for AlwaysFails {
    fn name(&self) -> &str {
        "always-fails"
    }

    fn transform(&mut self, _frame: &Frame, _variant: Colormap) -> Result<RgbImage, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TransformError::Backend("model exploded".into()))
    }
}

/// Blocks for `delay` on every call
struct Slow {
    delay: Duration,
    entered: Arc<AtomicBool>,
}

impl Transformer for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    fn transform(&mut self, frame: &Frame, _variant: Colormap) -> Result<RgbImage, TransformError> {
        self.entered.store(true, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(frame.to_image())
    }
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let controller = controller_with(Backend::ready(Passthrough), fast_timing());

    let started = controller.start().unwrap();
    assert_eq!(started.run, 1);
    assert!(matches!(controller.start(), Err(PipelineError::AlreadyRunning)));

    let status = controller.status();
    assert!(status.running);
    assert_eq!(status.stats.workers_started, 1);

    assert_eq!(controller.stop().await.unwrap(), Stopped::Graceful);
}

#[tokio::test]
async fn test_stop_when_stopped_has_no_effect() {
    let controller = controller_with(Backend::ready(Passthrough), fast_timing());

    assert!(matches!(controller.stop().await, Err(PipelineError::NotRunning)));
    let status = controller.status();
    assert!(!status.running);
    assert_eq!(status.stats.workers_started, 0);
}

#[tokio::test]
async fn test_stop_empties_both_slots() {
    let controller = controller_with(Backend::ready(Passthrough), fast_timing());
    controller.start().unwrap();

    let slots = controller.slots().unwrap();
    controller.submit_frame(&encoded_frame(10)).unwrap();
    slots.output.put(ProcessedResult {
        payload: "stale".into(),
        variant: Colormap::Jet,
        source_sequence: 0,
        elapsed: Duration::ZERO,
    });
    assert!(!slots.input.is_empty());

    assert_eq!(controller.stop().await.unwrap(), Stopped::Graceful);

    assert!(slots.input.is_empty());
    assert!(slots.output.is_empty());
    assert!(!controller.status().running);
    assert!(controller.slots().is_none());
    assert!(matches!(controller.poll_result(), ResultStatus::NotRunning));
}

#[test]
fn test_variant_cycle_returns_to_start() {
    let controller = controller_with(Backend::ready(Passthrough), fast_timing());
    let status = controller.status();
    assert_eq!(status.variant, "Plasma");

    let count = status.variant_list.len();
    let mut last = None;
    for _ in 0..count {
        last = Some(controller.next_variant());
    }

    let last = last.unwrap();
    assert_eq!(last.variant, Colormap::Plasma);
    assert_eq!(last.index, 0);
    assert_eq!(controller.status().variant_index, 0);
}

#[tokio::test]
async fn test_submit_requires_running_pipeline() {
    let controller = controller_with(Backend::ready(Passthrough), fast_timing());
    assert!(matches!(
        controller.submit_frame(&encoded_frame(1)),
        Err(PipelineError::NotRunning)
    ));
    assert!(matches!(controller.reset(), Err(PipelineError::NotRunning)));

    controller.start().unwrap();
    assert!(matches!(
        controller.submit_frame("definitely not base64!"),
        Err(PipelineError::Decode(_))
    ));
    controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_first_poll_is_processing_then_ready() {
    let controller = controller_with(Backend::ready(Passthrough), fast_timing());
    controller.start().unwrap();

    let accepted = controller.submit_frame(&encoded_frame(42)).unwrap();
    assert!(!accepted.replaced);
    assert!(matches!(controller.poll_result(), ResultStatus::Processing));

    let result = wait_for_result(&controller).await;
    assert_eq!(result.source_sequence, accepted.sequence);
    assert!(result.payload.starts_with("data:image/jpeg;base64,"));
    assert_eq!(result.variant, Colormap::Plasma);

    // Consumed, nothing new submitted since
    assert!(matches!(controller.poll_result(), ResultStatus::Processing));
    controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_newer_frame_replaces_pending_one() {
    let recorder = Recorder::default();
    let controller = controller_with(Backend::ready(recorder.clone()), fast_timing());
    controller.start().unwrap();

    // No await in between, so the worker has not run yet
    let first = controller.submit_frame(&encoded_frame(1)).unwrap();
    let second = controller.submit_frame(&encoded_frame(2)).unwrap();
    assert!(!first.replaced);
    assert!(second.replaced);

    let result = wait_for_result(&controller).await;
    assert_eq!(result.source_sequence, second.sequence);

    let seen = recorder.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![(2, Colormap::Plasma)]);
    assert_eq!(controller.status().stats.frames_dropped, 1);

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_variant_change_applies_to_next_frame() {
    let recorder = Recorder::default();
    let controller = controller_with(Backend::ready(recorder.clone()), fast_timing());
    controller.start().unwrap();

    controller.submit_frame(&encoded_frame(5)).unwrap();
    assert_eq!(wait_for_result(&controller).await.variant, Colormap::Plasma);

    let change = controller.next_variant();
    assert_eq!(change.variant, Colormap::Viridis);

    controller.submit_frame(&encoded_frame(6)).unwrap();
    assert_eq!(wait_for_result(&controller).await.variant, Colormap::Viridis);

    let seen = recorder.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![(5, Colormap::Plasma), (6, Colormap::Viridis)]);
    controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_worker_survives_repeated_failures() {
    let calls = Arc::new(AtomicUsize::new(0));
    let controller = controller_with(
        Backend::ready(AlwaysFails {
            calls: calls.clone(),
        }),
        fast_timing(),
    );
    controller.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while controller.status().stats.transform_failures < 10 {
        assert!(Instant::now() < deadline, "worker stalled");
        controller.submit_frame(&encoded_frame(9)).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(controller.is_running());
    assert!(calls.load(Ordering::SeqCst) >= 10);
    assert!(controller.submit_frame(&encoded_frame(9)).is_ok());
    assert!(matches!(controller.poll_result(), ResultStatus::Processing));

    assert_eq!(controller.stop().await.unwrap(), Stopped::Graceful);
}

#[tokio::test]
async fn test_reset_discards_pending_frame() {
    let controller = controller_with(Backend::ready(Passthrough), fast_timing());
    controller.start().unwrap();

    let slots = controller.slots().unwrap();
    controller.submit_frame(&encoded_frame(3)).unwrap();
    controller.reset().unwrap();

    assert!(slots.input.is_empty());
    assert!(controller.is_running());
    controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_timeout_abandons_worker_and_allows_restart() {
    let entered = Arc::new(AtomicBool::new(false));
    let timing = PipelineConfig {
        stop_timeout_ms: 50,
        ..fast_timing()
    };
    let controller = controller_with(
        Backend::ready(Slow {
            delay: Duration::from_millis(300),
            entered: entered.clone(),
        }),
        timing,
    );

    controller.start().unwrap();
    controller.submit_frame(&encoded_frame(7)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while !entered.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "transform never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let stopped = controller.stop().await.unwrap();
    assert_eq!(stopped, Stopped::Abandoned(Duration::from_millis(50)));
    assert!(matches!(
        stopped.timeout_warning(),
        Some(PipelineError::ShutdownTimeout(_))
    ));
    assert!(!controller.status().running);

    let restarted = controller.start().unwrap();
    assert_eq!(restarted.run, 2);

    let accepted = controller.submit_frame(&encoded_frame(8)).unwrap();
    let result = wait_for_result(&controller).await;
    assert_eq!(result.source_sequence, accepted.sequence);
}

#[tokio::test]
async fn test_unavailable_backend_refuses_start() {
    let controller = controller_with(Backend::Unavailable("no model".into()), fast_timing());

    assert!(matches!(controller.start(), Err(PipelineError::Unavailable(_))));

    let status = controller.status();
    assert!(!status.available);
    assert!(!status.running);
    assert_eq!(status.unavailable_reason.as_deref(), Some("no model"));
}

#[test]
fn test_from_config_without_transformer_is_unavailable() {
    let mut config = Config::default();
    config.transform.kind = TransformerKind::None;

    let controller = PipelineController::from_config(&config).unwrap();
    assert!(!controller.is_available());
    assert!(matches!(controller.start(), Err(PipelineError::Unavailable(_))));
}

#[test]
fn test_from_config_uses_configured_variants() {
    let mut config = Config::default();
    config.transform.variants = vec!["Hot".into(), "Cool".into()];

    let controller = PipelineController::from_config(&config).unwrap();
    let status = controller.status();
    assert!(status.available);
    assert_eq!(status.variant_list, vec!["Hot", "Cool"]);
    assert_eq!(controller.next_variant().variant, Colormap::Cool);
}

/// Records when each call started
#[derive(Clone, Default)]
struct StartTimes {
    starts: Arc<Mutex<Vec<Instant>>>,
}

impl Transformer for StartTimes {
    fn name(&self) -> &str {
        "start-times"
    }

    fn transform(&mut self, frame: &Frame, _variant: Colormap) -> Result<RgbImage, TransformError> {
        self.starts.lock().unwrap().push(Instant::now());
        Ok(frame.to_image())
    }
}

/// Succeeds on the first call, fails on every later one
struct FailAfterFirst {
    calls: Arc<AtomicUsize>,
}

impl Transformer for FailAfterFirst {
    fn name(&self) -> &str {
        "fail-after-first"
    }

    fn transform(&mut self, frame: &Frame, _variant: Colormap) -> Result<RgbImage, TransformError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(frame.to_image())
        } else {
            Err(TransformError::Backend("second call fails".into()))
        }
    }
}

#[tokio::test]
async fn test_transformations_respect_minimum_interval() {
    let recorder = StartTimes::default();
    let timing = PipelineConfig {
        process_interval_ms: 200,
        ..fast_timing()
    };
    let controller = controller_with(Backend::ready(recorder.clone()), timing);
    controller.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        controller.submit_frame(&encoded_frame(4)).unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    controller.stop().await.unwrap();

    let starts = recorder.starts.lock().unwrap().clone();
    assert!(starts.len() >= 3, "only {} transformations ran", starts.len());
    assert!(starts.len() <= 6, "{} transformations in 1s", starts.len());

    // Measured inside the blocking call, so allow for thread hand-off jitter
    for pair in starts.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_millis(195), "gap of {gap:?}");
    }
}

#[tokio::test]
async fn test_frame_arriving_during_pacing_wait_is_used() {
    let recorder = Recorder::default();
    let timing = PipelineConfig {
        poll_interval_ms: 5,
        process_interval_ms: 300,
        ..fast_timing()
    };
    let controller = controller_with(Backend::ready(recorder.clone()), timing);
    controller.start().unwrap();

    controller.submit_frame(&encoded_frame(1)).unwrap();
    wait_for_result(&controller).await;

    // The worker takes this one, then waits out the interval
    controller.submit_frame(&encoded_frame(2)).unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    let slots = controller.slots().unwrap();
    assert!(slots.input.is_empty(), "worker did not pick up the frame");

    let newest = controller.submit_frame(&encoded_frame(3)).unwrap();
    assert!(!newest.replaced);

    let result = wait_for_result(&controller).await;
    assert_eq!(result.source_sequence, newest.sequence);

    let seen: Vec<u8> = recorder.seen.lock().unwrap().iter().map(|(v, _)| *v).collect();
    assert_eq!(seen, vec![1, 3]);
    assert_eq!(controller.status().stats.frames_dropped, 1);

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_cycle_keeps_previous_result() {
    let calls = Arc::new(AtomicUsize::new(0));
    let controller = controller_with(
        Backend::ready(FailAfterFirst {
            calls: calls.clone(),
        }),
        fast_timing(),
    );
    controller.start().unwrap();
    let slots = controller.slots().unwrap();

    let first = controller.submit_frame(&encoded_frame(1)).unwrap();
    let deadline = Instant::now() + Duration::from_secs(3);
    while slots.output.is_empty() {
        assert!(Instant::now() < deadline, "first result never published");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    controller.submit_frame(&encoded_frame(2)).unwrap();
    while controller.status().stats.transform_failures == 0 {
        assert!(Instant::now() < deadline, "second call never failed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    match controller.poll_result() {
        ResultStatus::Ready(result) => assert_eq!(result.source_sequence, first.sequence),
        other => panic!("expected the first result to survive, got {other:?}"),
    }

    controller.stop().await.unwrap();
}
