//! Local V4L2 camera as a frame source for the pipeline

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::pipeline::{PipelineController, PipelineError};
use crate::CaptureConfig;

const MJPEG: [u8; 4] = *b"MJPG";

/// Auto-detect the first capture device that can stream MJPEG
pub fn auto_detect_device() -> Result<String> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{i}");
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            continue;
        }

        if let Ok(formats) = dev.enum_formats() {
            if formats.iter().any(|fmt| fmt.fourcc == FourCC::new(&MJPEG)) {
                info!("Found MJPEG device: {} - {}", path, caps.card);
                return Ok(path);
            }
        }
    }

    Err(eyre!("No MJPEG capture device found"))
}

/// MJPEG capture from a memory-mapped V4L2 stream
pub struct V4l2Capture {
    device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    config: CaptureConfig,
}

impl V4l2Capture {
    pub fn new(config: CaptureConfig) -> Result<Self> {
        info!("Initializing V4L2 capture: {:?}", config.device);

        let device = Device::with_path(&config.device)?;
        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(eyre!("Device doesn't support video capture"));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = FourCC::new(&MJPEG);
        let fmt = device.set_format(&fmt)?;
        if fmt.fourcc != FourCC::new(&MJPEG) {
            return Err(eyre!("Device refused MJPEG, offered {}", fmt.fourcc));
        }
        if fmt.width != config.width || fmt.height != config.height {
            warn!(
                width = fmt.width,
                height = fmt.height,
                "device adjusted the requested resolution"
            );
        }

        if let Err(e) = device.set_params(&Parameters::with_fps(config.fps)) {
            warn!("Could not set frame rate to {}: {}", config.fps, e);
        }

        Ok(Self {
            device: Box::new(device),
            stream: None,
            config,
        })
    }

    pub fn start_stream(&mut self) -> Result<()> {
        let stream =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.config.buffer_count)?;

        self.stream = Some(stream);
        info!(
            "Capture stream started with {} buffers",
            self.config.buffer_count
        );
        Ok(())
    }

    /// Block until the next compressed frame is available
    #[instrument(level = "trace", skip(self))]
    pub fn next_jpeg(&mut self) -> Result<Bytes> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| eyre!("Stream not started"))?;

        let (buf, meta) = stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        Ok(Bytes::copy_from_slice(&buf[..used]))
    }
}

/// Background thread pushing camera frames into a running pipeline.
///
/// Frames captured while the pipeline is stopped are discarded.
pub struct CameraFeed {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CameraFeed {
    /// Open the device (auto-detected when `config.device` is empty) and
    /// start feeding `controller`. Returns once the stream is up.
    pub fn spawn(mut config: CaptureConfig, controller: Arc<PipelineController>) -> Result<Self> {
        if config.device.is_empty() {
            config.device = auto_detect_device()?;
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = flume::bounded::<Result<()>>(1);

        let flag = shutdown.clone();
        let handle = thread::Builder::new()
            .name("camera-feed".into())
            .spawn(move || {
                let mut capture = match V4l2Capture::new(config).and_then(|mut c| {
                    c.start_stream()?;
                    Ok(c)
                }) {
                    Ok(capture) => {
                        let _ = ready_tx.send(Ok(()));
                        capture
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                feed_loop(&mut capture, &controller, &flag);
            })?;

        ready_rx
            .recv()
            .map_err(|_| eyre!("camera thread exited during startup"))??;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("camera thread panicked");
            }
        }
    }
}

impl Drop for CameraFeed {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

fn feed_loop(capture: &mut V4l2Capture, controller: &PipelineController, shutdown: &AtomicBool) {
    let mut submitted = 0u64;

    while !shutdown.load(Ordering::Relaxed) {
        let jpeg = match capture.next_jpeg() {
            Ok(jpeg) => jpeg,
            Err(e) => {
                warn!("Capture error: {}", e);
                thread::sleep(Duration::from_millis(10));
                continue;
            }
        };

        match controller.submit_image(&jpeg) {
            Ok(accepted) => {
                submitted += 1;
                if submitted % 300 == 0 {
                    debug!(sequence = accepted.sequence, submitted, "camera feed alive");
                }
            }
            Err(PipelineError::NotRunning) => {}
            Err(e) => warn!("Dropping camera frame: {}", e),
        }
    }

    info!(submitted, "camera feed stopped");
}
