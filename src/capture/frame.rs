use bytes::Bytes;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decoded frame with zero-copy semantics
#[derive(Clone)]
pub struct Frame {
    /// Immutable RGB24 pixel data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Arrival timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    /// Format the frame arrived in before decoding
    pub source_format: PixelFormat,
}

/// Pixel formats a frame can arrive in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Mjpeg,
    Png,
}

impl Frame {
    /// Wrap decoded RGB24 pixels. Returns `None` when the buffer does not
    /// match `width * height * 3`.
    pub fn from_rgb(
        data: impl Into<Bytes>,
        width: u32,
        height: u32,
        sequence: u64,
        source_format: PixelFormat,
    ) -> Option<Self> {
        let data = data.into();
        if width == 0 || height == 0 || data.len() != (width as usize) * (height as usize) * 3 {
            return None;
        }

        Some(Self {
            data,
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride: width * 3,
                source_format,
            }),
            timestamp: Instant::now(),
        })
    }

    pub fn from_image(image: RgbImage, sequence: u64, source_format: PixelFormat) -> Option<Self> {
        let (width, height) = image.dimensions();
        Self::from_rgb(image.into_raw(), width, height, sequence, source_format)
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.meta.width, self.meta.height)
    }

    /// Time since the frame was decoded
    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }

    /// Copy the pixels into an owned image buffer
    pub fn to_image(&self) -> RgbImage {
        // Length was validated at construction, so from_raw cannot fail here.
        RgbImage::from_raw(self.meta.width, self.meta.height, self.data.to_vec())
            .unwrap_or_else(|| RgbImage::new(self.meta.width, self.meta.height))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("width", &self.meta.width)
            .field("height", &self.meta.height)
            .field("source_format", &self.meta.source_format)
            .finish()
    }
}
