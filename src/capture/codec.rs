//! Wire codec: base64 / data-URL images in, JPEG data URLs out

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::debug;

use super::frame::{Frame, PixelFormat};

const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("empty frame payload")]
    Empty,

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("JPEG decode failed: {0}")]
    Jpeg(String),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("decoded image has unusable geometry {width}x{height}")]
    Geometry { width: u32, height: u32 },
}

/// Converts between the transport representation of a frame and the
/// in-process [`Frame`].
pub trait FrameCodec: Send + Sync + 'static {
    fn decode(&self, encoded: &str, sequence: u64) -> Result<Frame, CodecError>;

    fn encode(&self, image: &RgbImage) -> Result<String, CodecError>;
}

/// Accepts raw base64 or `data:image/...;base64,` URLs and produces JPEG
/// data URLs.
#[derive(Debug, Clone)]
pub struct DataUrlCodec {
    jpeg_quality: u8,
}

impl DataUrlCodec {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }
}

impl Default for DataUrlCodec {
    fn default() -> Self {
        Self::new(80)
    }
}

impl FrameCodec for DataUrlCodec {
    fn decode(&self, encoded: &str, sequence: u64) -> Result<Frame, CodecError> {
        let payload = strip_data_url(encoded);
        if payload.is_empty() {
            return Err(CodecError::Empty);
        }

        let bytes = STANDARD.decode(payload)?;
        decode_image(&bytes, sequence)
    }

    fn encode(&self, image: &RgbImage) -> Result<String, CodecError> {
        let mut buf = Vec::with_capacity(image.as_raw().len() / 8);
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, self.jpeg_quality);
        encoder.encode_image(image)?;

        let mut out = String::with_capacity(JPEG_DATA_URL_PREFIX.len() + buf.len() * 4 / 3 + 4);
        out.push_str(JPEG_DATA_URL_PREFIX);
        STANDARD.encode_string(&buf, &mut out);
        Ok(out)
    }
}

/// Drop a `data:<mime>;base64,` prefix if present
fn strip_data_url(encoded: &str) -> &str {
    let trimmed = encoded.trim();
    if trimmed.starts_with("data:") {
        match trimmed.split_once(',') {
            Some((_, payload)) => payload,
            None => "",
        }
    } else {
        trimmed
    }
}

/// Decode compressed image bytes (JPEG or PNG) into an RGB24 frame
pub fn decode_image(data: &[u8], sequence: u64) -> Result<Frame, CodecError> {
    if data.is_empty() {
        return Err(CodecError::Empty);
    }

    // JPEG fast path, falls back to the generic decoder for anything zune
    // cannot hand back as packed RGB.
    if data.starts_with(&[0xFF, 0xD8]) {
        if let Some(frame) = decode_jpeg(data, sequence)? {
            return Ok(frame);
        }
    }

    let format = image::guess_format(data)?;
    let source_format = match format {
        ImageFormat::Png => PixelFormat::Png,
        ImageFormat::Jpeg => PixelFormat::Mjpeg,
        _ => PixelFormat::Rgb24,
    };

    let image = image::load_from_memory_with_format(data, format)?.to_rgb8();
    let (width, height) = image.dimensions();
    Frame::from_image(image, sequence, source_format)
        .ok_or(CodecError::Geometry { width, height })
}

fn decode_jpeg(data: &[u8], sequence: u64) -> Result<Option<Frame>, CodecError> {
    let mut decoder = zune_jpeg::JpegDecoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| CodecError::Jpeg(format!("{e:?}")))?;

    let Some((width, height)) = decoder.dimensions() else {
        return Err(CodecError::Jpeg("decoder reported no dimensions".into()));
    };

    let frame = Frame::from_rgb(
        pixels,
        width as u32,
        height as u32,
        sequence,
        PixelFormat::Mjpeg,
    );
    if frame.is_none() {
        debug!(width, height, "JPEG output is not packed RGB, using generic decoder");
    }
    Ok(frame)
}
