pub mod codec;
pub mod frame;
#[cfg(feature = "v4l2-capture")]
pub mod v4l2;

pub use codec::{decode_image, CodecError, DataUrlCodec, FrameCodec};
pub use frame::{Frame, FrameMetadata, PixelFormat};
#[cfg(feature = "v4l2-capture")]
pub use v4l2::{auto_detect_device, CameraFeed, V4l2Capture};
