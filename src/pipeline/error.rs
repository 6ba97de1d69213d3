use std::time::Duration;

use thiserror::Error;

use crate::capture::CodecError;
use crate::transform::TransformError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("pipeline is not running")]
    NotRunning,

    #[error("failed to decode frame: {0}")]
    Decode(#[from] CodecError),

    #[error("failed to encode result: {0}")]
    Encode(#[source] CodecError),

    #[error("transformation failed: {0}")]
    TransformFailure(#[from] TransformError),

    #[error("worker did not exit within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("pipeline unavailable: {0}")]
    Unavailable(String),
}

impl PipelineError {
    /// Errors caused by calling an operation in the wrong lifecycle state
    pub fn is_state_error(&self) -> bool {
        matches!(self, PipelineError::AlreadyRunning | PipelineError::NotRunning)
    }
}
