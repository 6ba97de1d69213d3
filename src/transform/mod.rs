//! Per-frame transformations run by the pipeline worker

pub mod colormap;
pub mod depth;

use std::sync::{Arc, Mutex};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::Frame;
use crate::TransformConfig;

pub use colormap::Colormap;
pub use depth::{Passthrough, PseudoDepth};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("transformer unavailable: {0}")]
    Unavailable(String),

    #[error("inference backend failed: {0}")]
    Backend(String),

    #[error("transformation task panicked")]
    Panicked,
}

/// A possibly slow function from a decoded frame to a visualisation.
///
/// Implementations are not required to be reentrant; the pipeline holds them
/// behind a [`SharedTransformer`] and runs at most one call at a time.
pub trait Transformer: Send + 'static {
    fn name(&self) -> &str;

    fn transform(&mut self, frame: &Frame, variant: Colormap) -> Result<RgbImage, TransformError>;
}

pub type SharedTransformer = Arc<Mutex<Box<dyn Transformer>>>;

pub fn shared(transformer: impl Transformer) -> SharedTransformer {
    let boxed: Box<dyn Transformer> = Box::new(transformer);
    Arc::new(Mutex::new(boxed))
}

/// Backend selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformerKind {
    /// Relative depth from luminance, colorised with the current variant
    PseudoDepth,
    /// Camera-only mode, frames come back unchanged
    Passthrough,
    /// No backend; the pipeline reports itself unavailable
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visualization {
    #[default]
    DepthOnly,
    /// Input on the left, depth on the right, split by a white bar
    SideBySide,
}

/// Construct the configured backend
pub fn load(config: &TransformConfig) -> Result<Box<dyn Transformer>, TransformError> {
    match config.kind {
        TransformerKind::PseudoDepth => Ok(Box::new(
            PseudoDepth::new(config.visualization).with_grayscale(config.grayscale),
        )),
        TransformerKind::Passthrough => Ok(Box::new(Passthrough)),
        TransformerKind::None => Err(TransformError::Unavailable(
            "no transformer configured".into(),
        )),
    }
}
