//! Built-in backends: luminance pseudo-depth and passthrough

use image::{Rgb, RgbImage};
use tracing::trace;

use super::{Colormap, TransformError, Transformer, Visualization};
use crate::capture::Frame;

/// Width of the white bar between the two halves of a side-by-side image
const SEPARATOR_WIDTH: u32 = 10;

/// Cheap stand-in for a monocular depth model: brighter pixels are treated
/// as closer. Output is min-max normalised and colorised like a real depth
/// map so the rest of the pipeline behaves the same.
#[derive(Debug, Clone)]
pub struct PseudoDepth {
    visualization: Visualization,
    grayscale: bool,
}

impl PseudoDepth {
    pub fn new(visualization: Visualization) -> Self {
        Self {
            visualization,
            grayscale: false,
        }
    }

    /// Render the normalised depth as gray levels, ignoring the variant
    pub fn with_grayscale(mut self, grayscale: bool) -> Self {
        self.grayscale = grayscale;
        self
    }

    /// Relative depth per pixel, row-major
    fn estimate(frame: &Frame) -> Vec<f32> {
        frame
            .data
            .chunks_exact(3)
            .map(|px| 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32)
            .collect()
    }

    fn colorize(depth: &[f32], width: u32, height: u32, colormap: Option<Colormap>) -> RgbImage {
        let (min, max) = depth
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &d| {
                (lo.min(d), hi.max(d))
            });
        let range = max - min;
        let lut = colormap.map(Colormap::lut);

        let mut out = RgbImage::new(width, height);
        for (pixel, &d) in out.pixels_mut().zip(depth) {
            // A flat estimate carries no depth information at all.
            let level = if range > 0.0 {
                ((d - min) / range * 255.0) as u8
            } else {
                0
            };
            *pixel = match lut {
                Some(lut) => Rgb(lut[level as usize]),
                None => Rgb([level; 3]),
            };
        }
        out
    }
}

impl Transformer for PseudoDepth {
    fn name(&self) -> &str {
        "pseudo-depth"
    }

    fn transform(&mut self, frame: &Frame, variant: Colormap) -> Result<RgbImage, TransformError> {
        let (width, height) = frame.dimensions();
        let depth = Self::estimate(frame);
        let colormap = (!self.grayscale).then_some(variant);
        let colored = Self::colorize(&depth, width, height, colormap);
        trace!(sequence = frame.sequence(), %variant, grayscale = self.grayscale, "depth estimated");

        match self.visualization {
            Visualization::DepthOnly => Ok(colored),
            Visualization::SideBySide => Ok(side_by_side(&frame.to_image(), &colored)),
        }
    }
}

fn side_by_side(original: &RgbImage, depth: &RgbImage) -> RgbImage {
    let (width, height) = original.dimensions();
    let mut combined = RgbImage::from_pixel(width * 2 + SEPARATOR_WIDTH, height, Rgb([255, 255, 255]));

    for (x, y, pixel) in original.enumerate_pixels() {
        combined.put_pixel(x, y, *pixel);
    }
    for (x, y, pixel) in depth.enumerate_pixels() {
        combined.put_pixel(width + SEPARATOR_WIDTH + x, y, *pixel);
    }
    combined
}

/// Camera-only backend
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Transformer for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn transform(&mut self, frame: &Frame, _variant: Colormap) -> Result<RgbImage, TransformError> {
        Ok(frame.to_image())
    }
}
