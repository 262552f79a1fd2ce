//! Image to tensor conversion.

use image::RgbImage;
use ndarray::{Array4, s};

/// Per-channel normalization applied when packing an image into NCHW.
///
/// `mean` and `std` are given in RGB order; with `bgr` set the channels are
/// written blue first, as the Paddle exports expect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalize {
    pub scale: f32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub bgr: bool,
}

impl Normalize {
    /// ImageNet statistics over `[0, 1]` pixels.
    pub const IMAGENET: Normalize = Normalize {
        scale: 1.0 / 255.0,
        mean: [0.485, 0.456, 0.406],
        std: [0.229, 0.224, 0.225],
        bgr: true,
    };

    /// Maps pixels to `[-1, 1]`.
    pub const SYMMETRIC: Normalize = Normalize {
        scale: 1.0 / 255.0,
        mean: [0.5, 0.5, 0.5],
        std: [0.5, 0.5, 0.5],
        bgr: true,
    };

    /// Scales pixels to `[0, 1]` without centering.
    pub const UNIT: Normalize = Normalize {
        scale: 1.0 / 255.0,
        mean: [0.0, 0.0, 0.0],
        std: [1.0, 1.0, 1.0],
        bgr: true,
    };

    /// Writes `image` into slot `index` of `batch`, top-left aligned.
    ///
    /// Pixels outside the image keep whatever `batch` already holds.
    pub fn write(&self, image: &RgbImage, batch: &mut Array4<f32>, index: usize) {
        let (_, _, height, width) = batch.dim();
        let w = (image.width() as usize).min(width);
        let h = (image.height() as usize).min(height);
        let mut slot = batch.slice_mut(s![index, .., ..h, ..w]);

        for (x, y, pixel) in image.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            if x >= w || y >= h {
                continue;
            }
            for rgb in 0..3 {
                let channel = if self.bgr { 2 - rgb } else { rgb };
                let value = pixel.0[rgb] as f32 * self.scale;
                slot[[channel, y, x]] = (value - self.mean[rgb]) / self.std[rgb];
            }
        }
    }
}

/// Dimensions of `width`x`height` scaled so the long side is at most
/// `limit`, each rounded to a multiple of 32 (and at least 32).
pub fn fit_to_stride(width: u32, height: u32, limit: u32) -> (u32, u32) {
    let long_side = width.max(height).max(1) as f32;
    let ratio = if long_side > limit as f32 {
        limit as f32 / long_side
    } else {
        1.0
    };
    let round = |side: u32| {
        let scaled = (side as f32 * ratio).round() as u32;
        (((scaled + 16) / 32) * 32).max(32)
    };
    (round(width), round(height))
}

/// Width of a crop rescaled to `height`, kept within `[1, max_width]`.
pub fn width_at_height(width: u32, crop_height: u32, height: u32, max_width: u32) -> u32 {
    let ratio = width as f32 / crop_height.max(1) as f32;
    ((height as f32 * ratio).ceil() as u32).clamp(1, max_width)
}
