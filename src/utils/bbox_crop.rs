//! Rectangle based image cropping.

use image::{RgbImage, imageops};

use crate::core::errors::{BatchError, ProcessingStage};
use crate::processors::Rect;

/// Rectangle based image cropping utilities.
pub struct BBoxCrop;

impl BBoxCrop {
    /// Crops `image` to `rect`, clamped to the image bounds.
    ///
    /// Coordinates are truncated to whole pixels. Fails when nothing of the
    /// rectangle lies inside the image.
    pub fn crop_rect(image: &RgbImage, rect: &Rect) -> Result<RgbImage, BatchError> {
        let x1 = (rect.x_min.max(0.0) as u32).min(image.width().saturating_sub(1));
        let y1 = (rect.y_min.max(0.0) as u32).min(image.height().saturating_sub(1));
        let x2 = (rect.x_max.max(0.0) as u32).min(image.width());
        let y2 = (rect.y_max.max(0.0) as u32).min(image.height());

        if x2 <= x1 || y2 <= y1 {
            return Err(BatchError::processing(
                ProcessingStage::Loading,
                format!("Invalid crop region: ({x1}, {y1}) to ({x2}, {y2})"),
            ));
        }

        Ok(imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_crop_rect_copies_region() {
        let mut image = RgbImage::new(20, 10);
        image.put_pixel(5, 3, Rgb([255, 0, 0]));

        let crop = BBoxCrop::crop_rect(&image, &Rect::new(4.6, 2.2, 8.0, 6.0)).unwrap();
        assert_eq!(crop.dimensions(), (4, 4));
        assert_eq!(*crop.get_pixel(1, 1), Rgb([255, 0, 0]));
    }

    #[test]
    fn test_crop_rect_clamps_to_image() {
        let image = RgbImage::new(20, 10);
        let crop = BBoxCrop::crop_rect(&image, &Rect::new(-5.0, -5.0, 100.0, 100.0)).unwrap();
        assert_eq!(crop.dimensions(), (20, 10));
    }

    #[test]
    fn test_crop_rect_rejects_empty_region() {
        let image = RgbImage::new(20, 10);
        assert!(BBoxCrop::crop_rect(&image, &Rect::new(30.0, 0.0, 40.0, 5.0)).is_err());
        assert!(BBoxCrop::crop_rect(&image, &Rect::new(3.0, 3.0, 3.5, 9.0)).is_err());
    }
}
