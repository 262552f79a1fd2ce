//! Drawing primitives for the debug overlays.
//!
//! Polygons are drawn as one-pixel outlines. Labels sit at the polygon's
//! top-left corner on a white background, and recognized text is re-rendered
//! on a blank canvas, shrinking the font until each line fits its box.

use ab_glyph::FontVec;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut, draw_text_mut, text_size};

use crate::processors::{Polygon, Rect};

pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
pub const GREEN: Rgb<u8> = Rgb([0, 128, 0]);

const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BACKGROUND_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Smallest font size text rendering shrinks to.
const MIN_FONT_SIZE: f32 = 6.0;

/// Offset of a label from its polygon's corner.
const LABEL_OFFSET: i32 = 1;

/// Label font size for page overlays.
pub const LABEL_FONT_SIZE: f32 = 10.0;

/// Label font size for table overlays.
pub const TABLE_LABEL_FONT_SIZE: f32 = 20.0;

/// A blank white image.
pub fn blank_canvas(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width.max(1), height.max(1), BACKGROUND_COLOR)
}

/// Outlines `polygons` in `color`, labeling each one when labels and a font
/// are given.
pub fn draw_polygons(
    image: &mut RgbImage,
    polygons: &[Polygon],
    labels: Option<&[String]>,
    color: Rgb<u8>,
    font: Option<&FontVec>,
    label_size: f32,
) {
    for (i, polygon) in polygons.iter().enumerate() {
        draw_outline(image, polygon, color);

        let (Some(labels), Some(font)) = (labels, font) else {
            continue;
        };
        if let Some(label) = labels.get(i) {
            draw_label(image, polygon, label, color, font, label_size);
        }
    }
}

/// Outlines axis-aligned `rects`; see [`draw_polygons`].
pub fn draw_rects(
    image: &mut RgbImage,
    rects: &[Rect],
    labels: Option<&[String]>,
    color: Rgb<u8>,
    font: Option<&FontVec>,
    label_size: f32,
) {
    let polygons: Vec<Polygon> = rects.iter().map(Rect::to_polygon).collect();
    draw_polygons(image, &polygons, labels, color, font, label_size);
}

fn draw_outline(image: &mut RgbImage, polygon: &Polygon, color: Rgb<u8>) {
    let points = &polygon.points;
    if points.len() < 2 {
        return;
    }
    for (i, start) in points.iter().enumerate() {
        let end = &points[(i + 1) % points.len()];
        draw_line_segment_mut(
            image,
            (start.x.trunc(), start.y.trunc()),
            (end.x.trunc(), end.y.trunc()),
            color,
        );
    }
}

fn draw_label(
    image: &mut RgbImage,
    polygon: &Polygon,
    label: &str,
    color: Rgb<u8>,
    font: &FontVec,
    size: f32,
) {
    let anchor = polygon.label_anchor();
    let x = anchor.x as i32 + LABEL_OFFSET;
    let y = anchor.y as i32 + LABEL_OFFSET;
    let (width, height) = text_size(size, font, label);
    if width > 0 && height > 0 {
        let background = imageproc::rect::Rect::at(x + LABEL_OFFSET, y + LABEL_OFFSET).of_size(width, height);
        draw_filled_rect_mut(image, background, BACKGROUND_COLOR);
    }
    draw_text_mut(image, color, x, y, size, font, label);
}

/// Re-renders recognized lines on a white `width` x `height` canvas scaled
/// by `upscale`.
///
/// Each line starts at `max(6, min(0.75 * box height, max_font_size))` and
/// shrinks one step at a time until it fits its box or reaches size 6.
pub fn render_text_lines(
    width: u32,
    height: u32,
    lines: &[(Rect, &str)],
    font: &FontVec,
    upscale: u32,
    max_font_size: f32,
) -> RgbImage {
    let scale = upscale.max(1) as f32;
    let mut canvas = blank_canvas(width * upscale.max(1), height * upscale.max(1));

    for (bbox, text) in lines {
        if text.is_empty() {
            continue;
        }
        let scaled = bbox.scale(scale, scale).trunc();
        let box_width = scaled.width().max(0.0);
        let box_height = scaled.height().max(0.0);

        let mut font_size = (0.75 * box_height).trunc().min(max_font_size).max(MIN_FONT_SIZE);
        let (mut text_width, mut text_height) = text_size(font_size, font, text);
        while (text_width as f32 > box_width || text_height as f32 > box_height) && font_size > MIN_FONT_SIZE {
            font_size -= 1.0;
            (text_width, text_height) = text_size(font_size, font, text);
        }

        let x = scaled.x_min as i32;
        let y = scaled.y_min as i32 + ((box_height - text_height as f32) / 2.0).max(0.0) as i32;
        draw_text_mut(&mut canvas, TEXT_COLOR, x, y, font_size, font, text);
    }

    canvas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_rects_outlines_without_font() {
        let mut image = blank_canvas(20, 20);
        draw_rects(
            &mut image,
            &[Rect::new(2.0, 2.0, 10.0, 10.0)],
            Some(&["Text-0".to_string()]),
            RED,
            None,
            LABEL_FONT_SIZE,
        );
        assert_eq!(*image.get_pixel(2, 2), RED);
        assert_eq!(*image.get_pixel(10, 6), RED);
        assert_eq!(*image.get_pixel(6, 6), BACKGROUND_COLOR);
    }

    #[test]
    fn test_degenerate_polygon_is_ignored() {
        let mut image = blank_canvas(5, 5);
        draw_polygons(&mut image, &[Polygon::default()], None, BLUE, None, LABEL_FONT_SIZE);
        assert!(image.pixels().all(|p| *p == BACKGROUND_COLOR));
    }

    #[test]
    fn test_blank_canvas_is_never_empty() {
        let canvas = blank_canvas(0, 0);
        assert_eq!(canvas.dimensions(), (1, 1));
    }
}
