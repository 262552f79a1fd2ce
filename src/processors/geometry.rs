//! Geometric primitives used by the merge engine and the overlays.
//!
//! Model outputs carry both an axis-aligned `bbox` (`[x_min, y_min, x_max, y_max]`)
//! and a quadrilateral `polygon` (`[[x, y]; 4]`). Both serialize in that
//! array form so predictions, debug dumps and merged output share one schema.

use serde::{Deserialize, Serialize};

/// A 2D point with floating-point coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(from = "[f32; 2]", into = "[f32; 2]")]
pub struct Point {
    /// X-coordinate of the point.
    pub x: f32,
    /// Y-coordinate of the point.
    pub y: f32,
}

impl Point {
    /// Creates a new point with the given coordinates.
    #[inline]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<[f32; 2]> for Point {
    fn from([x, y]: [f32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f32; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

/// An axis-aligned rectangle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct Rect {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl From<[f32; 4]> for Rect {
    fn from([x_min, y_min, x_max, y_max]: [f32; 4]) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }
}

impl From<Rect> for [f32; 4] {
    fn from(r: Rect) -> Self {
        [r.x_min, r.y_min, r.x_max, r.y_max]
    }
}

impl Rect {
    /// Creates a rectangle from its corner coordinates.
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Rectangle covering a whole `width` x `height` image.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    /// Area of the rectangle; degenerate rectangles have zero area.
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Midpoint of the rectangle.
    pub fn center(&self) -> Point {
        Point::new(
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        )
    }

    /// Returns the rectangle translated by `(dx, dy)`.
    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self::new(
            self.x_min + dx,
            self.y_min + dy,
            self.x_max + dx,
            self.y_max + dy,
        )
    }

    /// Returns the rectangle with x scaled by `sx` and y by `sy`.
    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self::new(
            self.x_min * sx,
            self.y_min * sy,
            self.x_max * sx,
            self.y_max * sy,
        )
    }

    /// Drops the fractional part of every coordinate.
    pub fn trunc(&self) -> Self {
        Self::new(
            self.x_min.trunc(),
            self.y_min.trunc(),
            self.x_max.trunc(),
            self.y_max.trunc(),
        )
    }

    /// Whether `point` lies strictly inside the rectangle.
    ///
    /// Points on an edge belong to no rectangle.
    #[inline]
    pub fn contains_strict(&self, point: Point) -> bool {
        point.x > self.x_min && point.x < self.x_max && point.y > self.y_min && point.y < self.y_max
    }

    /// Area of the overlap with `other`, 0.0 when they do not intersect.
    pub fn intersection_area(&self, other: &Rect) -> f32 {
        let inter_x_min = self.x_min.max(other.x_min);
        let inter_y_min = self.y_min.max(other.y_min);
        let inter_x_max = self.x_max.min(other.x_max);
        let inter_y_max = self.y_max.min(other.y_max);

        if inter_x_min >= inter_x_max || inter_y_min >= inter_y_max {
            return 0.0;
        }

        (inter_x_max - inter_x_min) * (inter_y_max - inter_y_min)
    }

    /// Clockwise quadrilateral starting at the top-left corner.
    pub fn to_polygon(&self) -> Polygon {
        Polygon::new(vec![
            Point::new(self.x_min, self.y_min),
            Point::new(self.x_max, self.y_min),
            Point::new(self.x_max, self.y_max),
            Point::new(self.x_min, self.y_max),
        ])
    }
}

/// Fraction of `child` covered by `master`.
///
/// Returns 0.0 when `child` has no area.
pub fn containment_score(master: &Rect, child: &Rect) -> f32 {
    let child_area = child.area();
    if child_area <= 0.0 {
        return 0.0;
    }
    master.intersection_area(child) / child_area
}

/// A polygon represented by its vertices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct Polygon {
    /// The vertices, in drawing order.
    pub points: Vec<Point>,
}

impl Polygon {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Gets the minimum x-coordinate of all points, or 0.0 if there are no points.
    pub fn x_min(&self) -> f32 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points.iter().map(|p| p.x).fold(f32::INFINITY, f32::min)
    }

    /// Gets the minimum y-coordinate of all points, or 0.0 if there are no points.
    pub fn y_min(&self) -> f32 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points.iter().map(|p| p.y).fold(f32::INFINITY, f32::min)
    }

    /// Gets the maximum x-coordinate of all points, or 0.0 if there are no points.
    pub fn x_max(&self) -> f32 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points
            .iter()
            .map(|p| p.x)
            .fold(f32::NEG_INFINITY, f32::max)
    }

    /// Gets the maximum y-coordinate of all points, or 0.0 if there are no points.
    pub fn y_max(&self) -> f32 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points
            .iter()
            .map(|p| p.y)
            .fold(f32::NEG_INFINITY, f32::max)
    }

    /// Smallest axis-aligned rectangle enclosing the polygon.
    pub fn bounding_rect(&self) -> Rect {
        Rect::new(self.x_min(), self.y_min(), self.x_max(), self.y_max())
    }

    /// Returns a new polygon translated by `(dx, dy)`.
    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self::new(
            self.points
                .iter()
                .map(|p| Point::new(p.x + dx, p.y + dy))
                .collect(),
        )
    }

    /// Returns a new polygon with x scaled by `sx` and y by `sy`.
    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self::new(
            self.points
                .iter()
                .map(|p| Point::new(p.x * sx, p.y * sy))
                .collect(),
        )
    }

    /// Top-left-most vertex, used to anchor overlay labels.
    pub fn label_anchor(&self) -> Point {
        Point::new(self.x_min(), self.y_min())
    }
}

impl From<Rect> for Polygon {
    fn from(rect: Rect) -> Self {
        rect.to_polygon()
    }
}
