//! Vectorized center-in-rectangle tests.
//!
//! The merge engine asks "which text lines have their center inside this
//! region" once per layout box and once per table cell. Centers are stored
//! column-wise in an `(n, 2)` array so each query is one pass of element-wise
//! comparisons instead of a loop over `Rect::contains_strict`.

use ndarray::{Array2, ArrayView1, Zip};

use super::geometry::{Point, Rect};

/// Center points of a set of rectangles, indexed by their original position.
#[derive(Debug, Clone)]
pub struct CenterIndex {
    centers: Array2<f32>,
}

impl CenterIndex {
    /// Builds an index over the centers of `rects`.
    pub fn from_rects<'a>(rects: impl IntoIterator<Item = &'a Rect>) -> Self {
        Self::from_points(rects.into_iter().map(Rect::center))
    }

    /// Builds an index over explicit points.
    pub fn from_points(points: impl IntoIterator<Item = Point>) -> Self {
        let flat: Vec<f32> = points.into_iter().flat_map(|p| [p.x, p.y]).collect();
        let rows = flat.len() / 2;
        // `flat` always holds exactly `rows * 2` values
        let centers = Array2::from_shape_vec((rows, 2), flat)
            .unwrap_or_else(|_| Array2::zeros((0, 2)));
        Self { centers }
    }

    pub fn len(&self) -> usize {
        self.centers.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.centers.nrows() == 0
    }

    fn xs(&self) -> ArrayView1<'_, f32> {
        self.centers.column(0)
    }

    fn ys(&self) -> ArrayView1<'_, f32> {
        self.centers.column(1)
    }

    /// Indices, in ascending order, of centers strictly inside `rect`.
    ///
    /// A center lying exactly on an edge is not inside, so two rectangles
    /// sharing an edge never both claim a point on that edge.
    pub fn inside(&self, rect: &Rect) -> Vec<usize> {
        if self.is_empty() {
            return Vec::new();
        }

        let mask = Zip::from(self.xs())
            .and(self.ys())
            .map_collect(|&x, &y| {
                x > rect.x_min && x < rect.x_max && y > rect.y_min && y < rect.y_max
            });

        mask.iter()
            .enumerate()
            .filter_map(|(idx, &hit)| hit.then_some(idx))
            .collect()
    }
}
