//! Closed polygons rasterized with the crossing-number rule.

use crate::pixel_set::PixelSet;
use crate::rect::{Pixel, Rect};

/// A closed polygon given as an ordered vertex sequence.
///
/// The edge from the last vertex back to the first is implicit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polygon {
    vertices: Vec<Pixel>,
}

impl Polygon {
    /// Creates a polygon from its vertices, in order.
    #[must_use]
    pub fn new(vertices: Vec<Pixel>) -> Self {
        Self { vertices }
    }

    /// The vertex sequence.
    #[must_use]
    pub fn vertices(&self) -> &[Pixel] {
        &self.vertices
    }

    /// Bounding box of the vertex set, or `None` for a vertex-less polygon.
    #[must_use]
    pub fn bbox(&self) -> Option<Rect> {
        let set: PixelSet = self.vertices.iter().copied().collect();
        set.bbox()
    }

    /// Crossing-number point-in-polygon test.
    ///
    /// A point on the right boundary counts as outside, so adjacent polygons
    /// sharing an edge rasterize to disjoint pixel sets.
    #[must_use]
    pub fn contains(&self, p: Pixel) -> bool {
        let n = self.vertices.len();
        if n < 3 {
            return false;
        }
        let (px, py) = (f64::from(p.x), f64::from(p.y));
        let mut crossings = 0;
        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            let (ay, by) = (f64::from(a.y), f64::from(b.y));
            let upward = ay <= py && by > py;
            let downward = ay > py && by <= py;
            if upward || downward {
                let t = (py - ay) / (by - ay);
                let cross_x = f64::from(a.x) + t * f64::from(b.x - a.x);
                if px < cross_x {
                    crossings += 1;
                }
            }
        }
        crossings % 2 == 1
    }

    /// Rasterizes the interior over the polygon bbox.
    #[must_use]
    pub fn rasterize(&self) -> PixelSet {
        let mut out = PixelSet::new();
        let Some(bbox) = self.bbox() else {
            return out;
        };
        for p in bbox.pixels() {
            if self.contains(p) {
                out.insert(p);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: i32, y: i32, side: i32) -> Polygon {
        Polygon::new(vec![
            Pixel::new(x, y),
            Pixel::new(x + side, y),
            Pixel::new(x + side, y + side),
            Pixel::new(x, y + side),
        ])
    }

    #[test]
    fn square_interior() {
        let poly = square(0, 0, 10);
        assert!(poly.contains(Pixel::new(5, 5)));
        assert!(poly.contains(Pixel::new(0, 5)));
        assert!(!poly.contains(Pixel::new(10, 5)));
        assert!(!poly.contains(Pixel::new(-1, 5)));
        assert!(!poly.contains(Pixel::new(5, 15)));
    }

    #[test]
    fn square_rasterizes_to_area() {
        let set = square(0, 0, 10).rasterize();
        assert_eq!(set.len(), 100);
        assert_eq!(set.bbox(), Some(Rect::new(0, 0, 10, 10)));
    }

    #[test]
    fn triangle_contains_centroid_not_outside() {
        let tri = Polygon::new(vec![
            Pixel::new(0, 0),
            Pixel::new(20, 0),
            Pixel::new(10, 20),
        ]);
        assert!(tri.contains(Pixel::new(10, 5)));
        assert!(!tri.contains(Pixel::new(0, 19)));
        assert!(!tri.contains(Pixel::new(19, 19)));
    }

    #[test]
    fn degenerate_polygon_is_empty() {
        let line = Polygon::new(vec![Pixel::new(0, 0), Pixel::new(10, 0)]);
        assert!(line.rasterize().is_empty());
    }
}
