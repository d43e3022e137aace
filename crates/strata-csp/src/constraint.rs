//! Constraint variants over flat integer domains.

use strata_common::{Pixel, PixelSet, Rect};

use crate::solver::VarId;

/// A placement constraint over one or two variables.
///
/// A constraint with any unassigned variable is vacuously satisfied, so a
/// partial assignment is only ever rejected by constraints it fully grounds.
///
/// 2D variants decode a flat value `v` into a pixel: `NonIntersection2D`
/// uses `(v % stride, v / stride)`, `InsidePixelSet2D` offsets into its
/// rect as `(rect.x + v % rect.w, rect.y + v / rect.w)`.
#[derive(Debug, Clone)]
pub enum Constraint<'a> {
    /// The two values must be at least `min` apart: `|va - vb| >= min`.
    Distance {
        /// First variable.
        a: VarId,
        /// Second variable.
        b: VarId,
        /// Minimum separation.
        min: i32,
    },
    /// Two axis-aligned rectangles must be disjoint.
    ///
    /// Edges are inclusive: touching rectangles intersect, and containment
    /// in either direction fails.
    NonIntersection2D {
        /// First variable.
        a: VarId,
        /// Second variable.
        b: VarId,
        /// Width of the rectangle anchored at `a`.
        aw: i32,
        /// Height of the rectangle anchored at `a`.
        ah: i32,
        /// Width of the rectangle anchored at `b`.
        bw: i32,
        /// Height of the rectangle anchored at `b`.
        bh: i32,
        /// Row width used to decode flat values into (x, y).
        stride: i32,
    },
    /// All four corners of a `w`×`h` rectangle must be members of `set`.
    InsidePixelSet2D {
        /// The placed variable.
        var: VarId,
        /// Rectangle width.
        w: i32,
        /// Rectangle height.
        h: i32,
        /// The containing pixel set.
        set: &'a PixelSet,
        /// Decode rect for flat values.
        rect: Rect,
    },
}

impl Constraint<'_> {
    /// The variables this constraint mentions.
    #[must_use]
    pub fn variables(&self) -> [Option<VarId>; 2] {
        match *self {
            Constraint::Distance { a, b, .. } | Constraint::NonIntersection2D { a, b, .. } => {
                [Some(a), Some(b)]
            }
            Constraint::InsidePixelSet2D { var, .. } => [Some(var), None],
        }
    }

    /// Evaluates the constraint against a partial assignment.
    ///
    /// `assignment[i]` is the value of variable `i`, or `None` while
    /// unassigned.
    #[must_use]
    pub fn satisfied(&self, assignment: &[Option<i32>]) -> bool {
        match *self {
            Constraint::Distance { a, b, min } => {
                let (Some(va), Some(vb)) = (assignment[a.index()], assignment[b.index()]) else {
                    return true;
                };
                (va - vb).abs() >= min
            }
            Constraint::NonIntersection2D {
                a,
                b,
                aw,
                ah,
                bw,
                bh,
                stride,
            } => {
                let (Some(va), Some(vb)) = (assignment[a.index()], assignment[b.index()]) else {
                    return true;
                };
                let (ax, ay) = (va % stride, va / stride);
                let (bx, by) = (vb % stride, vb / stride);
                let overlap = bx <= ax + aw && ax <= bx + bw && by <= ay + ah && ay <= by + bh;
                !overlap
            }
            Constraint::InsidePixelSet2D {
                var,
                w,
                h,
                set,
                rect,
            } => {
                let Some(v) = assignment[var.index()] else {
                    return true;
                };
                let x = rect.x + v % rect.w;
                let y = rect.y + v / rect.w;
                set.contains(Pixel::new(x, y))
                    && set.contains(Pixel::new(x + w, y))
                    && set.contains(Pixel::new(x, y + h))
                    && set.contains(Pixel::new(x + w, y + h))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unassigned_variables_never_falsify() {
        let c = Constraint::Distance {
            a: VarId::from_index(0),
            b: VarId::from_index(1),
            min: 100,
        };
        assert!(c.satisfied(&[Some(0), None]));
        assert!(c.satisfied(&[None, None]));
        assert!(!c.satisfied(&[Some(0), Some(50)]));
        assert!(c.satisfied(&[Some(0), Some(100)]));
    }

    #[test]
    fn non_intersection_decodes_and_rejects_overlap() {
        let c = Constraint::NonIntersection2D {
            a: VarId::from_index(0),
            b: VarId::from_index(1),
            aw: 10,
            ah: 10,
            bw: 10,
            bh: 10,
            stride: 100,
        };
        // (0, 0) vs (5, 0): overlapping.
        assert!(!c.satisfied(&[Some(0), Some(5)]));
        // (0, 0) vs (10, 0): touching edges intersect.
        assert!(!c.satisfied(&[Some(0), Some(10)]));
        // (0, 0) vs (11, 0): disjoint.
        assert!(c.satisfied(&[Some(0), Some(11)]));
        // (0, 0) vs (0, 11): disjoint vertically. v = 11 * 100.
        assert!(c.satisfied(&[Some(0), Some(1100)]));
        // Identical placements (containment) intersect.
        assert!(!c.satisfied(&[Some(42), Some(42)]));
    }

    #[test]
    fn inside_pixel_set_checks_corners() {
        let mut set = PixelSet::new();
        set.fill_rect(Rect::new(10, 10, 20, 20));
        let rect = Rect::new(10, 10, 20, 20);
        let c = Constraint::InsidePixelSet2D {
            var: VarId::from_index(0),
            w: 5,
            h: 5,
            set: &set,
            rect,
        };
        // v = 0 decodes to (10, 10); corners up to (15, 15) all inside.
        assert!(c.satisfied(&[Some(0)]));
        // v decoding to (26, 10): right corners at x = 31 are outside.
        assert!(!c.satisfied(&[Some(16)]));
    }
}
