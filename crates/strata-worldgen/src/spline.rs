//! Cubic spline interpolation for hill and hole profiles.
//!
//! Hills want first-derivative boundary conditions (slopes of ±1 at the
//! feet), holes want a small positive second derivative at both ends, so the
//! boundary condition is selectable per side.

/// Boundary condition at one end of the spline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Boundary {
    /// Prescribed first derivative.
    FirstDeriv(f64),
    /// Prescribed second derivative.
    SecondDeriv(f64),
}

/// A cubic spline through x-ordered control points.
///
/// Piecewise `y_i + b_i t + c_i t^2 + d_i t^3` with `t = x - x_i`;
/// coefficients come from the tridiagonal continuity system solved with the
/// Thomas algorithm. Evaluation outside the knot range extrapolates the
/// closest segment.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    b: Vec<f64>,
    c: Vec<f64>,
    d: Vec<f64>,
}

impl CubicSpline {
    /// Fits a spline through the given points.
    ///
    /// `xs` must be strictly increasing and hold at least two points.
    #[must_use]
    pub fn new(xs: Vec<f64>, ys: Vec<f64>, left: Boundary, right: Boundary) -> Self {
        let n = xs.len();
        assert!(n >= 2, "spline needs at least two control points");
        assert_eq!(n, ys.len(), "control point coordinate counts differ");
        assert!(
            xs.windows(2).all(|w| w[0] < w[1]),
            "control points must be strictly x-ordered"
        );

        let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();

        // Tridiagonal system for c_i = s''(x_i) / 2.
        let mut sub = vec![0.0; n];
        let mut diag = vec![0.0; n];
        let mut sup = vec![0.0; n];
        let mut rhs = vec![0.0; n];

        match left {
            Boundary::SecondDeriv(v) => {
                diag[0] = 1.0;
                rhs[0] = v / 2.0;
            }
            Boundary::FirstDeriv(v) => {
                diag[0] = 2.0;
                sup[0] = 1.0;
                rhs[0] = 3.0 / h[0] * ((ys[1] - ys[0]) / h[0] - v);
            }
        }
        for i in 1..n - 1 {
            sub[i] = h[i - 1];
            diag[i] = 2.0 * (h[i - 1] + h[i]);
            sup[i] = h[i];
            rhs[i] = 3.0 * ((ys[i + 1] - ys[i]) / h[i] - (ys[i] - ys[i - 1]) / h[i - 1]);
        }
        match right {
            Boundary::SecondDeriv(v) => {
                diag[n - 1] = 1.0;
                rhs[n - 1] = v / 2.0;
            }
            Boundary::FirstDeriv(v) => {
                sub[n - 1] = 1.0;
                diag[n - 1] = 2.0;
                let hn = h[n - 2];
                rhs[n - 1] = 3.0 / hn * (v - (ys[n - 1] - ys[n - 2]) / hn);
            }
        }

        let c = thomas(&sub, &diag, &sup, &rhs);

        let mut b = vec![0.0; n - 1];
        let mut d = vec![0.0; n - 1];
        for i in 0..n - 1 {
            b[i] = (ys[i + 1] - ys[i]) / h[i] - h[i] / 3.0 * (2.0 * c[i] + c[i + 1]);
            d[i] = (c[i + 1] - c[i]) / (3.0 * h[i]);
        }

        Self { xs, ys, b, c, d }
    }

    /// Evaluates the spline at `x`.
    #[must_use]
    pub fn eval(&self, x: f64) -> f64 {
        let i = self.segment(x);
        let t = x - self.xs[i];
        self.ys[i] + self.b[i] * t + self.c[i] * t * t + self.d[i] * t * t * t
    }

    fn segment(&self, x: f64) -> usize {
        let n = self.xs.len();
        let idx = self.xs.partition_point(|&knot| knot <= x);
        idx.saturating_sub(1).min(n - 2)
    }
}

/// Solves a tridiagonal system in place; `sub`/`diag`/`sup` are the three
/// bands, indexed by row.
fn thomas(sub: &[f64], diag: &[f64], sup: &[f64], rhs: &[f64]) -> Vec<f64> {
    let n = diag.len();
    let mut sup_p = vec![0.0; n];
    let mut rhs_p = vec![0.0; n];

    sup_p[0] = sup[0] / diag[0];
    rhs_p[0] = rhs[0] / diag[0];
    for i in 1..n {
        let m = diag[i] - sub[i] * sup_p[i - 1];
        sup_p[i] = sup[i] / m;
        rhs_p[i] = (rhs[i] - sub[i] * rhs_p[i - 1]) / m;
    }

    let mut x = vec![0.0; n];
    x[n - 1] = rhs_p[n - 1];
    for i in (0..n - 1).rev() {
        x[i] = rhs_p[i] - sup_p[i] * x[i + 1];
    }
    x
}
