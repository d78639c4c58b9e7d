//! Gridding and contouring of the unit-variance surface.
//!
//! The refinement loop evaluates s0 on the cross product of sampled white and
//! flicker amplitudes. That product structure lets the scattered trials be
//! interpolated onto a regular grid with a tensor product of natural cubic
//! splines: first along the flicker axis for each white sample, then along
//! the white axis for each grid row.
//!
//! The level-1 crossing is extracted with marching squares; cells touching a
//! NaN node are skipped and saddle cells are resolved by the cell-centre mean.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{GctsError, Result};

/// Natural cubic spline through strictly increasing knots.
#[derive(Clone, Debug, PartialEq)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivatives at the knots.
    m: Vec<f64>,
}

impl CubicSpline {
    /// Fit a natural spline (zero curvature at both ends).
    pub fn natural(x: &[f64], y: &[f64]) -> Result<Self> {
        let n = x.len();
        if n == 0 || n != y.len() {
            return Err(GctsError::config(format!(
                "spline needs matching non-empty knots ({} x, {} y)",
                n,
                y.len()
            )));
        }
        if x.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(GctsError::config("spline knots must be strictly increasing"));
        }
        if x.iter().chain(y).any(|v| !v.is_finite()) {
            return Err(GctsError::numerical(
                "cubic interpolation",
                "non-finite knot values",
            ));
        }

        let mut m = vec![0.0; n];
        if n > 2 {
            // Thomas algorithm on the interior second derivatives.
            let k = n - 2;
            let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
            let mut diag = vec![0.0; k];
            let mut upper = vec![0.0; k];
            let mut rhs = vec![0.0; k];
            for i in 0..k {
                diag[i] = 2.0 * (h[i] + h[i + 1]);
                upper[i] = h[i + 1];
                rhs[i] = 6.0 * ((y[i + 2] - y[i + 1]) / h[i + 1] - (y[i + 1] - y[i]) / h[i]);
            }
            for i in 1..k {
                let w = h[i] / diag[i - 1];
                diag[i] -= w * upper[i - 1];
                rhs[i] -= w * rhs[i - 1];
            }
            m[k] = rhs[k - 1] / diag[k - 1];
            for i in (0..k - 1).rev() {
                m[i + 1] = (rhs[i] - upper[i] * m[i + 2]) / diag[i];
            }
        }

        Ok(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            m,
        })
    }

    /// Evaluate the spline; NaN outside the knot range.
    pub fn eval(&self, t: f64) -> f64 {
        let n = self.x.len();
        if n == 1 {
            return if t == self.x[0] { self.y[0] } else { f64::NAN };
        }
        let (lo, hi) = (self.x[0], self.x[n - 1]);
        let tol = 1e-9 * (hi - lo);
        if t < lo - tol || t > hi + tol {
            return f64::NAN;
        }
        let t = t.clamp(lo, hi);
        let i = (self.x.partition_point(|&v| v <= t).max(1) - 1).min(n - 2);
        let h = self.x[i + 1] - self.x[i];
        let a = (self.x[i + 1] - t) / h;
        let b = (t - self.x[i]) / h;
        a * self.y[i]
            + b * self.y[i + 1]
            + ((a * a * a - a) * self.m[i] + (b * b * b - b) * self.m[i + 1]) * h * h / 6.0
    }
}

/// `start, start + step, ...` strictly below `stop`; `[start]` when the range is empty.
pub fn arange(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let count = ((stop - start) / step).ceil();
    if !(count >= 1.0) {
        return vec![start];
    }
    (0..count as usize).map(|k| start + k as f64 * step).collect()
}

/// Values on a regular grid, stored row-major with `y` as the row index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridSurface {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
}

/// A grid point with its surface value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl GridSurface {
    #[inline]
    pub fn at(&self, ix: usize, iy: usize) -> f64 {
        self.z[iy * self.x.len() + ix]
    }

    /// Finite minimum and maximum, if any node is finite.
    pub fn finite_range(&self) -> Option<(f64, f64)> {
        self.z
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// True if finite values lie strictly on both sides of `level`.
    pub fn crosses(&self, level: f64) -> bool {
        matches!(self.finite_range(), Some((lo, hi)) if lo < level && hi > level)
    }

    /// Finite node whose value is closest to `level` (first in row-major order on ties).
    pub fn nearest_to_level(&self, level: f64) -> Option<GridPoint> {
        let nx = self.x.len();
        let mut best: Option<(usize, f64)> = None;
        for (k, &z) in self.z.iter().enumerate() {
            if !z.is_finite() {
                continue;
            }
            let d = (z - level).abs();
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((k, d));
            }
        }
        best.map(|(k, _)| GridPoint {
            x: self.x[k % nx],
            y: self.y[k / nx],
            z: self.z[k],
        })
    }

    /// Marching-squares segments of the `level` isoline.
    pub fn contour_segments(&self, level: f64) -> Vec<[(f64, f64); 2]> {
        self.march(level)
            .into_iter()
            .map(|(a, b)| [a.1, b.1])
            .collect()
    }

    /// Distinct vertices of the `level` isoline in traversal order.
    pub fn contour_points(&self, level: f64) -> Vec<(f64, f64)> {
        let mut seen: HashSet<EdgeKey> = HashSet::new();
        let mut points = Vec::new();
        for (a, b) in self.march(level) {
            for (key, p) in [a, b] {
                if seen.insert(key) {
                    points.push(p);
                }
            }
        }
        points
    }

    fn march(&self, level: f64) -> Vec<((EdgeKey, (f64, f64)), (EdgeKey, (f64, f64)))> {
        let (nx, ny) = (self.x.len(), self.y.len());
        let mut segments = Vec::new();
        if nx < 2 || ny < 2 {
            return segments;
        }
        for iy in 0..ny - 1 {
            for ix in 0..nx - 1 {
                let nodes = [(ix, iy), (ix + 1, iy), (ix + 1, iy + 1), (ix, iy + 1)];
                let z = nodes.map(|(i, j)| self.at(i, j));
                if z.iter().any(|v| !v.is_finite()) {
                    continue;
                }
                // Edges: bottom, right, top, left.
                let edges = [
                    (EdgeKey::Horizontal(ix, iy), 0, 1),
                    (EdgeKey::Vertical(ix + 1, iy), 1, 2),
                    (EdgeKey::Horizontal(ix, iy + 1), 3, 2),
                    (EdgeKey::Vertical(ix, iy), 0, 3),
                ];
                let cut: Vec<Option<(EdgeKey, (f64, f64))>> = edges
                    .iter()
                    .map(|&(key, a, b)| {
                        if (z[a] >= level) == (z[b] >= level) {
                            return None;
                        }
                        let s = (level - z[a]) / (z[b] - z[a]);
                        let (pa, pb) = (nodes[a], nodes[b]);
                        let px = self.x[pa.0] + s * (self.x[pb.0] - self.x[pa.0]);
                        let py = self.y[pa.1] + s * (self.y[pb.1] - self.y[pa.1]);
                        Some((key, (px, py)))
                    })
                    .collect();

                match cut.iter().flatten().count() {
                    2 => {
                        let mut it = cut.iter().flatten();
                        if let (Some(&a), Some(&b)) = (it.next(), it.next()) {
                            segments.push((a, b));
                        }
                    }
                    4 => {
                        let centre = z.iter().sum::<f64>() / 4.0;
                        let pairs = if (centre >= level) == (z[0] >= level) {
                            [(0, 1), (2, 3)]
                        } else {
                            [(3, 0), (1, 2)]
                        };
                        for (a, b) in pairs {
                            if let (Some(a), Some(b)) = (cut[a], cut[b]) {
                                segments.push((a, b));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        segments
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum EdgeKey {
    Horizontal(usize, usize),
    Vertical(usize, usize),
}

/// Interpolate values sampled on the cross product `xs × ys` onto a regular grid.
///
/// # Arguments
/// * `xs`, `ys` - Sample abscissae (any order; duplicates keep the first sample)
/// * `values` - Row-major samples, `values[i * ys.len() + j] = f(xs[i], ys[j])`
/// * `increment` - Grid spacing on both axes
pub fn interpolate_product_grid(
    xs: &[f64],
    ys: &[f64],
    values: &[f64],
    increment: f64,
) -> Result<GridSurface> {
    if xs.is_empty() || ys.is_empty() || values.len() != xs.len() * ys.len() {
        return Err(GctsError::config(format!(
            "grid samples do not match axes ({} values for {}x{})",
            values.len(),
            xs.len(),
            ys.len()
        )));
    }
    if !(increment.is_finite() && increment > 0.0) {
        return Err(GctsError::config(format!(
            "grid increment must be positive, got {increment}"
        )));
    }

    let xi = unique_order(xs);
    let yi = unique_order(ys);
    let ux: Vec<f64> = xi.iter().map(|&i| xs[i]).collect();
    let uy: Vec<f64> = yi.iter().map(|&j| ys[j]).collect();

    let gx = arange(ux[0], ux[ux.len() - 1], increment);
    let gy = arange(uy[0], uy[uy.len() - 1], increment);

    // Along y for each sampled x: columns[a][row] for grid row `row`.
    let mut columns: Vec<Vec<f64>> = Vec::with_capacity(xi.len());
    for &i in &xi {
        let col: Vec<f64> = yi.iter().map(|&j| values[i * ys.len() + j]).collect();
        let spline = CubicSpline::natural(&uy, &col)?;
        columns.push(gy.iter().map(|&y| spline.eval(y)).collect());
    }

    let mut z = Vec::with_capacity(gx.len() * gy.len());
    for row in 0..gy.len() {
        let knots: Vec<f64> = columns.iter().map(|c| c[row]).collect();
        if knots.iter().any(|v| !v.is_finite()) {
            z.extend(std::iter::repeat(f64::NAN).take(gx.len()));
            continue;
        }
        let spline = CubicSpline::natural(&ux, &knots)?;
        z.extend(gx.iter().map(|&x| spline.eval(x)));
    }

    log::trace!(
        "interpolated {}x{} samples onto {}x{} grid",
        ux.len(),
        uy.len(),
        gx.len(),
        gy.len()
    );

    Ok(GridSurface { x: gx, y: gy, z })
}

/// Indices of the first occurrence of each distinct value, sorted by value.
fn unique_order(values: &[f64]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| values[a].total_cmp(&values[b]).then(a.cmp(&b)));
    idx.dedup_by(|b, a| values[*a] == values[*b]);
    idx
}
