//! Admissible region of (white, flicker) noise amplitudes.
//!
//! Quantile lines of white and flicker amplitude against WRMS are fitted once
//! over the calibration set. For a series with residual WRMS `w` and `dof`
//! degrees of freedom, the chi-square confidence interval `[w0, w1]` of `w`
//! is pushed through the upper and lower lines to give four corners
//!
//! ```text
//! [upper(w0), upper(w1), lower(w1), lower(w0)]
//! ```
//!
//! and uniform points of the unit square are mapped into that quadrilateral
//! by bilinear interpolation.

use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::calibration::CalibrationSet;
use crate::error::{GctsError, Result};
use crate::quantreg::{quantile_regression, QuantileLine};

/// Bilinear map of the unit square onto a quadrilateral.
///
/// Logical corners `(0,0), (1,0), (1,1), (0,1)` map to `p[0..4]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BilinearPatch {
    coeffs: [f64; 4],
}

impl BilinearPatch {
    pub fn from_corners(p: [f64; 4]) -> Self {
        Self {
            coeffs: [p[0], p[1] - p[0], p[3] - p[0], p[2] - p[1] - p[3] + p[0]],
        }
    }

    #[inline]
    pub fn eval(&self, u: f64, v: f64) -> f64 {
        let a = &self.coeffs;
        a[0] + a[1] * u + a[2] * v + a[3] * u * v
    }
}

/// The four corner points of the admissible region.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Corners {
    /// WRMS abscissae `[w0, w1, w1, w0]`.
    pub wrms: [f64; 4],
    pub white: [f64; 4],
    pub flicker: [f64; 4],
}

/// Random amplitudes drawn inside the admissible region.
///
/// White and flicker draws use independent points of the unit square;
/// each carries the WRMS coordinate of its own draw. Non-positive amplitudes
/// are replaced by NaN.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AmplitudeSamples {
    pub white_wrms: Vec<f64>,
    pub white: Vec<f64>,
    pub flicker_wrms: Vec<f64>,
    pub flicker: Vec<f64>,
}

impl AmplitudeSamples {
    /// Finite white amplitudes.
    pub fn valid_white(&self) -> Vec<f64> {
        self.white.iter().copied().filter(|v| v.is_finite()).collect()
    }

    /// Finite flicker amplitudes.
    pub fn valid_flicker(&self) -> Vec<f64> {
        self.flicker.iter().copied().filter(|v| v.is_finite()).collect()
    }
}

/// Quantile bands fitted over a calibration set for a confidence level.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub alpha: f64,
    pub white_upper: QuantileLine,
    pub white_lower: QuantileLine,
    pub flicker_upper: QuantileLine,
    pub flicker_lower: QuantileLine,
}

impl SearchSpace {
    /// Per-axis tail probability `α' = 1 − sqrt(1 − α)`.
    pub fn adjusted_alpha(alpha: f64) -> f64 {
        1.0 - (1.0 - alpha).sqrt()
    }

    /// Fit the upper (`1 − α'/2`) and lower (`α'/2`) quantile lines.
    pub fn new(calibration: &CalibrationSet, alpha: f64) -> Result<Self> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(GctsError::config(format!("alpha must be in (0, 1), got {alpha}")));
        }
        if calibration.len() < 3 {
            return Err(GctsError::InsufficientData {
                observations: calibration.len(),
                parameters: 2,
            });
        }
        let a = Self::adjusted_alpha(alpha);
        let (hi, lo) = (1.0 - a / 2.0, a / 2.0);
        let space = Self {
            alpha,
            white_upper: quantile_regression(&calibration.wrms, &calibration.white, hi)?,
            white_lower: quantile_regression(&calibration.wrms, &calibration.white, lo)?,
            flicker_upper: quantile_regression(&calibration.wrms, &calibration.flicker, hi)?,
            flicker_lower: quantile_regression(&calibration.wrms, &calibration.flicker, lo)?,
        };
        log::debug!("search space for alpha={alpha}: {space:?}");
        Ok(space)
    }

    /// Chi-square confidence interval of the WRMS.
    pub fn wrms_interval(&self, wrms: f64, dof: usize) -> Result<(f64, f64)> {
        if dof == 0 {
            return Err(GctsError::numerical(
                "wrms confidence interval",
                "zero degrees of freedom",
            ));
        }
        if !(wrms.is_finite() && wrms > 0.0) {
            return Err(GctsError::data(format!("WRMS must be positive, got {wrms}")));
        }
        let chi2 = ChiSquared::new(dof as f64)
            .map_err(|e| GctsError::numerical("wrms confidence interval", e.to_string()))?;
        let a = Self::adjusted_alpha(self.alpha);
        let scaled = dof as f64 * wrms * wrms;
        let lower = (scaled / chi2.inverse_cdf(1.0 - a / 2.0)).sqrt();
        let upper = (scaled / chi2.inverse_cdf(a / 2.0)).sqrt();
        Ok((lower, upper))
    }

    /// Corner points of the admissible region.
    pub fn corners(&self, wrms: f64, dof: usize) -> Result<Corners> {
        let (w0, w1) = self.wrms_interval(wrms, dof)?;
        let band = |upper: &QuantileLine, lower: &QuantileLine| {
            [upper.eval(w0), upper.eval(w1), lower.eval(w1), lower.eval(w0)]
        };
        Ok(Corners {
            wrms: [w0, w1, w1, w0],
            white: band(&self.white_upper, &self.white_lower),
            flicker: band(&self.flicker_upper, &self.flicker_lower),
        })
    }

    /// Draw `n_rnd` white and `n_rnd` flicker amplitudes.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        wrms: f64,
        dof: usize,
        n_rnd: usize,
        rng: &mut R,
    ) -> Result<AmplitudeSamples> {
        if n_rnd == 0 {
            return Err(GctsError::config("number of random samples must be positive"));
        }
        let corners = self.corners(wrms, dof)?;
        let wrms_patch = BilinearPatch::from_corners(corners.wrms);
        let white_patch = BilinearPatch::from_corners(corners.white);
        let flicker_patch = BilinearPatch::from_corners(corners.flicker);

        let mut draw = |patch: &BilinearPatch| -> (Vec<f64>, Vec<f64>) {
            (0..n_rnd)
                .map(|_| {
                    let u: f64 = rng.gen();
                    let v: f64 = rng.gen();
                    let amp = patch.eval(u, v);
                    (wrms_patch.eval(u, v), if amp > 0.0 { amp } else { f64::NAN })
                })
                .unzip()
        };
        let (white_wrms, white) = draw(&white_patch);
        let (flicker_wrms, flicker) = draw(&flicker_patch);

        let samples = AmplitudeSamples {
            white_wrms,
            white,
            flicker_wrms,
            flicker,
        };
        let invalid = 2 * n_rnd - samples.valid_white().len() - samples.valid_flicker().len();
        if invalid > 0 {
            log::warn!("{invalid} of {} amplitude samples were non-positive", 2 * n_rnd);
        }
        Ok(samples)
    }
}

/// One-shot form of [`SearchSpace::new`] followed by [`SearchSpace::sample`].
pub fn estimate_search_space<R: Rng + ?Sized>(
    calibration: &CalibrationSet,
    alpha: f64,
    wrms: f64,
    dof: usize,
    n_rnd: usize,
    rng: &mut R,
) -> Result<AmplitudeSamples> {
    SearchSpace::new(calibration, alpha)?.sample(wrms, dof, n_rnd, rng)
}
