//! Power-law (white + flicker) noise covariance.
//!
//! The coloured part of the noise is modelled as fractionally integrated
//! white noise of spectral index `kappa` (`-1` for flicker noise). For epochs
//! `t_0 < t_1 < ... < t_{n-1}` the transformation matrix is
//!
//! ```text
//! T[i,j] = Δt_j^(−κ/4) · J[i−j]      (i ≥ j, zero above the diagonal)
//! ```
//!
//! where `Δt_j` is the gap ending at epoch `j` in units of `1/frequency`
//! (the gap before the first epoch is one day) and `J` is the fractional
//! binomial sequence `Γ(k − κ/2) / (k! Γ(−κ/2))`. The unit-amplitude
//! coloured covariance is `C = T·Tᵀ`; the combined covariance for amplitudes
//! `(σ_w, σ_f)` is `σ_w²·I + σ_f²·C`.

use nalgebra::DMatrix;
use statrs::function::gamma::gamma;

use crate::error::{GctsError, Result};
use crate::lsq::WeightFactor;

/// Beyond this lag `J[k]` switches to its power-law asymptote.
pub const ASYMPTOTIC_LAG: usize = 150;

/// Transformation and covariance of a unit-amplitude power-law process.
#[derive(Clone, Debug, PartialEq)]
pub struct PowerLawNoise {
    /// Spectral index.
    pub kappa: f64,
    /// Lower-triangular transformation `T`.
    pub transform: DMatrix<f64>,
    /// Covariance `C = T·Tᵀ`.
    pub covariance: DMatrix<f64>,
}

impl PowerLawNoise {
    #[inline]
    pub fn dim(&self) -> usize {
        self.covariance.nrows()
    }

    /// `σ_w²·I + σ_f²·C`.
    pub fn combined_covariance(&self, white: f64, flicker: f64) -> DMatrix<f64> {
        let mut c = &self.covariance * (flicker * flicker);
        let w2 = white * white;
        for i in 0..self.dim() {
            c[(i, i)] += w2;
        }
        c
    }

    /// Weight factor `P` for the combined covariance of the given amplitudes.
    pub fn weight_factor(&self, white: f64, flicker: f64) -> Result<WeightFactor> {
        if !(white.is_finite() && flicker.is_finite()) || (white == 0.0 && flicker == 0.0) {
            return Err(GctsError::numerical(
                format!("noise weighting ({0}x{0})", self.dim()),
                format!("invalid amplitudes white={white}, flicker={flicker}"),
            ));
        }
        WeightFactor::from_covariance(&self.combined_covariance(white, flicker))
    }
}

/// Fractional binomial coefficients `J[0..n]` for spectral index `kappa`.
///
/// Lags up to [`ASYMPTOTIC_LAG`] use the exact gamma-ratio recurrence
/// `J[k] = J[k−1]·(k − 1 − κ/2)/k`; larger lags use `k^(−κ/2−1)/Γ(−κ/2)`.
pub fn fractional_coefficients(n: usize, kappa: f64) -> Vec<f64> {
    let d = -kappa / 2.0;
    let mut j = Vec::with_capacity(n);
    let mut prev = 1.0;
    for k in 0..n {
        let value = if k == 0 {
            1.0
        } else if k <= ASYMPTOTIC_LAG {
            prev * (k as f64 - 1.0 + d) / k as f64
        } else if d == 0.0 {
            0.0
        } else {
            (k as f64).powf(d - 1.0) / gamma(d)
        };
        j.push(value);
        prev = value;
    }
    j
}

/// Build the power-law noise model for the given epochs (MJD).
///
/// # Arguments
/// * `epochs` - Strictly increasing epochs
/// * `kappa` - Spectral index, `<= 0` (`-1` flicker, `0` white)
/// * `frequency` - Days per time unit of the gap scaling (365.25 for years)
pub fn build_noise_model(epochs: &[f64], kappa: f64, frequency: f64) -> Result<PowerLawNoise> {
    if !kappa.is_finite() || kappa > 0.0 {
        return Err(GctsError::config(format!(
            "spectral index must be finite and <= 0, got {kappa}"
        )));
    }
    if !(frequency.is_finite() && frequency > 0.0) {
        return Err(GctsError::config(format!(
            "frequency must be positive, got {frequency}"
        )));
    }
    if epochs.is_empty() {
        return Err(GctsError::data("cannot build a noise model without epochs"));
    }
    if epochs.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(GctsError::data("epochs must be strictly increasing"));
    }

    let n = epochs.len();
    let scale: Vec<f64> = (0..n)
        .map(|j| {
            let prev = if j == 0 { epochs[0] - 1.0 } else { epochs[j - 1] };
            ((epochs[j] - prev) / frequency).powf(-kappa / 4.0)
        })
        .collect();
    let coeffs = fractional_coefficients(n, kappa);

    let transform = DMatrix::from_fn(n, n, |i, j| {
        if i >= j {
            scale[j] * coeffs[i - j]
        } else {
            0.0
        }
    });
    let covariance = &transform * transform.transpose();

    log::debug!("power-law noise model {n}x{n}, kappa = {kappa}");

    Ok(PowerLawNoise {
        kappa,
        transform,
        covariance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn irregular_epochs() -> Vec<f64> {
        [0.0, 2.0, 7.0, 8.0, 69.0, 112.0, 252.0, 326.0, 334.0, 492.0]
            .iter()
            .map(|d| 56604.0 + d)
            .collect()
    }

    #[test]
    fn test_flicker_coefficients() {
        let j = fractional_coefficients(4, -1.0);
        let expected = [1.0, 0.5, 0.375, 0.3125];
        for (a, b) in j.iter().zip(expected) {
            assert!((a - b).abs() < 1e-15);
        }
    }

    #[test]
    fn test_coefficients_match_gamma_ratio() {
        let j = fractional_coefficients(40, -1.0);
        for k in [5usize, 20, 39] {
            let mut factorial = 1.0;
            for i in 1..=k {
                factorial *= i as f64;
            }
            let exact = gamma(k as f64 + 0.5) / (factorial * gamma(0.5));
            assert!((j[k] - exact).abs() / exact < 1e-10, "lag {k}");
        }
    }

    #[test]
    fn test_asymptote_is_continuous() {
        let j = fractional_coefficients(200, -1.0);
        let ratio = j[ASYMPTOTIC_LAG + 1] / j[ASYMPTOTIC_LAG];
        assert!((ratio - 1.0).abs() < 0.01, "ratio {ratio}");
    }

    #[test]
    fn test_white_index_gives_identity() {
        let model = build_noise_model(&irregular_epochs(), 0.0, 365.25).unwrap();
        let n = model.dim();
        let identity = DMatrix::<f64>::identity(n, n);
        assert!((&model.covariance - identity).abs().max() < 1e-15);
    }

    #[test]
    fn test_covariance_symmetric_positive_diagonal() {
        for kappa in [-0.5, -1.0, -1.5, -2.0] {
            let model = build_noise_model(&irregular_epochs(), kappa, 365.25).unwrap();
            let c = &model.covariance;
            assert!((c - c.transpose()).abs().max() < 1e-14);
            assert!(c.diagonal().iter().all(|&v| v > 0.0));
            assert!(model.weight_factor(1.0, 2.0).is_ok());
        }
    }

    #[test]
    fn test_transform_uses_column_gap() {
        let epochs = irregular_epochs();
        let model = build_noise_model(&epochs, -1.0, 365.25).unwrap();
        let t = &model.transform;
        let gap = |j: usize| (epochs[j] - epochs[j - 1]) / 365.25;
        assert!((t[(4, 4)] - gap(4).powf(0.25)).abs() < 1e-15);
        assert!((t[(5, 4)] - 0.5 * gap(4).powf(0.25)).abs() < 1e-15);
        assert!((t[(0, 0)] - (1.0 / 365.25f64).powf(0.25)).abs() < 1e-15);
        assert_eq!(t[(3, 5)], 0.0);
    }

    #[test]
    fn test_combined_covariance() {
        let model = build_noise_model(&irregular_epochs(), -1.0, 365.25).unwrap();
        let c = model.combined_covariance(2.0, 3.0);
        assert!((c[(0, 0)] - (4.0 + 9.0 * model.covariance[(0, 0)])).abs() < 1e-12);
        assert!((c[(2, 1)] - 9.0 * model.covariance[(2, 1)]).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            build_noise_model(&irregular_epochs(), 0.5, 365.25),
            Err(GctsError::Configuration(_))
        ));
        assert!(matches!(
            build_noise_model(&[1.0, 1.0, 2.0], -1.0, 365.25),
            Err(GctsError::Data(_))
        ));
        let model = build_noise_model(&irregular_epochs(), -1.0, 365.25).unwrap();
        assert!(model.weight_factor(f64::NAN, 1.0).is_err());
    }
}
