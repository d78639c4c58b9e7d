//! Weighted least-squares solver.
//!
//! Solves `(PᵀA)ᵀ(PᵀA)·X = (PᵀA)ᵀ(PᵀL)` where `P` is a lower-triangular
//! factor of the inverse observation covariance (`P·Pᵀ = C⁻¹`). Without a
//! weight factor this reduces to the ordinary normal equations.
//!
//! Every estimator in the crate goes through [`fit`].

use nalgebra::{Cholesky, DMatrix, DVector};

use crate::error::{GctsError, Result};
use crate::helpers::root_mean_square;

/// Lower-triangular weight factor `P` with `P·Pᵀ = C⁻¹`.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightFactor {
    lower: DMatrix<f64>,
}

impl WeightFactor {
    /// Identity weighting (equivalent to an unweighted solve).
    pub fn identity(n: usize) -> Self {
        Self {
            lower: DMatrix::identity(n, n),
        }
    }

    /// Wrap an existing lower-triangular factor.
    pub fn from_lower(lower: DMatrix<f64>) -> Result<Self> {
        if !lower.is_square() {
            return Err(GctsError::config(format!(
                "weight factor must be square, got {}x{}",
                lower.nrows(),
                lower.ncols()
            )));
        }
        Ok(Self { lower })
    }

    /// Factor the inverse of a symmetric positive-definite covariance.
    pub fn from_covariance(covariance: &DMatrix<f64>) -> Result<Self> {
        let n = covariance.nrows();
        if !covariance.is_square() {
            return Err(GctsError::config(format!(
                "covariance must be square, got {}x{}",
                n,
                covariance.ncols()
            )));
        }
        let inverse = Cholesky::new(covariance.clone())
            .ok_or_else(|| {
                GctsError::numerical(
                    format!("covariance factorization ({n}x{n})"),
                    "matrix is not positive definite",
                )
            })?
            .inverse();
        // Restore exact symmetry lost in the inversion.
        let inverse = (&inverse + inverse.transpose()) * 0.5;
        let chol = Cholesky::new(inverse).ok_or_else(|| {
            GctsError::numerical(
                format!("weight factorization ({n}x{n})"),
                "inverse covariance is not positive definite",
            )
        })?;
        Ok(Self { lower: chol.l() })
    }

    #[inline]
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.lower
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.lower.nrows()
    }
}

/// Output of one least-squares solve.
#[derive(Clone, Debug, PartialEq)]
pub struct FitResult {
    /// Estimated parameters, one per design-matrix column.
    pub parameters: Vec<f64>,
    /// Formal standard errors, `s0·sqrt(diag(N⁻¹))`.
    pub std_errors: Vec<f64>,
    /// Standard deviation of unit weight.
    pub s0: f64,
    /// Unweighted residuals `A·X − L`.
    pub residuals: Vec<f64>,
    /// Degrees of freedom `n − m`.
    pub dof: usize,
}

impl FitResult {
    /// Model values `A·X`.
    pub fn fitted(&self, observations: &[f64]) -> Vec<f64> {
        self.residuals
            .iter()
            .zip(observations)
            .map(|(r, l)| r + l)
            .collect()
    }

    /// `sqrt(Σr²/n)` of the unweighted residuals.
    pub fn wrms(&self) -> f64 {
        root_mean_square(&self.residuals, self.residuals.len())
    }
}

/// Solve the (optionally weighted) least-squares problem `A·X ≈ L`.
///
/// # Arguments
/// * `design` - Design matrix `A` (n x m)
/// * `observations` - Observation vector `L` of length n
/// * `weight` - Optional lower-triangular factor `P` (n x n)
///
/// # Errors
/// * [`GctsError::Configuration`] on mismatched lengths
/// * [`GctsError::InsufficientData`] when `n < m`
/// * [`GctsError::Numerical`] when `dof = 0` or the normal matrix is singular
pub fn fit(
    design: &DMatrix<f64>,
    observations: &[f64],
    weight: Option<&WeightFactor>,
) -> Result<FitResult> {
    let (n, m) = design.shape();
    if observations.len() != n {
        return Err(GctsError::config(format!(
            "design matrix has {n} rows but {} observations were given",
            observations.len()
        )));
    }
    if let Some(w) = weight {
        if w.dim() != n {
            return Err(GctsError::config(format!(
                "weight factor is {0}x{0} but there are {n} observations",
                w.dim()
            )));
        }
    }
    if n < m {
        return Err(GctsError::InsufficientData {
            observations: n,
            parameters: m,
        });
    }
    let context = || {
        format!(
            "{} solve ({n}x{m})",
            if weight.is_some() { "weighted" } else { "unweighted" }
        )
    };
    if n == m {
        return Err(GctsError::numerical(context(), "zero degrees of freedom"));
    }
    let dof = n - m;

    let l = DVector::from_column_slice(observations);
    let (a_w, l_w) = match weight {
        Some(w) => (w.matrix().tr_mul(design), w.matrix().tr_mul(&l)),
        None => (design.clone(), l.clone()),
    };

    let normal = a_w.tr_mul(&a_w);
    let rhs = a_w.tr_mul(&l_w);

    let lu = normal.lu();
    let diag = lu.u().diagonal();
    let max_pivot = diag.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let min_pivot = diag.iter().fold(f64::INFINITY, |acc, v| acc.min(v.abs()));
    if !(max_pivot > 0.0 && min_pivot > max_pivot * f64::EPSILON * m as f64) {
        return Err(GctsError::numerical(context(), "singular normal matrix"));
    }
    let x = lu
        .solve(&rhs)
        .ok_or_else(|| GctsError::numerical(context(), "singular normal matrix"))?;
    let q = lu
        .try_inverse()
        .ok_or_else(|| GctsError::numerical(context(), "normal matrix is not invertible"))?;

    let residuals = design * &x - &l;
    let weighted_ss = match weight {
        Some(w) => w.matrix().tr_mul(&residuals).norm_squared(),
        None => residuals.norm_squared(),
    };
    let s0 = (weighted_ss / dof as f64).sqrt();
    let std_errors = q.diagonal().iter().map(|&v| s0 * v.max(0.0).sqrt()).collect();

    log::trace!("{}: s0 = {s0:.6}", context());

    Ok(FitResult {
        parameters: x.iter().copied().collect(),
        std_errors,
        s0,
        residuals: residuals.iter().copied().collect(),
        dof,
    })
}
