//! Linear quantile regression `y ≈ slope·x + intercept`.
//!
//! Minimizes the check loss `Σ r·(τ − 1{r<0})` with `r = y − fitted` using
//! argmin's Nelder–Mead solver, started from a simplex around the ordinary
//! least-squares line.

use argmin::core::{CostFunction, Error as ArgminError, Executor, State};
use argmin::solver::neldermead::NelderMead;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{GctsError, Result};
use crate::helpers::DEFAULT_CONVERGENCE_TOL;
use crate::lsq::fit;

/// Relative perturbation of non-zero seed coordinates.
const NONZERO_STEP: f64 = 0.05;
/// Absolute value used for seed coordinates that are exactly zero.
const ZERO_STEP: f64 = 0.00025;
/// Iteration limit per fitted parameter.
const ITERS_PER_PARAM: u64 = 200;

/// A fitted quantile line.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantileLine {
    pub slope: f64,
    pub intercept: f64,
    pub tau: f64,
}

impl QuantileLine {
    #[inline]
    pub fn eval(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Check (pinball) loss of the residuals `y − fitted` at quantile `tau`.
pub fn check_loss(residuals: impl IntoIterator<Item = f64>, tau: f64) -> f64 {
    residuals
        .into_iter()
        .map(|r| if r < 0.0 { r * (tau - 1.0) } else { r * tau })
        .sum()
}

/// Check loss of a candidate `[slope, intercept]`.
struct CheckLossProblem<'a> {
    x: &'a [f64],
    y: &'a [f64],
    tau: f64,
}

impl CostFunction for CheckLossProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, p: &Self::Param) -> std::result::Result<f64, ArgminError> {
        Ok(check_loss(
            self.x.iter().zip(self.y).map(|(&xi, &yi)| yi - (p[0] * xi + p[1])),
            self.tau,
        ))
    }
}

/// Starting simplex: the seed plus one vertex per coordinate, perturbed by 5 %
/// (or set to 0.00025 when the coordinate is zero).
fn initial_simplex(seed: &[f64]) -> Vec<Vec<f64>> {
    let mut simplex = Vec::with_capacity(seed.len() + 1);
    simplex.push(seed.to_vec());
    for k in 0..seed.len() {
        let mut vertex = seed.to_vec();
        vertex[k] = if vertex[k] != 0.0 {
            (1.0 + NONZERO_STEP) * vertex[k]
        } else {
            ZERO_STEP
        };
        simplex.push(vertex);
    }
    simplex
}

/// Fit the `tau` quantile of `y` as a linear function of `x`.
///
/// # Errors
/// [`GctsError::Configuration`] if `tau` is outside (0, 1) or the inputs have
/// different lengths; [`GctsError::Numerical`] from the OLS seed or the
/// simplex solver otherwise.
pub fn quantile_regression(x: &[f64], y: &[f64], tau: f64) -> Result<QuantileLine> {
    if !(tau > 0.0 && tau < 1.0) {
        return Err(GctsError::config(format!("tau must be in (0, 1), got {tau}")));
    }
    if x.len() != y.len() {
        return Err(GctsError::config(format!(
            "x and y must have the same length ({} != {})",
            x.len(),
            y.len()
        )));
    }

    let design = DMatrix::from_fn(x.len(), 2, |i, j| if j == 0 { x[i] } else { 1.0 });
    let seed = fit(&design, y, None)?;

    let problem = CheckLossProblem { x, y, tau };
    let solver = NelderMead::new(initial_simplex(&seed.parameters))
        .with_sd_tolerance(DEFAULT_CONVERGENCE_TOL)
        .map_err(|e| GctsError::numerical("quantile regression", e.to_string()))?;
    let res = Executor::new(problem, solver)
        .configure(|state| state.max_iters(ITERS_PER_PARAM * seed.parameters.len() as u64))
        .run()
        .map_err(|e| GctsError::numerical("quantile regression", e.to_string()))?;

    let state = res.state();
    let best = state
        .get_best_param()
        .ok_or_else(|| GctsError::numerical("quantile regression", "solver returned no vertex"))?;

    log::debug!(
        "quantile regression tau={tau:.4}: slope={:.6} intercept={:.6} loss={:.6} iters={}",
        best[0],
        best[1],
        state.get_best_cost(),
        state.get_iter()
    );

    Ok(QuantileLine {
        slope: best[0],
        intercept: best[1],
        tau,
    })
}
