//! Small statistics helpers shared by the estimators.

/// Small epsilon for numerical comparisons (e.g., avoiding division by zero).
pub const NUMERICAL_EPS: f64 = 1e-10;

/// Default convergence tolerance for iterative algorithms.
pub const DEFAULT_CONVERGENCE_TOL: f64 = 1e-4;

/// Days per year used to normalize trends and decimal years.
pub const DAYS_PER_YEAR: f64 = 365.25;

/// Sort a copy of the values in ascending order, NaNs last.
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

/// Median of the values.
///
/// For an even count the two middle elements are averaged. Returns NaN for
/// an empty slice.
pub fn median(values: &[f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    let s = sorted(values);
    if n % 2 == 1 {
        s[n / 2]
    } else {
        0.5 * (s[n / 2 - 1] + s[n / 2])
    }
}

/// Order statistic at `floor(p * n)` of an ascending slice.
///
/// This is the quantile rule used by the interquartile-range outlier bounds:
/// no interpolation between neighbours.
///
/// # Arguments
/// * `sorted` - Values in ascending order
/// * `p` - Probability in \[0, 1\]
pub fn floor_quantile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let idx = ((p * n as f64).floor() as usize).min(n - 1);
    sorted[idx]
}

/// Root of the sum of squares divided by `denom`.
pub fn root_mean_square(values: &[f64], denom: usize) -> f64 {
    if denom == 0 {
        return f64::NAN;
    }
    let ss: f64 = values.iter().map(|v| v * v).sum();
    (ss / denom as f64).sqrt()
}
