//! Iterative outlier rejection.
//!
//! The loop re-fits an unweighted model to the retained rows, derives residual
//! bounds with one of three rules and drops every row outside them, until a
//! pass removes nothing:
//!
//! - `IQrange`: `MED ± scale·(Q3 − Q1)` with floor-index quartiles
//! - `median`: `|r − median| > scale·MAD`, `MAD = 1.4826·median|r − median|`
//!   (or `1.2533/n·Σ|r − median|` when that median is zero)
//! - `Nsigma`: `|r| > scale·sqrt(Σr²/dof)`
//!
//! Design rows, values, sigmas and dates live in one [`ObservationTable`] so
//! row removal can never leave them out of step.

use std::fmt;
use std::str::FromStr;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::epoch::DateRepr;
use crate::error::{GctsError, Result};
use crate::helpers::{floor_quantile, median, root_mean_square, sorted};
use crate::lsq::fit;

const MAD_SCALE: f64 = 1.4826;
const MEAN_ABS_SCALE: f64 = 1.2533;

/// Residual rule used to flag outliers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutlierMethod {
    InterquartileRange,
    Median,
    NSigma,
}

impl OutlierMethod {
    pub fn tag(self) -> &'static str {
        match self {
            OutlierMethod::InterquartileRange => "IQrange",
            OutlierMethod::Median => "median",
            OutlierMethod::NSigma => "Nsigma",
        }
    }
}

impl FromStr for OutlierMethod {
    type Err = GctsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "IQrange" => Ok(OutlierMethod::InterquartileRange),
            "median" => Ok(OutlierMethod::Median),
            "Nsigma" => Ok(OutlierMethod::NSigma),
            other => Err(GctsError::config(format!(
                "unknown outlier method '{other}' (expected IQrange, median or Nsigma)"
            ))),
        }
    }
}

impl fmt::Display for OutlierMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Outlier rule and its scale factor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    pub method: OutlierMethod,
    pub scale: f64,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            method: OutlierMethod::InterquartileRange,
            scale: 3.0,
        }
    }
}

impl OutlierConfig {
    pub fn new(method: OutlierMethod, scale: f64) -> Self {
        Self { method, scale }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(GctsError::config(format!(
                "outlier scale must be positive, got {}",
                self.scale
            )));
        }
        Ok(())
    }
}

/// Design rows with their observations and dates, kept in lockstep.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservationTable {
    design: DMatrix<f64>,
    values: Vec<f64>,
    sigmas: Vec<f64>,
    dates: Vec<DateRepr>,
}

impl ObservationTable {
    pub fn new(
        design: DMatrix<f64>,
        values: Vec<f64>,
        sigmas: Vec<f64>,
        dates: Vec<DateRepr>,
    ) -> Result<Self> {
        let n = design.nrows();
        if values.len() != n || sigmas.len() != n || dates.len() != n {
            return Err(GctsError::config(format!(
                "table columns differ in length: design {n}, values {}, sigmas {}, dates {}",
                values.len(),
                sigmas.len(),
                dates.len()
            )));
        }
        Ok(Self {
            design,
            values,
            sigmas,
            dates,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn design(&self) -> &DMatrix<f64> {
        &self.design
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn sigmas(&self) -> &[f64] {
        &self.sigmas
    }

    pub fn dates(&self) -> &[DateRepr] {
        &self.dates
    }

    /// Remove the rows at `indices` (ascending, distinct) and return them.
    fn take_rows(&mut self, indices: &[usize]) -> RejectedRows {
        let mut removed = RejectedRows::default();
        let mut drop = vec![false; self.len()];
        for &i in indices {
            drop[i] = true;
            removed.values.push(self.values[i]);
            removed.sigmas.push(self.sigmas[i]);
            removed.dates.push(self.dates[i]);
        }
        drop_rows(&mut self.values, &drop);
        drop_rows(&mut self.sigmas, &drop);
        drop_rows(&mut self.dates, &drop);
        let design = std::mem::replace(&mut self.design, DMatrix::zeros(0, 0));
        self.design = design.remove_rows_at(indices);
        removed
    }
}

fn drop_rows<T>(col: &mut Vec<T>, drop: &[bool]) {
    let mut k = 0;
    col.retain(|_| {
        let keep = !drop[k];
        k += 1;
        keep
    });
}

/// Rows removed by the rejection loop, in removal order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RejectedRows {
    pub values: Vec<f64>,
    pub sigmas: Vec<f64>,
    pub dates: Vec<DateRepr>,
    /// Pass (1-based) in which each row was removed.
    pub pass: Vec<usize>,
}

impl RejectedRows {
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Summary of one rejection pass.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub pass: usize,
    pub method: OutlierMethod,
    pub scale: f64,
    /// Residual bounds; rows strictly outside are removed.
    pub lower: f64,
    pub upper: f64,
    pub removed: usize,
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:2}\t{:>8}\t{:7.2}\t\t{:6}",
            self.pass,
            self.method.tag(),
            self.scale,
            self.removed
        )
    }
}

/// Outcome of the rejection loop.
#[derive(Clone, Debug, PartialEq)]
pub struct OutlierRejection {
    pub retained: ObservationTable,
    pub outliers: RejectedRows,
    pub passes: Vec<PassReport>,
}

/// Residual bounds of one rule.
///
/// `dof` is only used by `Nsigma`.
pub fn residual_bounds(residuals: &[f64], dof: usize, config: &OutlierConfig) -> (f64, f64) {
    let scale = config.scale;
    match config.method {
        OutlierMethod::InterquartileRange => {
            let s = sorted(residuals);
            let iq = floor_quantile(&s, 0.75) - floor_quantile(&s, 0.25);
            let med = floor_quantile(&s, 0.5);
            (med - scale * iq, med + scale * iq)
        }
        OutlierMethod::Median => {
            let med = median(residuals);
            let dev: Vec<f64> = residuals.iter().map(|r| (r - med).abs()).collect();
            let inner = median(&dev);
            let mad = if inner == 0.0 {
                MEAN_ABS_SCALE / dev.len() as f64 * dev.iter().sum::<f64>()
            } else {
                MAD_SCALE * inner
            };
            (med - scale * mad, med + scale * mad)
        }
        OutlierMethod::NSigma => {
            let wrms = root_mean_square(residuals, dof);
            (-scale * wrms, scale * wrms)
        }
    }
}

enum RejectionState {
    Fitting,
    Converged,
}

/// Run the rejection loop until a pass removes nothing.
///
/// # Errors
/// Solver errors of any pass, or [`GctsError::InsufficientData`] when a pass
/// would leave no more rows than parameters.
pub fn reject_outliers(
    mut table: ObservationTable,
    config: &OutlierConfig,
) -> Result<OutlierRejection> {
    config.validate()?;
    let m = table.design.ncols();
    let mut outliers = RejectedRows::default();
    let mut passes = Vec::new();
    let mut state = RejectionState::Fitting;

    while let RejectionState::Fitting = state {
        let pass = passes.len() + 1;
        let res = fit(&table.design, &table.values, None)?;
        let (lower, upper) = residual_bounds(&res.residuals, res.dof, config);
        let flagged: Vec<usize> = res
            .residuals
            .iter()
            .enumerate()
            .filter(|(_, r)| **r < lower || **r > upper)
            .map(|(i, _)| i)
            .collect();

        log::debug!(
            "pass {pass} ({} x{}): bounds [{lower:.6}, {upper:.6}], {} flagged",
            config.method,
            config.scale,
            flagged.len()
        );
        passes.push(PassReport {
            pass,
            method: config.method,
            scale: config.scale,
            lower,
            upper,
            removed: flagged.len(),
        });

        if flagged.is_empty() {
            state = RejectionState::Converged;
            continue;
        }
        let remaining = table.len() - flagged.len();
        if remaining <= m {
            return Err(GctsError::InsufficientData {
                observations: remaining,
                parameters: m,
            });
        }
        let removed = table.take_rows(&flagged);
        outliers.pass.extend(std::iter::repeat(pass).take(removed.len()));
        outliers.values.extend(removed.values);
        outliers.sigmas.extend(removed.sigmas);
        outliers.dates.extend(removed.dates);
    }

    log::info!(
        "{} outliers removed in {} passes ({} rows kept)",
        outliers.len(),
        passes.len(),
        table.len()
    );

    Ok(OutlierRejection {
        retained: table,
        outliers,
        passes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trend_table(values: Vec<f64>) -> ObservationTable {
        let n = values.len();
        let design = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { i as f64 / 365.25 });
        let dates = (0..n).map(|i| DateRepr::Mjd(56604.0 + i as f64)).collect();
        ObservationTable::new(design, values, vec![0.5; n], dates).unwrap()
    }

    fn clean_values() -> Vec<f64> {
        (0..100)
            .map(|i| 1.0 + 2.0 * (i as f64 / 365.25) + 0.5 * (17.3 * i as f64).sin())
            .collect()
    }

    #[test]
    fn test_method_tags() {
        for method in [
            OutlierMethod::InterquartileRange,
            OutlierMethod::Median,
            OutlierMethod::NSigma,
        ] {
            assert_eq!(method.tag().parse::<OutlierMethod>().unwrap(), method);
        }
        assert!("iqr".parse::<OutlierMethod>().is_err());
    }

    #[test]
    fn test_iqr_removes_single_spike() {
        let mut values = clean_values();
        values[50] += 10.0 * 0.35578;
        let out = reject_outliers(trend_table(values), &OutlierConfig::default()).unwrap();
        assert_eq!(out.passes.len(), 2);
        assert_eq!(out.passes[0].removed, 1);
        assert_eq!(out.passes[1].removed, 0);
        assert_eq!(out.outliers.dates, vec![DateRepr::Mjd(56654.0)]);
        assert_eq!(out.outliers.pass, vec![1]);
        assert_eq!(out.retained.len(), 99);
        assert_eq!(out.retained.design().nrows(), 99);
        assert!(!out.retained.dates().contains(&DateRepr::Mjd(56654.0)));
    }

    #[test]
    fn test_rows_stay_aligned() {
        let mut values = clean_values();
        values[10] -= 8.0;
        values[70] += 8.0;
        let out = reject_outliers(trend_table(values.clone()), &OutlierConfig::default()).unwrap();
        let table = &out.retained;
        for (k, date) in table.dates().iter().enumerate() {
            let DateRepr::Mjd(mjd) = *date else {
                panic!("unexpected date {date:?}")
            };
            let i = (mjd - 56604.0) as usize;
            assert_eq!(table.values()[k], values[i]);
            assert!((table.design()[(k, 1)] - i as f64 / 365.25).abs() < 1e-15);
        }
        let mut removed = out.outliers.dates.clone();
        removed.sort_by(|a, b| format!("{a}").cmp(&format!("{b}")));
        assert_eq!(removed, vec![DateRepr::Mjd(56614.0), DateRepr::Mjd(56674.0)]);
    }

    #[test]
    fn test_rejection_is_idempotent() {
        let mut values = clean_values();
        values[30] += 6.0;
        for method in [
            OutlierMethod::InterquartileRange,
            OutlierMethod::Median,
            OutlierMethod::NSigma,
        ] {
            let cfg = OutlierConfig::new(method, 3.0);
            let first = reject_outliers(trend_table(values.clone()), &cfg).unwrap();
            assert_eq!(first.passes.last().map(|p| p.removed), Some(0));
            let second = reject_outliers(first.retained.clone(), &cfg).unwrap();
            assert_eq!(second.passes.len(), 1, "{method}");
            assert!(second.outliers.is_empty());
            assert_eq!(second.retained, first.retained);
        }
    }

    #[test]
    fn test_median_rule_with_zero_mad() {
        let residuals = [0.0, 0.0, 0.0, 0.0, 4.0];
        let cfg = OutlierConfig::new(OutlierMethod::Median, 3.0);
        let (lo, hi) = residual_bounds(&residuals, 3, &cfg);
        let mad = 1.2533 / 5.0 * 4.0;
        assert!((hi - 3.0 * mad).abs() < 1e-12);
        assert!((lo + 3.0 * mad).abs() < 1e-12);
        assert!(4.0 > hi);
    }

    #[test]
    fn test_nsigma_bounds_use_dof() {
        let residuals = [1.0, -1.0, 2.0, -2.0];
        let cfg = OutlierConfig::new(OutlierMethod::NSigma, 2.0);
        let (lo, hi) = residual_bounds(&residuals, 2, &cfg);
        assert!((hi - 2.0 * 5.0_f64.sqrt()).abs() < 1e-12);
        assert_eq!(lo, -hi);
    }

    #[test]
    fn test_insufficient_rows() {
        let values = vec![0.0, 0.0, 0.0, 100.0, -100.0];
        let n = values.len();
        let design = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { i as f64 });
        let dates = (0..n).map(|i| DateRepr::Mjd(i as f64)).collect();
        let table = ObservationTable::new(design, values, vec![1.0; n], dates).unwrap();
        let cfg = OutlierConfig::new(OutlierMethod::NSigma, 0.1);
        assert!(matches!(
            reject_outliers(table, &cfg),
            Err(GctsError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_table_length_mismatch() {
        let design = DMatrix::zeros(3, 2);
        let dates = vec![DateRepr::Mjd(0.0); 3];
        assert!(ObservationTable::new(design, vec![1.0; 3], vec![1.0; 2], dates).is_err());
    }
}
