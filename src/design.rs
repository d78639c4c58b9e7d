//! Design matrix for trend, offset and seasonal estimation.
//!
//! Column layout is fixed: intercept, linear trend, one step column per
//! declared offset (declaration order), then a `(sin, cos)` pair per
//! seasonal period (declaration order, harmonics low to high within a family).

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::epoch::{from_epoch, DateFormat, Epoch};
use crate::error::{GctsError, Result};
use crate::helpers::DAYS_PER_YEAR;

/// Named base cycles that can be requested with their harmonics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleFamily {
    /// Tropical year, 365.25 days.
    Tropical,
    /// Draconitic year, 354.60 days.
    Draconitic,
    /// Chandler wobble, 433.00 days.
    Chandler,
}

impl CycleFamily {
    pub fn base_days(self) -> f64 {
        match self {
            CycleFamily::Tropical => 365.25,
            CycleFamily::Draconitic => 354.60,
            CycleFamily::Chandler => 433.00,
        }
    }

    fn letter(self) -> char {
        match self {
            CycleFamily::Tropical => 'T',
            CycleFamily::Draconitic => 'D',
            CycleFamily::Chandler => 'C',
        }
    }
}

/// One entry of the seasonal period list.
///
/// Tokens `T<k>`, `D<k>` and `C<k>` request `k` harmonics of a named cycle
/// (`base / 2^j` for `j = 0..k`); any other token is a period in days.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum SeasonalPeriod {
    Family { family: CycleFamily, harmonics: u32 },
    Days(f64),
}

impl SeasonalPeriod {
    /// Expanded periods in days.
    pub fn periods(&self) -> Vec<f64> {
        match *self {
            SeasonalPeriod::Family { family, harmonics } => (0..harmonics)
                .map(|j| family.base_days() / 2f64.powi(j as i32))
                .collect(),
            SeasonalPeriod::Days(days) => vec![days],
        }
    }
}

impl FromStr for SeasonalPeriod {
    type Err = GctsError;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim();
        let family = match token.chars().next() {
            Some('T') => Some(CycleFamily::Tropical),
            Some('D') => Some(CycleFamily::Draconitic),
            Some('C') => Some(CycleFamily::Chandler),
            _ => None,
        };
        if let Some(family) = family {
            let harmonics = token[1..].parse::<u32>().map_err(|_| {
                GctsError::config(format!(
                    "invalid period token '{token}': expected {}<harmonics>",
                    family.letter()
                ))
            })?;
            if harmonics == 0 {
                return Err(GctsError::config(format!(
                    "period token '{token}' requests zero harmonics"
                )));
            }
            return Ok(SeasonalPeriod::Family { family, harmonics });
        }
        let days = token
            .parse::<f64>()
            .map_err(|_| GctsError::config(format!("invalid period token '{token}'")))?;
        if !(days.is_finite() && days > 0.0) {
            return Err(GctsError::config(format!(
                "period must be a positive number of days, got '{token}'"
            )));
        }
        Ok(SeasonalPeriod::Days(days))
    }
}

impl fmt::Display for SeasonalPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SeasonalPeriod::Family { family, harmonics } => {
                write!(f, "{}{}", family.letter(), harmonics)
            }
            SeasonalPeriod::Days(days) => write!(f, "{days}"),
        }
    }
}

/// Flatten a period list into days, preserving order.
pub fn expand_periods(periods: &[SeasonalPeriod]) -> Vec<f64> {
    periods.iter().flat_map(SeasonalPeriod::periods).collect()
}

/// What a design-matrix column estimates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    Intercept,
    Trend,
    /// Step at the given epoch (MJD).
    Offset { epoch: f64 },
    /// Sine term of the given period (days).
    Sine { period: f64 },
    /// Cosine term of the given period (days).
    Cosine { period: f64 },
}

impl ParameterKind {
    /// Human-readable name; offset epochs are written in `format`.
    pub fn name(&self, format: DateFormat) -> String {
        match *self {
            ParameterKind::Intercept => "intercept".to_string(),
            ParameterKind::Trend => "trend".to_string(),
            ParameterKind::Offset { epoch } => {
                format!("offset at {}", from_epoch(Epoch::from_mjd(epoch), format))
            }
            ParameterKind::Sine { period } => format!("sin {period:10.4}"),
            ParameterKind::Cosine { period } => format!("cos {period:10.4}"),
        }
    }

    /// Unit of the estimate given the observation unit.
    pub fn unit(&self, unit: &str) -> String {
        match self {
            ParameterKind::Trend => format!("{unit}/year"),
            _ => unit.to_string(),
        }
    }
}

/// Builder for [`DesignMatrix`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DesignMatrixBuilder {
    /// Offset epochs (MJD) in declaration order.
    pub offsets: Vec<f64>,
    /// Seasonal periods in days, already expanded.
    pub periods: Vec<f64>,
    /// Normalizing frequency for the trend column (days per year).
    pub frequency: f64,
}

impl Default for DesignMatrixBuilder {
    fn default() -> Self {
        Self {
            offsets: Vec::new(),
            periods: Vec::new(),
            frequency: DAYS_PER_YEAR,
        }
    }
}

impl DesignMatrixBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offsets(mut self, offsets: Vec<f64>) -> Self {
        self.offsets = offsets;
        self
    }

    pub fn with_periods(mut self, periods: &[SeasonalPeriod]) -> Self {
        self.periods = expand_periods(periods);
        self
    }

    pub fn with_period_days(mut self, days: Vec<f64>) -> Self {
        self.periods = days;
        self
    }

    pub fn with_frequency(mut self, frequency: f64) -> Self {
        self.frequency = frequency;
        self
    }

    /// Number of columns the built matrix will have.
    pub fn n_params(&self) -> usize {
        2 + self.offsets.len() + 2 * self.periods.len()
    }

    /// Column descriptions in layout order.
    pub fn parameters(&self) -> Vec<ParameterKind> {
        let mut params = vec![ParameterKind::Intercept, ParameterKind::Trend];
        params.extend(self.offsets.iter().map(|&epoch| ParameterKind::Offset { epoch }));
        for &period in &self.periods {
            params.push(ParameterKind::Sine { period });
            params.push(ParameterKind::Cosine { period });
        }
        params
    }

    /// Build the design matrix for the given epochs (MJD).
    ///
    /// Fails on an empty epoch list, non-finite epochs, a non-positive
    /// frequency or period, or when there are fewer epochs than columns.
    pub fn build(&self, epochs: &[f64]) -> Result<DesignMatrix> {
        if epochs.is_empty() {
            return Err(GctsError::data("cannot build a design matrix without epochs"));
        }
        if epochs.iter().any(|t| !t.is_finite()) {
            return Err(GctsError::data("epochs must be finite"));
        }
        if !(self.frequency.is_finite() && self.frequency > 0.0) {
            return Err(GctsError::config(format!(
                "frequency must be positive, got {}",
                self.frequency
            )));
        }
        if let Some(p) = self.periods.iter().find(|p| !(p.is_finite() && **p > 0.0)) {
            return Err(GctsError::config(format!("period must be positive, got {p}")));
        }

        let n = epochs.len();
        let m = self.n_params();
        if n < m {
            return Err(GctsError::InsufficientData {
                observations: n,
                parameters: m,
            });
        }

        let t0 = epochs[0];
        let n_off = self.offsets.len();
        let matrix = DMatrix::from_fn(n, m, |i, j| {
            let dt = epochs[i] - t0;
            match j {
                0 => 1.0,
                1 => dt / self.frequency,
                j if j < 2 + n_off => {
                    if epochs[i] >= self.offsets[j - 2] {
                        1.0
                    } else {
                        0.0
                    }
                }
                j => {
                    let k = j - 2 - n_off;
                    let phase = 2.0 * PI * dt / self.periods[k / 2];
                    if k % 2 == 0 {
                        phase.sin()
                    } else {
                        phase.cos()
                    }
                }
            }
        });

        log::debug!("design matrix {n}x{m} ({n_off} offsets, {} periods)", self.periods.len());

        Ok(DesignMatrix {
            matrix,
            parameters: self.parameters(),
        })
    }
}

/// A design matrix together with the meaning of each column.
#[derive(Clone, Debug, PartialEq)]
pub struct DesignMatrix {
    pub matrix: DMatrix<f64>,
    pub parameters: Vec<ParameterKind>,
}

impl DesignMatrix {
    #[inline]
    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    /// `(name, unit)` for each column.
    pub fn labels(&self, unit: &str, format: DateFormat) -> Vec<(String, String)> {
        self.parameters
            .iter()
            .map(|p| (p.name(format), p.unit(unit)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_tokens() {
        let t3: SeasonalPeriod = "T3".parse().unwrap();
        assert_eq!(t3.periods(), vec![365.25, 182.625, 91.3125]);
        let d1: SeasonalPeriod = "D1".parse().unwrap();
        assert_eq!(d1.periods(), vec![354.60]);
        let c2: SeasonalPeriod = "C2".parse().unwrap();
        assert_eq!(c2.periods(), vec![433.0, 216.5]);
        let days: SeasonalPeriod = "13.66".parse().unwrap();
        assert_eq!(days, SeasonalPeriod::Days(13.66));

        assert!("T".parse::<SeasonalPeriod>().is_err());
        assert!("T0".parse::<SeasonalPeriod>().is_err());
        assert!("-5".parse::<SeasonalPeriod>().is_err());
        assert!("weekly".parse::<SeasonalPeriod>().is_err());
    }

    #[test]
    fn test_expand_keeps_declaration_order() {
        let periods = vec![SeasonalPeriod::Days(14.0), "T2".parse().unwrap()];
        assert_eq!(expand_periods(&periods), vec![14.0, 365.25, 182.625]);
    }

    #[test]
    fn test_trend_only_shape() {
        let epochs: Vec<f64> = (0..10).map(|i| 56604.0 + i as f64).collect();
        let dm = DesignMatrixBuilder::new().build(&epochs).unwrap();
        assert_eq!(dm.matrix.shape(), (10, 2));
        assert!(dm.matrix.column(0).iter().all(|&v| v == 1.0));
        assert!((dm.matrix[(9, 1)] - 9.0 / 365.25).abs() < 1e-15);
    }

    #[test]
    fn test_offset_steps_at_epoch() {
        let epochs: Vec<f64> = (0..6).map(|i| 100.0 + i as f64).collect();
        let dm = DesignMatrixBuilder::new()
            .with_offsets(vec![103.0, 101.5])
            .build(&epochs)
            .unwrap();
        let first: Vec<f64> = dm.matrix.column(2).iter().copied().collect();
        let second: Vec<f64> = dm.matrix.column(3).iter().copied().collect();
        assert_eq!(first, vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        assert_eq!(second, vec![0.0, 0.0, 1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_seasonal_columns() {
        let epochs: Vec<f64> = (0..400).map(|i| 56000.0 + i as f64).collect();
        let dm = DesignMatrixBuilder::new()
            .with_periods(&["T1".parse().unwrap()])
            .build(&epochs)
            .unwrap();
        assert_eq!(dm.ncols(), 4);
        assert_eq!(dm.matrix[(0, 2)], 0.0);
        assert_eq!(dm.matrix[(0, 3)], 1.0);
        let i = 91;
        let phase = 2.0 * PI * i as f64 / 365.25;
        assert!((dm.matrix[(i, 2)] - phase.sin()).abs() < 1e-12);
        assert!((dm.matrix[(i, 3)] - phase.cos()).abs() < 1e-12);
        assert_eq!(
            dm.parameters[2..],
            [
                ParameterKind::Sine { period: 365.25 },
                ParameterKind::Cosine { period: 365.25 }
            ]
        );
    }

    #[test]
    fn test_too_few_epochs() {
        let err = DesignMatrixBuilder::new()
            .with_period_days(vec![365.25])
            .build(&[1.0, 2.0, 3.0])
            .unwrap_err();
        assert!(matches!(
            err,
            GctsError::InsufficientData {
                observations: 3,
                parameters: 4
            }
        ));
    }

    #[test]
    fn test_labels() {
        let dm = DesignMatrixBuilder::new()
            .with_offsets(vec![56658.0])
            .with_period_days(vec![365.25])
            .build(&(0..10).map(|i| 56650.0 + i as f64).collect::<Vec<_>>())
            .unwrap();
        let labels = dm.labels("mm", DateFormat::Ymd);
        assert_eq!(labels[0], ("intercept".to_string(), "mm".to_string()));
        assert_eq!(labels[1], ("trend".to_string(), "mm/year".to_string()));
        assert_eq!(labels[2].0, "offset at 2014 1 1");
        assert_eq!(labels[3].0, "sin   365.2500");
        assert_eq!(labels[4].0, "cos   365.2500");
    }
}
