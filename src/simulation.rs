//! Synthetic coordinate series.
//!
//! Observations are generated as
//!
//! ```text
//! L = A·x + σ_w·w₁ + σ_f·T·w₂
//! ```
//!
//! where `A·x` is the deterministic signal (intercept, trend, offsets and
//! seasonal terms laid out as in
//! [`DesignMatrixBuilder`](crate::design::DesignMatrixBuilder)), `w₁`, `w₂` are
//! independent standard normal vectors and `T` is the power-law
//! transformation of [`build_noise_model`].

use std::f64::consts::PI;

use nalgebra::DVector;
use rand::prelude::*;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::epoch::{from_epoch, DateFormat, Epoch};
use crate::error::{GctsError, Result};
use crate::helpers::DAYS_PER_YEAR;
use crate::noise::build_noise_model;
use crate::series::{Component, ComponentSeries, ComponentSet, SeriesHeader, TimeSeries};

/// A step of the given size at an epoch (MJD).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OffsetStep {
    pub epoch: f64,
    pub size: f64,
}

/// A seasonal term `sin·sin(2πΔt/P) + cos·cos(2πΔt/P)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeasonalTerm {
    pub period: f64,
    pub sin: f64,
    pub cos: f64,
}

/// Parameters of a synthetic series.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalModel {
    pub intercept: f64,
    /// Rate per `frequency` days.
    pub trend: f64,
    pub offsets: Vec<OffsetStep>,
    pub seasonal: Vec<SeasonalTerm>,
    /// White-noise amplitude.
    pub white: f64,
    /// Power-law noise amplitude.
    pub flicker: f64,
    pub kappa: f64,
    pub frequency: f64,
    /// Formal sigma reported for every observation.
    pub sigma: f64,
}

impl Default for SignalModel {
    fn default() -> Self {
        Self {
            intercept: 0.0,
            trend: 0.0,
            offsets: Vec::new(),
            seasonal: Vec::new(),
            white: 1.0,
            flicker: 0.0,
            kappa: -1.0,
            frequency: DAYS_PER_YEAR,
            sigma: 1.0,
        }
    }
}

impl SignalModel {
    /// Parameter vector in design-matrix column order.
    pub fn parameters(&self) -> Vec<f64> {
        let mut x = vec![self.intercept, self.trend];
        x.extend(self.offsets.iter().map(|o| o.size));
        for s in &self.seasonal {
            x.push(s.sin);
            x.push(s.cos);
        }
        x
    }

    /// Noise-free signal at the given epochs (MJD), relative to the first one.
    pub fn signal(&self, epochs: &[f64]) -> Result<Vec<f64>> {
        let t0 = *epochs
            .first()
            .ok_or_else(|| GctsError::data("cannot simulate without epochs"))?;
        if !(self.frequency.is_finite() && self.frequency > 0.0) {
            return Err(GctsError::config(format!(
                "frequency must be positive, got {}",
                self.frequency
            )));
        }
        let values = epochs
            .iter()
            .map(|&t| {
                let dt = t - t0;
                let mut v = self.intercept + self.trend * dt / self.frequency;
                v += self
                    .offsets
                    .iter()
                    .filter(|o| t >= o.epoch)
                    .map(|o| o.size)
                    .sum::<f64>();
                for s in &self.seasonal {
                    let phase = 2.0 * PI * dt / s.period;
                    v += s.sin * phase.sin() + s.cos * phase.cos();
                }
                v
            })
            .collect();
        Ok(values)
    }
}

/// Signal plus white and power-law noise at the given epochs.
///
/// A missing seed draws from entropy.
pub fn simulate_observations(
    epochs: &[f64],
    model: &SignalModel,
    seed: Option<u64>,
) -> Result<Vec<f64>> {
    if !(model.white >= 0.0 && model.flicker >= 0.0) {
        return Err(GctsError::config(format!(
            "noise amplitudes must be non-negative, got white={}, flicker={}",
            model.white, model.flicker
        )));
    }
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let mut values = model.signal(epochs)?;
    let n = values.len();

    if model.white > 0.0 {
        for v in values.iter_mut() {
            *v += model.white * rng.sample::<f64, _>(StandardNormal);
        }
    }
    if model.flicker > 0.0 {
        let noise = build_noise_model(epochs, model.kappa, model.frequency)?;
        let w = DVector::from_fn(n, |_, _| rng.sample::<f64, _>(StandardNormal));
        let colored = &noise.transform * w;
        for (v, c) in values.iter_mut().zip(colored.iter()) {
            *v += model.flicker * c;
        }
    }
    Ok(values)
}

/// Build a single-component series from simulated observations.
pub fn simulate_series(
    site: &str,
    component: Component,
    unit: &str,
    date_format: DateFormat,
    epochs: &[f64],
    model: &SignalModel,
    seed: Option<u64>,
) -> Result<TimeSeries> {
    let values = simulate_observations(epochs, model, seed)?;
    let mut header = SeriesHeader::new(site, ComponentSet::Single(component), unit, date_format);
    header.offsets = model
        .offsets
        .iter()
        .map(|o| from_epoch(Epoch::from_mjd(o.epoch), date_format))
        .collect();
    header.comments.push("Simulated series".to_string());
    let dates = epochs
        .iter()
        .map(|&t| from_epoch(Epoch::from_mjd(t), date_format))
        .collect();
    TimeSeries::new(
        header,
        vec![ComponentSeries {
            component,
            sigmas: vec![model.sigma; values.len()],
            values,
        }],
        dates,
    )
}

/// `n` whole-day epochs starting at `start`, with gaps drawn uniformly from
/// `1..=max_gap` days.
pub fn irregular_epochs(start: f64, n: usize, max_gap: u32, seed: Option<u64>) -> Vec<f64> {
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let max_gap = max_gap.max(1);
    let mut t = start;
    (0..n)
        .map(|i| {
            if i > 0 {
                t += rng.gen_range(1..=max_gap) as f64;
            }
            t
        })
        .collect()
}
