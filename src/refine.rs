//! Iterative refinement of the white and flicker noise amplitudes.
//!
//! Each iteration draws `n_rnd` white and `n_rnd` flicker amplitudes from the
//! search space, solves the weighted system for all `n_rnd²` pairs, grids the
//! resulting s0 values and picks the point of the `s0 = 1` isoline whose
//! re-solved s0 is closest to one. The medians over all iterations give the
//! final amplitudes and the final weighted fit.

use std::sync::atomic::{AtomicBool, Ordering};

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;
#[cfg(feature = "parallel")]
use rayon::iter::ParallelIterator;
use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationSet;
use crate::error::{GctsError, Result};
use crate::helpers::{median, DAYS_PER_YEAR};
use crate::iter_maybe_parallel;
use crate::lsq::{fit, FitResult};
use crate::noise::{build_noise_model, PowerLawNoise};
use crate::search_space::SearchSpace;
use crate::surface::interpolate_product_grid;

/// Target value of the standard deviation of unit weight.
const UNIT_LEVEL: f64 = 1.0;

/// Settings of the noise-amplitude refinement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseEstimationConfig {
    /// Confidence level of the search space.
    pub alpha: f64,
    /// Random amplitudes drawn per axis and iteration.
    pub n_rnd: usize,
    /// Days per year used for trend and noise scaling.
    pub frequency: f64,
    /// Spectral index of the coloured noise.
    pub kappa: f64,
    /// Grid spacing of the s0 surface.
    pub increment: f64,
    /// Number of independent iterations.
    pub repeat: usize,
    /// Base seed; iteration `i` uses `seed + i`.
    pub seed: Option<u64>,
}

impl Default for NoiseEstimationConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            n_rnd: 30,
            frequency: DAYS_PER_YEAR,
            kappa: -1.0,
            increment: 0.025,
            repeat: 100,
            seed: None,
        }
    }
}

impl NoiseEstimationConfig {
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_n_rnd(mut self, n_rnd: usize) -> Self {
        self.n_rnd = n_rnd;
        self
    }

    pub fn with_frequency(mut self, frequency: f64) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_kappa(mut self, kappa: f64) -> Self {
        self.kappa = kappa;
        self
    }

    pub fn with_increment(mut self, increment: f64) -> Self {
        self.increment = increment;
        self
    }

    pub fn with_repeat(mut self, repeat: usize) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check every setting, reporting the first invalid one.
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(GctsError::config(format!(
                "alpha must be in (0, 1), got {}",
                self.alpha
            )));
        }
        if self.n_rnd == 0 {
            return Err(GctsError::config("n_rnd must be positive"));
        }
        if self.repeat == 0 {
            return Err(GctsError::config("repeat must be positive"));
        }
        if !(self.frequency.is_finite() && self.frequency > 0.0) {
            return Err(GctsError::config(format!(
                "frequency must be positive, got {}",
                self.frequency
            )));
        }
        if !(self.kappa.is_finite() && self.kappa <= 0.0) {
            return Err(GctsError::config(format!(
                "kappa must be finite and <= 0, got {}",
                self.kappa
            )));
        }
        if !(self.increment.is_finite() && self.increment > 0.0) {
            return Err(GctsError::config(format!(
                "increment must be positive, got {}",
                self.increment
            )));
        }
        Ok(())
    }
}

/// Amplitude pair selected by one refinement iteration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IterationEstimate {
    pub white: f64,
    pub flicker: f64,
    /// s0 of the weighted solve at this pair.
    pub s0: f64,
    /// Whether the gridded surface crossed one.
    pub crossed: bool,
    /// Number of candidate points that were re-solved.
    pub candidates: usize,
}

/// Final result of the refinement.
#[derive(Clone, Debug, PartialEq)]
pub struct NoiseEstimate {
    /// Weighted fit at the median amplitudes.
    pub fit: FitResult,
    /// Unweighted fit used to derive the WRMS.
    pub ols: FitResult,
    /// Median white-noise amplitude.
    pub white: f64,
    /// Median flicker-noise amplitude.
    pub flicker: f64,
    /// WRMS of the unweighted residuals.
    pub wrms: f64,
    pub iterations: Vec<IterationEstimate>,
}

/// Everything one iteration needs, fixed for the whole run.
struct Refiner<'a> {
    design: &'a DMatrix<f64>,
    observations: &'a [f64],
    noise: PowerLawNoise,
    space: SearchSpace,
    wrms: f64,
    dof: usize,
    config: &'a NoiseEstimationConfig,
}

impl Refiner<'_> {
    fn s0_at(&self, white: f64, flicker: f64) -> Result<f64> {
        let weight = self.noise.weight_factor(white, flicker)?;
        Ok(fit(self.design, self.observations, Some(&weight))?.s0)
    }

    fn iterate(&self, rng: &mut StdRng) -> Result<IterationEstimate> {
        let samples = self.space.sample(self.wrms, self.dof, self.config.n_rnd, rng)?;
        let whites = samples.valid_white();
        let flickers = samples.valid_flicker();
        if whites.is_empty() || flickers.is_empty() {
            return Err(GctsError::numerical(
                "amplitude sampling",
                "no admissible white or flicker amplitude was drawn",
            ));
        }

        let pairs: Vec<(f64, f64)> = whites
            .iter()
            .flat_map(|&w| flickers.iter().map(move |&f| (w, f)))
            .collect();
        let s0: Vec<f64> = iter_maybe_parallel!(pairs)
            .map(|(w, f)| self.s0_at(w, f))
            .collect::<Result<Vec<f64>>>()?;

        let surface = interpolate_product_grid(&whites, &flickers, &s0, self.config.increment)?;
        let crossed = surface.crosses(UNIT_LEVEL);
        let mut candidates = if crossed {
            surface.contour_points(UNIT_LEVEL)
        } else {
            Vec::new()
        };
        if candidates.is_empty() {
            let nearest = surface.nearest_to_level(UNIT_LEVEL).ok_or_else(|| {
                GctsError::numerical(
                    format!("s0 surface ({}x{})", surface.x.len(), surface.y.len()),
                    "no finite grid point",
                )
            })?;
            if !crossed {
                log::warn!(
                    "s0 surface does not cross 1, using nearest grid point (s0 = {:.4})",
                    nearest.z
                );
            }
            candidates.push((nearest.x, nearest.y));
        }

        let resolved: Vec<f64> = iter_maybe_parallel!(candidates.clone())
            .map(|(w, f)| self.s0_at(w, f))
            .collect::<Result<Vec<f64>>>()?;
        let (best, best_s0) = resolved
            .iter()
            .enumerate()
            .fold((0usize, f64::NAN), |(bi, bs), (i, &s)| {
                if bs.is_nan() || (s - UNIT_LEVEL).abs() < (bs - UNIT_LEVEL).abs() {
                    (i, s)
                } else {
                    (bi, bs)
                }
            });
        let (white, flicker) = candidates[best];

        Ok(IterationEstimate {
            white,
            flicker,
            s0: best_s0,
            crossed,
            candidates: candidates.len(),
        })
    }
}

/// Estimate noise amplitudes and the final weighted fit.
///
/// # Arguments
/// * `design` - Design matrix (n x m)
/// * `observations` - Observation vector of length n
/// * `epochs` - Strictly increasing epochs (MJD) of the observations
/// * `calibration` - Prior (WRMS, white, flicker) results
/// * `config` - Refinement settings
/// * `cancel` - Checked before every iteration; when set the run stops with
///   [`GctsError::Cancelled`]
pub fn refine_noise_amplitudes(
    design: &DMatrix<f64>,
    observations: &[f64],
    epochs: &[f64],
    calibration: &CalibrationSet,
    config: &NoiseEstimationConfig,
    cancel: Option<&AtomicBool>,
) -> Result<NoiseEstimate> {
    config.validate()?;
    if epochs.len() != observations.len() {
        return Err(GctsError::config(format!(
            "{} epochs for {} observations",
            epochs.len(),
            observations.len()
        )));
    }

    let ols = fit(design, observations, None)?;
    let wrms = ols.wrms();
    let dof = ols.dof;
    log::info!("unweighted fit: s0 = {:.6}, WRMS = {wrms:.6}, dof = {dof}", ols.s0);

    let refiner = Refiner {
        design,
        observations,
        noise: build_noise_model(epochs, config.kappa, config.frequency)?,
        space: SearchSpace::new(calibration, config.alpha)?,
        wrms,
        dof,
        config,
    };

    let base_seed = config.seed.unwrap_or_else(rand::random);
    log::debug!("refinement base seed {base_seed}");

    let mut iterations = Vec::with_capacity(config.repeat);
    for i in 0..config.repeat {
        if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            return Err(GctsError::Cancelled { completed: i });
        }
        let mut rng = StdRng::seed_from_u64(base_seed.wrapping_add(i as u64));
        let estimate = refiner.iterate(&mut rng)?;
        log::info!(
            "iteration {}/{}: white = {:.4}, flicker = {:.4}, s0 = {:.6}{}",
            i + 1,
            config.repeat,
            estimate.white,
            estimate.flicker,
            estimate.s0,
            if estimate.crossed { "" } else { " (no crossing)" }
        );
        iterations.push(estimate);
    }

    let whites: Vec<f64> = iterations.iter().map(|e| e.white).collect();
    let flickers: Vec<f64> = iterations.iter().map(|e| e.flicker).collect();
    let white = median(&whites);
    let flicker = median(&flickers);

    let weight = refiner.noise.weight_factor(white, flicker)?;
    let final_fit = fit(design, observations, Some(&weight))?;
    log::info!(
        "noise amplitudes: white = {white:.4}, flicker = {flicker:.4}, s0 = {:.8}",
        final_fit.s0
    );

    Ok(NoiseEstimate {
        fit: final_fit,
        ols,
        white,
        flicker,
        wrms,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::DesignMatrixBuilder;

    fn calibration() -> CalibrationSet {
        let n = 50;
        let wrms: Vec<f64> = (0..n).map(|i| 1.0 + 9.0 * i as f64 / (n - 1) as f64).collect();
        let white = wrms
            .iter()
            .enumerate()
            .map(|(i, w)| 0.4 * w + 0.2 + 0.2 * (1.3 * i as f64).sin())
            .collect();
        let flicker = wrms
            .iter()
            .enumerate()
            .map(|(i, w)| 1.2 * w + 0.4 * (0.7 * i as f64).cos())
            .collect();
        CalibrationSet::new(wrms, white, flicker).unwrap()
    }

    fn series() -> (Vec<f64>, Vec<f64>) {
        let epochs: Vec<f64> = (0..40).map(|i| 56604.0 + 7.0 * i as f64).collect();
        let obs = epochs
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let years = (t - epochs[0]) / 365.25;
                2.0 + 3.0 * years + 3.0 * (2.3 * i as f64).sin() + 1.5 * (0.4 * i as f64).cos()
            })
            .collect();
        (epochs, obs)
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let cfg = NoiseEstimationConfig::default();
        assert_eq!(cfg.n_rnd, 30);
        assert_eq!(cfg.repeat, 100);
        assert_eq!(cfg.kappa, -1.0);
        assert!(cfg.validate().is_ok());
        assert!(cfg.clone().with_alpha(1.5).validate().is_err());
        assert!(cfg.clone().with_kappa(0.5).validate().is_err());
        assert!(cfg.clone().with_increment(0.0).validate().is_err());
        assert!(cfg.clone().with_repeat(0).validate().is_err());
    }

    #[test]
    fn test_config_serde_defaults() {
        let cfg: NoiseEstimationConfig =
            serde_json::from_str(r#"{"n_rnd": 12, "seed": 4}"#).unwrap();
        assert_eq!(cfg.n_rnd, 12);
        assert_eq!(cfg.seed, Some(4));
        assert_eq!(cfg.alpha, 0.05);
        assert_eq!(cfg.increment, 0.025);
    }

    #[test]
    fn test_refinement_end_to_end() {
        let (epochs, obs) = series();
        let design = DesignMatrixBuilder::new().build(&epochs).unwrap().matrix;
        let cfg = NoiseEstimationConfig::default()
            .with_n_rnd(8)
            .with_repeat(3)
            .with_increment(0.05)
            .with_seed(11);
        let est = refine_noise_amplitudes(&design, &obs, &epochs, &calibration(), &cfg, None);
        let est = est.unwrap();

        assert_eq!(est.iterations.len(), 3);
        assert!(est.white.is_finite() && est.white > 0.0);
        assert!(est.flicker.is_finite() && est.flicker > 0.0);
        assert!(est.iterations.iter().any(|it| it.crossed));
        for it in est.iterations.iter().filter(|it| it.crossed) {
            assert!((it.s0 - 1.0).abs() < 0.05, "iteration s0 {}", it.s0);
        }
        assert!((est.fit.s0 - 1.0).abs() < 0.05, "final s0 {}", est.fit.s0);
        assert_eq!(est.fit.parameters.len(), 2);
        assert_eq!(est.fit.dof, 38);
        assert!((est.wrms - est.ols.wrms()).abs() < 1e-15);
    }

    #[test]
    fn test_surface_above_one_falls_back_to_nearest_point() {
        let (epochs, obs) = series();
        let design = DesignMatrixBuilder::new().build(&epochs).unwrap().matrix;
        // Amplitudes around 1 % of the WRMS: every weighted solve has s0 >> 1.
        let wrms: Vec<f64> = (0..50).map(|i| 1.0 + 9.0 * i as f64 / 49.0).collect();
        let white = wrms
            .iter()
            .enumerate()
            .map(|(i, w)| w * (0.01 + 0.002 * (1.3 * i as f64).sin()))
            .collect();
        let flicker = wrms
            .iter()
            .enumerate()
            .map(|(i, w)| w * (0.02 + 0.004 * (0.7 * i as f64).cos()))
            .collect();
        let cal = CalibrationSet::new(wrms, white, flicker).unwrap();
        let cfg = NoiseEstimationConfig::default()
            .with_n_rnd(6)
            .with_repeat(3)
            .with_increment(0.05)
            .with_seed(17);
        let est = refine_noise_amplitudes(&design, &obs, &epochs, &cal, &cfg, None).unwrap();

        let noise = build_noise_model(&epochs, cfg.kappa, cfg.frequency).unwrap();
        let s0_at = |w: f64, f: f64| {
            let weight = noise.weight_factor(w, f).unwrap();
            fit(&design, &obs, Some(&weight)).unwrap().s0
        };
        for it in &est.iterations {
            assert!(!it.crossed);
            assert_eq!(it.candidates, 1);
            assert!(it.s0 > 1.0, "s0 {}", it.s0);
            assert!((s0_at(it.white, it.flicker) - it.s0).abs() < 1e-9);
        }
        assert!(est.fit.s0 > 1.0);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let (epochs, obs) = series();
        let design = DesignMatrixBuilder::new().build(&epochs).unwrap().matrix;
        let cfg = NoiseEstimationConfig::default()
            .with_n_rnd(5)
            .with_repeat(2)
            .with_increment(0.1)
            .with_seed(5);
        let cal = calibration();
        let a = refine_noise_amplitudes(&design, &obs, &epochs, &cal, &cfg, None).unwrap();
        let b = refine_noise_amplitudes(&design, &obs, &epochs, &cal, &cfg, None).unwrap();
        assert_eq!(a.white, b.white);
        assert_eq!(a.flicker, b.flicker);
    }

    #[test]
    fn test_cancellation_before_first_iteration() {
        let (epochs, obs) = series();
        let design = DesignMatrixBuilder::new().build(&epochs).unwrap().matrix;
        let cancel = AtomicBool::new(true);
        let cfg = NoiseEstimationConfig::default().with_seed(1);
        let cal = calibration();
        let err = refine_noise_amplitudes(&design, &obs, &epochs, &cal, &cfg, Some(&cancel));
        let err = err.unwrap_err();
        assert!(matches!(err, GctsError::Cancelled { completed: 0 }));
    }

    #[test]
    fn test_no_admissible_samples() {
        let (epochs, obs) = series();
        let design = DesignMatrixBuilder::new().build(&epochs).unwrap().matrix;
        let wrms: Vec<f64> = (0..20).map(|i| 1.0 + i as f64).collect();
        let negative: Vec<f64> = wrms.iter().map(|w| -w).collect();
        let cal = CalibrationSet::new(wrms.clone(), negative.clone(), negative).unwrap();
        let cfg = NoiseEstimationConfig::default().with_n_rnd(4).with_repeat(1).with_seed(2);
        let err = refine_noise_amplitudes(&design, &obs, &epochs, &cal, &cfg, None).unwrap_err();
        assert!(matches!(err, GctsError::Numerical { .. }), "{err:?}");
    }
}
