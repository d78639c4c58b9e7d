//! End-to-end pipelines over a parsed series.
//!
//! [`evaluate_campaign`] estimates the trajectory model of one component,
//! either by ordinary least squares or with refined white/flicker noise
//! weighting. [`clean_component`] runs the outlier rejection loop on one
//! component and packages the retained and rejected rows as series.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationSet;
use crate::design::{DesignMatrix, DesignMatrixBuilder, SeasonalPeriod};
use crate::epoch::epochs_mjd;
use crate::error::{GctsError, Result};
use crate::helpers::DAYS_PER_YEAR;
use crate::lsq::fit;
use crate::outliers::{reject_outliers, ObservationTable, OutlierConfig, OutlierMethod, PassReport};
use crate::refine::{refine_noise_amplitudes, IterationEstimate, NoiseEstimationConfig};
use crate::series::{Component, ComponentSeries, ComponentSet, SeriesHeader, TimeSeries};

const MODEL_COMMENT: &str = "Model values";

/// Which component to model and which seasonal terms to include.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignOptions {
    pub component: Component,
    pub periods: Vec<SeasonalPeriod>,
    /// Days per trend unit.
    pub frequency: f64,
}

impl Default for CampaignOptions {
    fn default() -> Self {
        Self {
            component: Component::East,
            periods: Vec::new(),
            frequency: DAYS_PER_YEAR,
        }
    }
}

impl CampaignOptions {
    pub fn new(component: Component) -> Self {
        Self {
            component,
            ..Self::default()
        }
    }

    pub fn with_periods(mut self, periods: Vec<SeasonalPeriod>) -> Self {
        self.periods = periods;
        self
    }

    pub fn with_frequency(mut self, frequency: f64) -> Self {
        self.frequency = frequency;
        self
    }

    /// Design matrix of `series` with its declared offsets.
    pub fn design(&self, series: &TimeSeries) -> Result<DesignMatrix> {
        DesignMatrixBuilder::new()
            .with_offsets(series.header().offset_epochs()?)
            .with_periods(&self.periods)
            .with_frequency(self.frequency)
            .build(series.epochs())
    }
}

/// How the observations are weighted.
#[derive(Clone, Copy, Debug)]
pub enum EstimationMode<'a> {
    /// Unit weights.
    Ordinary,
    /// White plus power-law noise weighting with refined amplitudes.
    Noise {
        calibration: &'a CalibrationSet,
        config: &'a NoiseEstimationConfig,
        cancel: Option<&'a AtomicBool>,
    },
}

/// One labelled parameter estimate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub name: String,
    pub value: f64,
    pub std_error: f64,
    pub unit: String,
}

/// Refined noise amplitudes of a campaign.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseAmplitudes {
    pub white: f64,
    pub flicker: f64,
    /// WRMS of the unweighted residuals the search space was built from.
    pub wrms: f64,
    pub iterations: Vec<IterationEstimate>,
}

/// Result of [`evaluate_campaign`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CampaignEvaluation {
    pub component: Component,
    pub unit: String,
    pub estimates: Vec<Estimate>,
    pub s0: f64,
    pub dof: usize,
    /// Present when the noise model was used.
    pub noise: Option<NoiseAmplitudes>,
    /// Model values `A·X` at the observation epochs.
    pub model: Vec<f64>,
}

impl CampaignEvaluation {
    pub fn estimate(&self, name: &str) -> Option<&Estimate> {
        self.estimates.iter().find(|e| e.name == name)
    }
}

impl fmt::Display for CampaignEvaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in &self.estimates {
            writeln!(
                f,
                "{:>20}: {:10.4} +- {:9.4} {}",
                e.name, e.value, e.std_error, e.unit
            )?;
        }
        writeln!(f)?;
        if let Some(noise) = &self.noise {
            writeln!(f, "{:>20}: {:10.4} {}", "wna", noise.white, self.unit)?;
            writeln!(f, "{:>20}: {:10.4} {}/year^0.25", "fna", noise.flicker, self.unit)?;
        }
        write!(f, "{:>20}: {:14.8} {}", "s0", self.s0, self.unit)
    }
}

/// Estimate the trajectory model of one component.
///
/// # Errors
/// Design, solver and refinement errors propagate unchanged. In noise mode
/// the refinement frequency must match `options.frequency`.
pub fn evaluate_campaign(
    series: &TimeSeries,
    options: &CampaignOptions,
    mode: EstimationMode<'_>,
) -> Result<CampaignEvaluation> {
    let values = &series.component(options.component)?.values;
    let design = options.design(series)?;
    let header = series.header();

    let (result, noise) = match mode {
        EstimationMode::Ordinary => (fit(&design.matrix, values, None)?, None),
        EstimationMode::Noise {
            calibration,
            config,
            cancel,
        } => {
            if config.frequency != options.frequency {
                return Err(GctsError::config(format!(
                    "noise frequency {} differs from design frequency {}",
                    config.frequency, options.frequency
                )));
            }
            let est = refine_noise_amplitudes(
                &design.matrix,
                values,
                series.epochs(),
                calibration,
                config,
                cancel,
            )?;
            let amplitudes = NoiseAmplitudes {
                white: est.white,
                flicker: est.flicker,
                wrms: est.wrms,
                iterations: est.iterations,
            };
            (est.fit, Some(amplitudes))
        }
    };

    let estimates = design
        .labels(&header.unit, header.date_format)
        .into_iter()
        .zip(result.parameters.iter().zip(&result.std_errors))
        .map(|((name, unit), (&value, &std_error))| Estimate {
            name,
            value,
            std_error,
            unit,
        })
        .collect();

    log::info!(
        "{} {}: {} parameters, s0 = {:.8} ({})",
        header.site,
        options.component,
        design.ncols(),
        result.s0,
        if noise.is_some() { "noise model" } else { "ordinary" }
    );

    Ok(CampaignEvaluation {
        component: options.component,
        unit: header.unit.clone(),
        estimates,
        s0: result.s0,
        dof: result.dof,
        noise,
        model: result.fitted(values),
    })
}

/// Series holding the model values of `evaluation` with zero sigmas.
///
/// The first comment mentioning outliers is replaced by `Model values`;
/// without one the comment is appended.
pub fn model_series(series: &TimeSeries, evaluation: &CampaignEvaluation) -> Result<TimeSeries> {
    if evaluation.model.len() != series.len() {
        return Err(GctsError::config(format!(
            "{} model values for a series of {} rows",
            evaluation.model.len(),
            series.len()
        )));
    }
    let mut header = single_component_header(series.header(), evaluation.component);
    header.data_order = ComponentSet::Single(evaluation.component).default_data_order();
    match header.comments.iter_mut().find(|c| c.contains("outliers")) {
        Some(comment) => *comment = MODEL_COMMENT.to_string(),
        None => header.comments.push(MODEL_COMMENT.to_string()),
    }
    TimeSeries::new(
        header,
        vec![ComponentSeries {
            component: evaluation.component,
            values: evaluation.model.clone(),
            sigmas: vec![0.0; series.len()],
        }],
        series.dates().to_vec(),
    )
}

/// Output of [`clean_component`].
#[derive(Clone, Debug, PartialEq)]
pub struct CleanedComponent {
    /// Retained rows as a single-component series.
    pub cleaned: TimeSeries,
    /// Rejected rows in date order; may be empty.
    pub outliers: TimeSeries,
    pub passes: Vec<PassReport>,
}

/// Remove outliers from one component of `series`.
pub fn clean_component(
    series: &TimeSeries,
    options: &CampaignOptions,
    config: &OutlierConfig,
) -> Result<CleanedComponent> {
    let component = options.component;
    let data = series.component(component)?;
    let design = options.design(series)?;
    let table = ObservationTable::new(
        design.matrix,
        data.values.clone(),
        data.sigmas.clone(),
        series.dates().to_vec(),
    )?;
    let rejection = reject_outliers(table, config)?;

    let mut header = single_component_header(series.header(), component);
    header.data_order = format!("{0} s_{0} dates", component);

    let mut cleaned_header = header.clone();
    cleaned_header
        .comments
        .push(rejection_comment("removed", config.method));
    let retained = &rejection.retained;
    let cleaned = TimeSeries::new(
        cleaned_header,
        vec![ComponentSeries {
            component,
            values: retained.values().to_vec(),
            sigmas: retained.sigmas().to_vec(),
        }],
        retained.dates().to_vec(),
    )?;

    let rejected = &rejection.outliers;
    let epochs = epochs_mjd(&rejected.dates)?;
    let mut order: Vec<usize> = (0..rejected.len()).collect();
    order.sort_by(|&a, &b| epochs[a].total_cmp(&epochs[b]));
    header
        .comments
        .push(rejection_comment("detected", config.method));
    let outliers = TimeSeries::new(
        header,
        vec![ComponentSeries {
            component,
            values: order.iter().map(|&i| rejected.values[i]).collect(),
            sigmas: order.iter().map(|&i| rejected.sigmas[i]).collect(),
        }],
        order.iter().map(|&i| rejected.dates[i]).collect(),
    )?;

    Ok(CleanedComponent {
        cleaned,
        outliers,
        passes: rejection.passes,
    })
}

fn rejection_comment(action: &str, method: OutlierMethod) -> String {
    format!("All outliers have been {action} wrt. {method}")
}

fn single_component_header(header: &SeriesHeader, component: Component) -> SeriesHeader {
    SeriesHeader {
        components: ComponentSet::Single(component),
        ..header.clone()
    }
}

/// `<site><component>.tse`, using the first four characters of the site.
pub fn cleaned_file_name(site: &str, component: Component) -> String {
    let prefix: String = site.chars().take(4).collect();
    format!("{prefix}{component}.tse")
}

/// `<site><component>_outliers.tse`.
pub fn outliers_file_name(site: &str, component: Component) -> String {
    let prefix: String = site.chars().take(4).collect();
    format!("{prefix}{component}_outliers.tse")
}

/// `<stem>_model.tse` next to `path`.
pub fn model_file_name(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("series");
    path.with_file_name(format!("{stem}_model.tse"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::{DateFormat, DateRepr};
    use crate::simulation::{simulate_series, OffsetStep, SignalModel};

    fn daily(n: usize) -> Vec<f64> {
        (0..n).map(|i| 56604.0 + i as f64).collect()
    }

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

    fn weekly_series() -> TimeSeries {
        let epochs: Vec<f64> = (0..40).map(|i| 56604.0 + 7.0 * i as f64).collect();
        let values = epochs
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let years = (t - epochs[0]) / 365.25;
                2.0 + 3.0 * years + 3.0 * (2.3 * i as f64).sin() + 1.5 * (0.4 * i as f64).cos()
            })
            .collect::<Vec<_>>();
        let header = SeriesHeader::new(
            "WEEK",
            ComponentSet::Single(Component::Up),
            "mm",
            DateFormat::Mjd,
        );
        TimeSeries::new(
            header,
            vec![ComponentSeries {
                component: Component::Up,
                sigmas: vec![1.0; values.len()],
                values,
            }],
            epochs.iter().map(|&t| DateRepr::Mjd(t)).collect(),
        )
        .unwrap()
    }

    fn offset_model() -> SignalModel {
        SignalModel {
            intercept: 4.0,
            trend: -12.0,
            offsets: vec![OffsetStep {
                epoch: 56704.0,
                size: 6.0,
            }],
            white: 0.5,
            ..Default::default()
        }
    }

    #[test]
    fn test_ordinary_evaluation_labels_and_values() {
        let series = simulate_series(
            "TEST",
            Component::East,
            "mm",
            DateFormat::Mjd,
            &daily(300),
            &offset_model(),
            Some(21),
        )
        .unwrap();
        let eval = evaluate_campaign(
            &series,
            &CampaignOptions::new(Component::East),
            EstimationMode::Ordinary,
        )
        .unwrap();

        let names: Vec<&str> = eval.estimates.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["intercept", "trend", "offset at 56704"]);
        assert_eq!(eval.estimates[1].unit, "mm/year");
        assert_eq!(eval.dof, 297);
        assert!(eval.noise.is_none());
        assert!((eval.estimate("trend").unwrap().value + 12.0).abs() < 1.5);
        assert!((eval.estimate("offset at 56704").unwrap().value - 6.0).abs() < 0.5);
        assert!((eval.s0 - 0.5).abs() < 0.1);
        assert_eq!(eval.model.len(), 300);

        let text = eval.to_string();
        assert!(text.contains("           intercept:"));
        assert!(!text.contains("wna"));
        assert!(text.trim_end().ends_with("mm"));
    }

    #[test]
    fn test_noise_evaluation_reports_amplitudes() {
        let series = weekly_series();
        let cfg = NoiseEstimationConfig::default()
            .with_n_rnd(8)
            .with_repeat(3)
            .with_increment(0.05)
            .with_seed(11);
        let cal = calibration();
        let eval = evaluate_campaign(
            &series,
            &CampaignOptions::new(Component::Up),
            EstimationMode::Noise {
                calibration: &cal,
                config: &cfg,
                cancel: None,
            },
        )
        .unwrap();
        let noise = eval.noise.as_ref().unwrap();
        assert!(noise.white > 0.0 && noise.flicker > 0.0);
        assert_eq!(noise.iterations.len(), 3);
        assert!(noise.iterations.iter().any(|it| it.crossed));
        for it in noise.iterations.iter().filter(|it| it.crossed) {
            assert!((it.s0 - 1.0).abs() < 0.05, "iteration s0 {}", it.s0);
        }
        assert!((eval.s0 - 1.0).abs() < 0.05, "s0 {}", eval.s0);
        let text = eval.to_string();
        assert!(text.contains("wna"));
        assert!(text.contains("mm/year^0.25"));

        let mismatched = cfg.clone().with_frequency(365.0);
        assert!(matches!(
            evaluate_campaign(
                &series,
                &CampaignOptions::new(Component::Up),
                EstimationMode::Noise {
                    calibration: &cal,
                    config: &mismatched,
                    cancel: None,
                },
            ),
            Err(GctsError::Configuration(_))
        ));
    }

    #[test]
    fn test_model_series_replaces_outlier_comment() {
        let mut series = weekly_series();
        series
            .header_mut()
            .comments
            .push("All outliers have been removed wrt. IQrange".to_string());
        let eval = evaluate_campaign(
            &series,
            &CampaignOptions::new(Component::Up),
            EstimationMode::Ordinary,
        )
        .unwrap();
        let model = model_series(&series, &eval).unwrap();
        assert_eq!(model.header().comments, vec![MODEL_COMMENT.to_string()]);
        let up = model.component(Component::Up).unwrap();
        assert!(up.sigmas.iter().all(|&s| s == 0.0));
        assert_eq!(up.values, eval.model);
        assert_eq!(model.dates(), series.dates());
    }

    #[test]
    fn test_clean_component_splits_rows() {
        let mut series = simulate_series(
            "ABCDE",
            Component::North,
            "mm",
            DateFormat::Mjd,
            &daily(120),
            &SignalModel {
                white: 0.0,
                intercept: 1.0,
                trend: 2.0,
                ..Default::default()
            },
            None,
        )
        .unwrap();
        // Deterministic scatter plus two gross errors, the later one larger.
        let rebuilt = {
            let north = series.component(Component::North).unwrap();
            let mut values: Vec<f64> = north
                .values
                .iter()
                .enumerate()
                .map(|(i, v)| v + 0.4 * (2.1 * i as f64).sin())
                .collect();
            values[90] += 40.0;
            values[30] += 25.0;
            ComponentSeries {
                component: Component::North,
                values,
                sigmas: north.sigmas.clone(),
            }
        };
        series = TimeSeries::new(
            series.header().clone(),
            vec![rebuilt],
            series.dates().to_vec(),
        )
        .unwrap();

        let options = CampaignOptions::new(Component::North);
        let result = clean_component(&series, &options, &OutlierConfig::default()).unwrap();
        assert_eq!(result.cleaned.len() + result.outliers.len(), 120);
        assert!(result.outliers.len() >= 2);
        assert_eq!(result.passes.last().unwrap().removed, 0);

        let out_epochs = result.outliers.epochs();
        assert!(out_epochs.contains(&(56604.0 + 30.0)));
        assert!(out_epochs.contains(&(56604.0 + 90.0)));
        assert!(out_epochs.windows(2).all(|w| w[1] > w[0]));

        let header = result.cleaned.header();
        assert_eq!(header.components, ComponentSet::Single(Component::North));
        assert_eq!(header.data_order, "north s_north dates");
        assert_eq!(
            header.comments.last().unwrap(),
            "All outliers have been removed wrt. IQrange"
        );
        assert_eq!(
            result.outliers.header().comments.last().unwrap(),
            "All outliers have been detected wrt. IQrange"
        );
    }

    #[test]
    fn test_file_names() {
        assert_eq!(cleaned_file_name("ABCDE", Component::Up), "ABCDup.tse");
        assert_eq!(outliers_file_name("TEST", Component::East), "TESTeast_outliers.tse");
        assert_eq!(
            model_file_name(Path::new("/data/TESTeast.tse")),
            PathBuf::from("/data/TESTeast_model.tse")
        );
    }
}
