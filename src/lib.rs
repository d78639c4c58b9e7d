//! # gcts-core
//!
//! Trend, seasonal, offset and power-law noise estimation for GPS coordinate
//! time series.
//!
//! The crate provides:
//! - Date representations and conversion to a continuous epoch scale (MJD)
//! - Design matrices for intercept, trend, offset steps and seasonal terms
//! - Weighted least squares with formal errors and s0
//! - White plus flicker (power-law) noise covariance models
//! - Search-space estimation and iterative refinement of noise amplitudes
//! - Iterative outlier rejection (IQR, median/MAD, N-sigma)
//! - `.tse` series files and end-to-end campaign pipelines
//!
//! ## Data Layout
//!
//! Design matrices are `nalgebra::DMatrix<f64>` with one row per observation
//! and columns ordered intercept, trend, one step per offset, then a sine and
//! a cosine column per seasonal period. Observations, sigmas and dates are
//! parallel vectors of the same length.

#![allow(clippy::needless_range_loop)]
#![allow(clippy::too_many_arguments)]

pub mod parallel;

pub mod calibration;
pub mod campaign;
pub mod design;
pub mod epoch;
pub mod error;
pub mod helpers;
pub mod lsq;
pub mod noise;
pub mod outliers;
pub mod quantreg;
pub mod refine;
pub mod search_space;
pub mod series;
pub mod simulation;
pub mod surface;
pub mod tse;

pub use error::{GctsError, Result};
pub use helpers::{DAYS_PER_YEAR, DEFAULT_CONVERGENCE_TOL, NUMERICAL_EPS};

// Re-export the estimation entry points
pub use design::{DesignMatrix, DesignMatrixBuilder, ParameterKind, SeasonalPeriod};
pub use epoch::{from_epoch, to_epoch, DateFormat, DateRepr, Epoch};
pub use lsq::{fit, FitResult, WeightFactor};
pub use noise::{build_noise_model, PowerLawNoise};
pub use outliers::{
    reject_outliers, ObservationTable, OutlierConfig, OutlierMethod, OutlierRejection,
};
pub use refine::{refine_noise_amplitudes, NoiseEstimate, NoiseEstimationConfig};
pub use search_space::{estimate_search_space, AmplitudeSamples, SearchSpace};

// Re-export series and pipeline types
pub use calibration::CalibrationSet;
pub use campaign::{
    clean_component, evaluate_campaign, model_series, CampaignEvaluation, CampaignOptions,
    EstimationMode,
};
pub use series::{Component, ComponentSet, SeriesHeader, TimeSeries};
