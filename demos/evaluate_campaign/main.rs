//! Campaign evaluation
//!
//! Simulates an irregularly sampled campaign series with white and flicker
//! noise, writes it as a `.tse` file, then estimates the trajectory model by
//! ordinary least squares and with refined noise amplitudes. The noise-model
//! solution is written back as a `_model.tse` file.

use flexi_logger::Logger;
use gcts_core::calibration::CalibrationSet;
use gcts_core::campaign::{
    evaluate_campaign, model_file_name, model_series, CampaignOptions, EstimationMode,
};
use gcts_core::epoch::DateFormat;
use gcts_core::refine::NoiseEstimationConfig;
use gcts_core::series::Component;
use gcts_core::simulation::{irregular_epochs, simulate_series, OffsetStep, SignalModel};
use gcts_core::tse;

/// Calibration records shaped like prior campaign analyses (WRMS in mm).
fn calibration() -> gcts_core::Result<CalibrationSet> {
    let n = 80;
    let wrms: Vec<f64> = (0..n).map(|i| 0.5 + 14.5 * i as f64 / (n - 1) as f64).collect();
    let white = wrms
        .iter()
        .enumerate()
        .map(|(i, w)| 0.5 * w + 0.2 + 0.3 * (1.7 * i as f64).sin())
        .collect();
    let flicker = wrms
        .iter()
        .enumerate()
        .map(|(i, w)| 1.3 * w + 0.4 + 0.6 * (0.9 * i as f64).cos())
        .collect();
    CalibrationSet::new(wrms, white, flicker)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _logger = Logger::try_with_env_or_str("info")?
        .log_to_stderr()
        .start()?;

    println!("=== Campaign Evaluation ===\n");

    // --- Simulate and store the series ---
    println!("--- Simulated Series ---");
    let epochs = irregular_epochs(56604.0, 45, 30, Some(2013));
    let truth = SignalModel {
        intercept: 4.5,
        trend: -24.7,
        offsets: vec![OffsetStep {
            epoch: 56604.0 + 400.0,
            size: 8.0,
        }],
        white: 2.0,
        flicker: 4.0,
        ..Default::default()
    };
    let series = simulate_series(
        "TEST",
        Component::East,
        "mm",
        DateFormat::Ymd,
        &epochs,
        &truth,
        Some(7),
    )?;
    let dir = std::env::temp_dir().join("gcts_demo_campaign");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("TESTeast.tse");
    tse::write(&path, &series)?;
    let series = tse::read(&path)?;
    println!("{}\n", series.stats()?);

    let options = CampaignOptions::new(Component::East);

    // --- Section 1: Ordinary least squares ---
    println!("--- Ordinary Least-squares estimation ---");
    let ols = evaluate_campaign(&series, &options, EstimationMode::Ordinary)?;
    println!("{ols}\n");

    // --- Section 2: White + flicker noise model ---
    println!("--- White and Flicker Noise Model ---");
    let cal = calibration()?;
    let config = NoiseEstimationConfig::default()
        .with_n_rnd(12)
        .with_repeat(10)
        .with_increment(0.05)
        .with_seed(42);
    let noisy = evaluate_campaign(
        &series,
        &options,
        EstimationMode::Noise {
            calibration: &cal,
            config: &config,
            cancel: None,
        },
    )?;
    println!("{noisy}\n");
    println!(
        "  true amplitudes: white = {:.2} mm, flicker = {:.2} mm/year^0.25",
        truth.white, truth.flicker
    );

    // --- Section 3: Model file ---
    let model = model_series(&series, &noisy)?;
    let model_path = model_file_name(&path);
    tse::write(&model_path, &model)?;
    println!("  model written to {}", model_path.display());

    Ok(())
}
