//! Outlier removal
//!
//! Simulates a three-component daily series with a few gross errors, then
//! cleans each component with every rejection rule and writes the cleaned
//! and rejected rows as `.tse` files.

use flexi_logger::Logger;
use gcts_core::campaign::{clean_component, cleaned_file_name, outliers_file_name, CampaignOptions};
use gcts_core::design::SeasonalPeriod;
use gcts_core::epoch::{DateFormat, DateRepr, Epoch};
use gcts_core::outliers::{OutlierConfig, OutlierMethod};
use gcts_core::series::{Component, ComponentSeries, ComponentSet, SeriesHeader, TimeSeries};
use gcts_core::simulation::{simulate_observations, SeasonalTerm, SignalModel};
use gcts_core::tse;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _logger = Logger::try_with_env_or_str("warn")?
        .log_to_stderr()
        .start()?;

    println!("=== Outlier Removal ===\n");

    // --- Generate a three-component series ---
    println!("--- Generating Data ---");
    let epochs: Vec<f64> = (0..730).map(|i| 57000.0 + i as f64).collect();
    let mut components = Vec::new();
    for (k, component) in Component::ALL.into_iter().enumerate() {
        let model = SignalModel {
            intercept: k as f64,
            trend: [12.0, -3.0, 1.5][k],
            seasonal: vec![SeasonalTerm {
                period: 365.25,
                sin: 1.5,
                cos: -0.8,
            }],
            white: [1.0, 1.0, 3.0][k],
            flicker: [1.5, 1.5, 4.0][k],
            ..Default::default()
        };
        let mut values = simulate_observations(&epochs, &model, Some(100 + k as u64))?;
        for (j, i) in [40, 333, 512].into_iter().enumerate() {
            values[i] += (25.0 + 10.0 * j as f64) * if k == 1 { -1.0 } else { 1.0 };
        }
        components.push(ComponentSeries {
            component,
            sigmas: vec![model.white; values.len()],
            values,
        });
    }
    let header = SeriesHeader::new("WTZR", ComponentSet::All, "mm", DateFormat::YearDoy);
    let dates: Vec<DateRepr> = epochs
        .iter()
        .map(|&t| Epoch::from_mjd(t).to_repr(DateFormat::YearDoy))
        .collect();
    let series = TimeSeries::new(header, components, dates)?;
    println!("{}\n", series.stats()?);

    let dir = std::env::temp_dir().join("gcts_demo_outliers");
    std::fs::create_dir_all(&dir)?;

    // --- Clean every component with every rule ---
    for method in [
        OutlierMethod::InterquartileRange,
        OutlierMethod::Median,
        OutlierMethod::NSigma,
    ] {
        let config = OutlierConfig::new(method, 3.0);
        for component in Component::ALL {
            let options = CampaignOptions::new(component)
                .with_periods(vec![SeasonalPeriod::Days(365.25)]);
            let result = clean_component(&series, &options, &config)?;

            println!("         ******* {component} ({method}) *******");
            println!(" # \t  Method \t  Scale \t nOutliers");
            println!("---\t--------\t-------\t\t-----------");
            for pass in &result.passes {
                println!("{pass}");
            }
            println!(
                "  kept {} rows, rejected {}\n",
                result.cleaned.len(),
                result.outliers.len()
            );

            if method == OutlierMethod::InterquartileRange {
                let site = &series.header().site;
                tse::write(dir.join(cleaned_file_name(site, component)), &result.cleaned)?;
                if !result.outliers.is_empty() {
                    tse::write(dir.join(outliers_file_name(site, component)), &result.outliers)?;
                }
            }
        }
    }

    println!("Files written to {}", dir.display());
    Ok(())
}
