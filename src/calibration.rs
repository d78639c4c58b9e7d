//! Calibration set of prior noise-analysis results.
//!
//! Each record holds a series' residual WRMS and its estimated white and
//! flicker amplitudes. Records are read from flat files, one per line:
//!
//! ```text
//! <label> <WRMS> <white amplitude> <flicker amplitude>
//! ```
//!
//! The set is loaded once and passed by reference to the search-space
//! estimator.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GctsError, Result};

/// File-name prefix of calibration files inside a directory.
pub const CALIBRATION_FILE_PREFIX: &str = "results";

/// Column-oriented calibration records.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSet {
    pub labels: Vec<String>,
    pub wrms: Vec<f64>,
    pub white: Vec<f64>,
    pub flicker: Vec<f64>,
}

impl CalibrationSet {
    /// Build a set from parallel columns.
    pub fn new(wrms: Vec<f64>, white: Vec<f64>, flicker: Vec<f64>) -> Result<Self> {
        if wrms.len() != white.len() || wrms.len() != flicker.len() {
            return Err(GctsError::config(format!(
                "calibration columns differ in length ({}, {}, {})",
                wrms.len(),
                white.len(),
                flicker.len()
            )));
        }
        let labels = (0..wrms.len()).map(|i| format!("#{i}")).collect();
        Ok(Self {
            labels,
            wrms,
            white,
            flicker,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.wrms.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.wrms.is_empty()
    }

    /// Parse calibration records from text. `path` is only used in errors.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let mut set = Self::default();
        set.append_text(text, path)?;
        Ok(set)
    }

    /// Load and concatenate the given files in order.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut set = Self::default();
        for path in paths {
            let path = path.as_ref();
            let text = fs::read_to_string(path).map_err(|e| GctsError::io(path, e))?;
            set.append_text(&text, path)?;
        }
        Ok(set)
    }

    /// Load every file in `dir` whose name starts with `results`, sorted by name.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| GctsError::io(dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(CALIBRATION_FILE_PREFIX))
            })
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(GctsError::data(format!(
                "no '{CALIBRATION_FILE_PREFIX}*' calibration files in {}",
                dir.display()
            )));
        }
        let set = Self::from_files(&files)?;
        log::info!(
            "loaded {} calibration records from {} files in {}",
            set.len(),
            files.len(),
            dir.display()
        );
        Ok(set)
    }

    fn append_text(&mut self, text: &str, path: &Path) -> Result<()> {
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return Err(GctsError::parse(
                    path,
                    idx + 1,
                    format!("expected 4 fields, found {}", fields.len()),
                ));
            }
            let number = |s: &str| {
                s.parse::<f64>()
                    .map_err(|_| GctsError::parse(path, idx + 1, format!("invalid number '{s}'")))
            };
            self.labels.push(fields[0].to_string());
            self.wrms.push(number(fields[1])?);
            self.white.push(number(fields[2])?);
            self.flicker.push(number(fields[3])?);
        }
        Ok(())
    }
}
