//! Error types shared by every estimation stage.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building, solving or refining a model.
#[derive(Debug, Error)]
pub enum GctsError {
    /// Invalid user-supplied setting (format tag, tau, lengths, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A solve or decomposition could not be carried out.
    #[error("Numerical error in {context}: {message}")]
    Numerical { context: String, message: String },

    /// The series cannot support the requested model.
    #[error(
        "Insufficient data: {observations} observations for {parameters} parameters (short by {})",
        shortfall(.observations, .parameters)
    )]
    InsufficientData {
        observations: usize,
        parameters: usize,
    },

    /// Malformed or inconsistent series content.
    #[error("Data error: {0}")]
    Data(String),

    /// File I/O error
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Parse error with line number
    #[error("Parse error in {} at line {line}: {message}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Refinement was stopped between iterations.
    #[error("Cancelled after {completed} completed iterations")]
    Cancelled { completed: usize },
}

impl GctsError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a numerical error tagged with the operation that failed.
    pub fn numerical(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Numerical {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}

/// Observations missing before the model has at least one degree of freedom.
fn shortfall(observations: &usize, parameters: &usize) -> usize {
    (parameters + 1).saturating_sub(*observations)
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GctsError>;
