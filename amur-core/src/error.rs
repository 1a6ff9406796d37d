/// Error types for the Amur level pipeline
use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// No hydro observations in the requested window
    #[error("There is no historical hydro data from {start} - {end}!")]
    EmptyHistoricalHydro { start: NaiveDate, end: NaiveDate },

    /// No meteo observations in the requested window
    #[error("There is no historical meteo data from {start} - {end}!")]
    EmptyHistoricalMeteo { start: NaiveDate, end: NaiveDate },

    /// A numerical feature has no (mean, std) entry
    #[error("Missing normalization statistics for feature {0}")]
    MissingNormalization(String),

    /// A categorical code is absent from the frozen vocabulary
    #[error("Unknown category code {code} for field {field}")]
    UnknownCategory { field: String, code: i64 },

    /// A feature the contract expects is absent from the wide table
    #[error("Feature column {0} is missing from the feature table")]
    MissingFeature(String),

    /// Not enough rows to cut a window of the required length
    #[error("Insufficient rows for a window (needed: {needed}, found: {found})")]
    InsufficientRows { needed: usize, found: usize },

    /// A source file lacks a required column
    #[error("Column {column} is missing from {path}")]
    MissingColumn { column: String, path: PathBuf },

    /// A station has no location in the registry
    #[error("No location for station {0}")]
    MissingLocation(String),

    /// Inconsistent or malformed configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Tensor or prediction shapes do not line up
    #[error("Shape mismatch: {0}")]
    Shape(String),

    /// Failed to read a file
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse CSV data
    #[error("Failed to parse CSV: {0}")]
    CsvParse(#[from] csv::Error),

    /// Failed to parse JSON data
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// HTTP request failed
    #[cfg(feature = "api")]
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),
}

impl PipelineError {
    /// Wrap an I/O error with the path that caused it.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the "file does not exist" flavour of I/O failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PipelineError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Type alias for Results using PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;
