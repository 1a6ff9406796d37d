//! Core types for the Amur river level forecasting pipeline.
//!
//! Stations, typed observation records, the frozen feature contract and the
//! error type shared by the data and command crates.

pub mod columns;
pub mod config;
pub mod date_range;
pub mod error;
pub mod observation;
pub mod station;

pub use config::{FeatureContract, NormalizationStats, PipelineConfig, DAYS_FORECAST};
pub use error::{PipelineError, Result};
