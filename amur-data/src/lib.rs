//! Data pipeline for Amur river level forecasting.
//!
//! Reads the hydro and meteo archives, places meteo observations onto hydro
//! posts, merges provider weather forecasts, and assembles the wide feature
//! table that is cut into model input windows.

pub mod demodulation;
pub mod features;
pub mod forecast;
pub mod frame;
pub mod hydro;
pub mod interpolation;
pub mod meteo;
pub mod registry;
pub mod report;
pub mod tensor;

pub use features::{FeatureAssembler, Mode};
pub use frame::Frame;
pub use tensor::{prepare_inputs, train_test_split, TrainTestSplit};
