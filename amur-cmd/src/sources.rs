//! Loading and joining the archives.

use crate::DataArgs;
use amur_core::date_range::DateRange;
use amur_core::observation::{HydroRecord, MeteoRecord, StationDay};
use amur_core::station::Station;
use amur_core::{PipelineConfig, PipelineError};
use amur_data::hydro::read_hydro_all;
use amur_data::interpolation::merge_hydro_meteo;
use amur_data::meteo::read_meteo_all;
use amur_data::registry::{locate_hydro, locate_meteo, StationRegistry};
use amur_utils::dates::parse_date;
use anyhow::Context;
use chrono::NaiveDate;
use log::info;
use std::collections::BTreeSet;

pub fn parse_day(s: &str) -> anyhow::Result<NaiveDate> {
    parse_date(s).with_context(|| format!("invalid date {s:?}, expected YYYY-MM-DD"))
}

/// The station registry from file, or from the registry service.
pub async fn load_registry(args: &DataArgs) -> anyhow::Result<StationRegistry> {
    if let Some(path) = &args.registry {
        return Ok(StationRegistry::load(path)?);
    }
    fetch_registry().await
}

#[cfg(feature = "api")]
async fn fetch_registry() -> anyhow::Result<StationRegistry> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()?;
    Ok(StationRegistry::fetch(&client, amur_data::registry::REGISTRY_URL).await?)
}

#[cfg(not(feature = "api"))]
async fn fetch_registry() -> anyhow::Result<StationRegistry> {
    anyhow::bail!("no --registry file given and this build cannot download it (enable the `api` feature)")
}

/// Hydro history, failing when the range holds no observation at all.
pub fn read_hydro(config: &PipelineConfig, range: &DateRange) -> anyhow::Result<Vec<HydroRecord>> {
    let hydro = read_hydro_all(config, range)?;
    if hydro.is_empty() {
        return Err(PipelineError::EmptyHistoricalHydro {
            start: range.start,
            end: range.end,
        }
        .into());
    }
    Ok(hydro)
}

/// Meteo history, failing when the range holds no observation at all.
pub fn read_meteo(config: &PipelineConfig, range: &DateRange) -> anyhow::Result<Vec<MeteoRecord>> {
    let meteo = read_meteo_all(config, range)?;
    if meteo.is_empty() {
        return Err(PipelineError::EmptyHistoricalMeteo {
            start: range.start,
            end: range.end,
        }
        .into());
    }
    Ok(meteo)
}

/// Locate both archives and krige meteo onto the hydro posts.
pub fn join_archives(
    registry: &StationRegistry,
    config: &PipelineConfig,
    hydro: Vec<HydroRecord>,
    meteo: Vec<MeteoRecord>,
) -> (Vec<Station>, Vec<StationDay>) {
    let posts = registry.hydro_stations(config);
    let meteo_ids: BTreeSet<String> = meteo.iter().map(|r| r.identifier.clone()).collect();
    let meteo_stations = registry.meteo_stations(meteo_ids.iter().map(String::as_str));

    let meteo = locate_meteo(meteo, &meteo_stations);
    info!("meteo rows after location join {}", meteo.len());
    let hydro = locate_hydro(hydro, &posts);
    info!("hydro rows after location join {}", hydro.len());

    let rows = merge_hydro_meteo(hydro, &meteo, &posts);
    info!("rows after merge with historical meteo {}", rows.len());
    (posts, rows)
}

/// Read and join every archive over one range.
pub async fn joined_history(
    args: &DataArgs,
    config: &PipelineConfig,
    range: &DateRange,
) -> anyhow::Result<Vec<StationDay>> {
    let registry = load_registry(args).await?;
    let hydro = read_hydro(config, range)?;
    let meteo = read_meteo(config, range)?;
    Ok(join_archives(&registry, config, hydro, meteo).1)
}
