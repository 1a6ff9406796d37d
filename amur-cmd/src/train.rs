//! Training-side commands: tensors, statistics and the category vocabulary.

use crate::output::write_tensor;
use crate::sources::{joined_history, parse_day};
use crate::{ContractArgs, DataArgs};
use amur_core::date_range::DateRange;
use amur_core::{FeatureContract, NormalizationStats, PipelineConfig};
use amur_data::features::observed_contract;
use amur_data::tensor::compute_stats;
use amur_data::{train_test_split, FeatureAssembler, Mode};
use log::info;
use std::path::{Path, PathBuf};

pub const STATS_FILE: &str = "mean_std_stats.json";

pub fn stats_path(config: &PipelineConfig, explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.datasets_path.join(STATS_FILE))
}

pub async fn run_train_set(
    data: &DataArgs,
    contract_args: &ContractArgs,
    test_start: &str,
    test_end: &str,
    output: &Path,
) -> anyhow::Result<()> {
    let config = PipelineConfig::new(&data.datasets_path)?;
    let test_start = parse_day(test_start)?;
    let test_end = parse_day(test_end)?;
    let contract = FeatureContract::load(&contract_args.contract)?;
    let stats = NormalizationStats::load(&stats_path(&config, contract_args.stats.as_deref()))?;
    stats.ensure_covers(&contract.numerical)?;

    info!("Training set. Test period {} - {}", test_start, test_end);
    let rows = joined_history(data, &config, &DateRange::new(config.history_start, test_end)).await?;
    let table = FeatureAssembler::new(&config, &contract).assemble(&rows, Mode::Train)?;
    let split = train_test_split(&table, &contract, &stats, &config, test_start, test_end)?;

    std::fs::create_dir_all(output)?;
    write_tensor(&output.join("X_train.json"), &split.x_train)?;
    write_tensor(&output.join("y_train.json"), &split.y_train)?;
    write_tensor(&output.join("X_test.json"), &split.x_test)?;
    write_tensor(&output.join("y_test.json"), &split.y_test)?;
    Ok(())
}

pub async fn run_stats(
    data: &DataArgs,
    contract_path: &Path,
    test_start: &str,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let config = PipelineConfig::new(&data.datasets_path)?;
    let test_start = parse_day(test_start)?;
    let contract = FeatureContract::load(contract_path)?;

    let rows = joined_history(data, &config, &DateRange::new(config.history_start, test_start)).await?;
    let table = FeatureAssembler::new(&config, &contract).assemble(&rows, Mode::Train)?;
    let train = table.filter_rows(|d| *d < test_start);
    let stats = compute_stats(&train, &contract)?;

    let path = stats_path(&config, output);
    stats.save(&path)?;
    info!("Statistics saved to {}", path.display());
    Ok(())
}

pub async fn run_vocabulary(data: &DataArgs, end: &str, output: &Path) -> anyhow::Result<()> {
    let config = PipelineConfig::new(&data.datasets_path)?;
    let end = parse_day(end)?;
    let rows = joined_history(data, &config, &DateRange::new(config.history_start, end)).await?;

    let contract = observed_contract(&config, &rows)?;
    info!("Observed {} categorical codes", contract.vocabulary.len());
    contract.save(output)?;
    info!(
        "Contract with {} numerical and {} categorical features saved to {}",
        contract.numerical.len(),
        contract.categorical.len(),
        output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stats_path() {
        let config = PipelineConfig::new("/data").unwrap();
        assert_eq!(stats_path(&config, None), PathBuf::from("/data/mean_std_stats.json"));
        assert_eq!(
            stats_path(&config, Some(Path::new("/tmp/s.json"))),
            PathBuf::from("/tmp/s.json")
        );
    }
}
