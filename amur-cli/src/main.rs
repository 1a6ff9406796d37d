//! Amur CLI - builds model inputs and reports for Amur river level forecasting.

use clap::Parser;
use log::debug;

#[derive(Parser)]
#[command(
    name = "amur-cli",
    version,
    about = "Amur river level forecasting data toolkit"
)]
struct Cli {
    #[command(subcommand)]
    command: amur_cmd::Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    debug!("amur-cli {}", env!("CARGO_PKG_VERSION"));
    amur_cmd::run(cli.command).await
}
