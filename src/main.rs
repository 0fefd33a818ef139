use anyhow::Result;
use clap::Parser;
use homeserve::cli::Cli;
use homeserve::config::AppConfig;
use homeserve::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    telemetry::init(&config.log_level)?;

    let cli = Cli::parse();
    cli.run(config).await
}
