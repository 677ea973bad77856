use anyhow::Result;
use clap::Parser;
use flux_config::{ConfigLoader, DEFAULT_CONFIG_FILE};
use flux_server::{load_rules, AppState};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Rule file or directory of JSON rule files
    #[arg(short, long)]
    rules: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ConfigLoader::new(&args.config).load()?;
    flux_logging::init_logging(&config.logging)?;
    tracing::info!(config = %args.config.display(), "Starting FLUX automation");

    let state = AppState::build(&config)?;
    if let Some(path) = &args.rules {
        let rules = load_rules(path)?;
        let total = rules.len();
        let registered = state.register_rules(rules).await;
        tracing::info!(total, registered, "Rules loaded from {}", path.display());
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    state.shutdown().await;
    Ok(())
}
