use std::path::PathBuf;

use anyhow::Context;
use arbiter::config::BotConfig;
use arbiter::host::Host;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// Path to the configuration file. `default.toml` is always read first
    /// and this file is merged over it.
    #[arg(default_value = "arbiter.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let cfg = BotConfig::load(&cli.config).context("loading configuration")?;
    let mut host = Host::new(cfg).context("starting host")?;

    info!("Arbiter version {}", arbiter::VERSION);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            should_exit = host.update(std::time::Duration::from_millis(50)) => {
                if should_exit {
                    break;
                }
            }
            result = &mut ctrl_c, if !interrupted => {
                result.context("listening for shutdown signal")?;
                info!("shutting down nicely (interrupt again to force)");
                interrupted = true;
                host.request_exit_nice();
            }
        }
    }

    info!("shutting down");
    Ok(())
}
