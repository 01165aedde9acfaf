//! Binary entry point.

use anyhow::Context;
use clap::Parser;
use intra_bot::{App, Settings};
use tracing::info;

#[derive(Parser)]
#[command(name = "intra-bot", about = "Intraday equity trading engine")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    intra_telemetry::init_logging().context("logging init failed")?;

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config))?;

    let app = App::start(settings).await?;
    let control = app.control();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("signal handler failed")?;
            info!("interrupt received");
            control.shutdown();
        }
        () = app.wait() => {}
    }

    app.shutdown().await;
    Ok(())
}
