use std::path::Path;

use anyhow::Context;
use clap::Parser;

mod cli;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("sticker_scout error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    dotenvy::dotenv().ok();
    let config = args.into_config();

    std::fs::create_dir_all(&config.outdir)
        .with_context(|| format!("failed to create output directory {}", config.outdir.display()))?;
    init_tracing(&config.outdir.join("scout.log"))?;

    println!(
        "sticker_scout v{} - sticker wall identifier & indexer",
        env!("CARGO_PKG_VERSION")
    );

    let out_csv = sticker_scout::pipeline::run(&config).await?;
    println!("Wrote {}", out_csv.display());
    Ok(())
}

/// Timestamped file log in the output directory. Filter overridable via
/// `SCOUT_LOG`; progress still goes to stdout separately.
fn init_tracing(log_path: &Path) -> anyhow::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;

    let filter = tracing_subscriber::EnvFilter::try_from_env("SCOUT_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Arc::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}
