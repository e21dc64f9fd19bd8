mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::Parser;
use daemon::{config::PipelineConfig, startup, Watcher};
use log::{error, info};

/// VOD watch-and-encode daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = PipelineConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    logging::init(&cfg.encoder_log(), &cfg.error_log(), args.verbose)?;

    info!("[System] VOD daemon starting");
    info!("Configuration loaded:");
    info!("  Root dir: {}", cfg.root_dir.display());
    info!("  ffmpeg: {}", cfg.ffmpeg_bin().display());
    info!("  ffprobe: {}", cfg.ffprobe_bin().display());
    info!("  Source extensions: {:?}", cfg.source_extensions);
    info!("  Max jobs: {}", cfg.max_jobs);
    info!("  Auto quality: {} (SD below {} lines)", cfg.auto_quality, cfg.sd_height_threshold);
    info!("  Delete after encode: {}", cfg.delete_after_encode);
    info!("  Scan interval: {}s, settle interval: {}s", cfg.scan_interval_secs, cfg.settle_interval_secs);

    if let Err(e) = startup::prepare_layout(&cfg) {
        error!("[System] Startup failed: {}", e);
        std::process::exit(1);
    }

    let leftovers = startup::staged_leftovers(&cfg);
    if !leftovers.is_empty() {
        info!("[System] {} staged file(s) need manual attention", leftovers.len());
    }

    let mut watcher = Watcher::new(Arc::new(cfg));
    watcher.run().await;
    Ok(())
}
