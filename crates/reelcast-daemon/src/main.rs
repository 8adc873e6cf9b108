mod bridge;
mod channel;
mod pipeline;
mod scanner;
mod subtitles;
mod transfer;

#[cfg(test)]
mod testing;

use anyhow::Context;
use reelcast_proto::config::Config;
use reelcast_proto::ledger::Ledger;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_logging() -> anyhow::Result<std::path::PathBuf> {
    let data_dir = reelcast_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,reelcast=debug")),
        )
        .init();

    Ok(log_path)
}

/// True when the credential store holds anything at all.
fn has_credentials(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_path = init_logging()?;
    info!("Log file: {:?}", log_path);

    let config = Config::load().context("Failed to load config")?;
    info!("Config loaded from: {:?}", Config::config_path());
    config.validate()?;

    let credentials_dir = config.paths.credentials_dir.clone();
    if !has_credentials(&credentials_dir) {
        warn!(
            "No session credentials in {:?}; pairing is required, watch for the pairing code",
            credentials_dir
        );
    }

    let session = bridge::BridgeSession::new(&config.channel, credentials_dir)?;
    let channel = Arc::new(channel::DeliveryChannel::new(
        Arc::new(session),
        &config.channel,
    ));
    info!("Delivering to {}", channel.destination());
    channel.open().await;

    let catalog = scanner::FeedScanner::new(&config.catalog)?;
    let transfer = transfer::TransferSupervisor::new(&config.transfer, &config.paths);
    info!("Scratch dir {:?}", transfer.scratch_dir());
    let ledger = Ledger::open(&config.paths.ledger_dir)?;
    info!("Ledger at {:?}", ledger.dir());
    let subtitles = subtitles::SubtitleSearch::from_config(&config.subtitles)?
        .map(|s| Box::new(s) as Box<dyn subtitles::SubtitleProvider>);
    let cursor = pipeline::CategoryCursor::new(config.catalog.categories.clone())?;

    let mut controller = pipeline::Controller::new(
        channel.clone(),
        Box::new(catalog),
        Box::new(transfer),
        subtitles,
        ledger,
        cursor,
        pipeline::PipelineSettings::from_config(&config),
    );

    let result = tokio::select! {
        result = controller.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            Ok(())
        }
    };

    channel.close().await;
    if let Err(e) = result {
        error!("Pipeline stopped: {}", e);
        return Err(e.into());
    }
    Ok(())
}
