//! Stratum Pool
//!
//! Serves miners over Stratum v1. Job templates arrive as JSON lines on
//! stdin; found blocks leave as JSON lines on stdout.

use clap::Parser;
use serde_json::json;
use std::sync::Arc;
use stratum_pool::{
    config::{Args, Config},
    error::{Error, Result},
    stratum::{run_job_feed, ShareResult, StratumServer, StratumService},
    utils::{self, global_metrics},
    VERSION,
};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

const SHARE_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let print_config = args.print_config;

    let config = Config::from_args(args)?;

    if print_config {
        let toml = toml::to_string_pretty(&config)
            .map_err(|e| Error::config(format!("Failed to render config: {}", e)))?;
        println!("{}", toml);
        return Ok(());
    }

    utils::init_logging(&config.logging.level, &config.logging.format);

    info!("Starting stratum-pool v{}", VERSION);
    info!(
        extranonce1_size = config.stratum.extranonce1_size,
        extranonce2_size = config.stratum.extranonce2_size,
        difficulty = config.stratum.initial_difficulty,
        auth = ?config.auth.mode,
        "Pool configured"
    );

    let (share_tx, share_rx) = mpsc::channel(SHARE_CHANNEL_CAPACITY);
    let registry = StratumService::registry_from_config(&config);
    let service = StratumService::new(&config, registry, global_metrics()).with_share_sink(share_tx);
    let server = StratumServer::new(&config, Arc::new(service));

    tokio::spawn(drain_shares(share_rx));

    let publisher = server.publisher();
    tokio::spawn(async move {
        if let Err(e) = run_job_feed(tokio::io::stdin(), publisher).await {
            error!("Job feed failed: {}", e);
        }
    });

    server.run().await
}

/// Write found blocks to stdout, one JSON object per line
async fn drain_shares(mut rx: mpsc::Receiver<ShareResult>) {
    let mut stdout = tokio::io::stdout();

    while let Some(result) = rx.recv().await {
        let Some(block) = result.block else {
            debug!(valid = result.valid, reason = ?result.reason, "Share outcome");
            continue;
        };

        let line = json!({
            "height": block.height,
            "hash": block.hash_hex(),
            "header": hex::encode(&block.header),
            "coinbase": hex::encode(&block.coinbase),
            "cycle": block.cycle,
            "worker": result.worker.map(|w| w.to_username()),
        })
        .to_string()
            + "\n";

        info!(height = block.height, hash = %block.hash_hex(), "Block found");
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            error!("Cannot write found block: {}", e);
            continue;
        }
        if let Err(e) = stdout.flush().await {
            error!("Cannot flush found block: {}", e);
        }
    }
}
