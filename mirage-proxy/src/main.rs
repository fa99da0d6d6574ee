#![forbid(unsafe_code)]

use clap::Parser;
use mirage_proxy_lib::telemetry::{init_metrics, init_tracing, start_observability_server};
use mirage_proxy_lib::{load_from_path, run, watch_config, ConfigStore};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Mirage web-rewriting proxy")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", default_value = "config/mirage.toml")]
    config: PathBuf,

    /// Reload the configuration when the file changes
    #[arg(short, long)]
    watch: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match load_from_path(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = init_tracing(&cfg.logging, &cfg.telemetry) {
        eprintln!("failed to initialize tracing: {err}");
        std::process::exit(1);
    }
    info!(listen = %cfg.listen, static_dir = %cfg.static_dir.display(), "configuration loaded");

    let shutdown = CancellationToken::new();

    let metrics = match cfg.telemetry.metrics_port {
        Some(port) => match init_metrics() {
            Ok((metrics, registry)) => {
                let token = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(err) = start_observability_server(port, registry, token).await {
                        error!(%err, "observability server exited with error");
                    }
                });
                Some(metrics)
            }
            Err(err) => {
                warn!(%err, "failed to initialize metrics, continuing without");
                None
            }
        },
        None => None,
    };

    let store = ConfigStore::new(cfg);

    if cli.watch {
        if let Err(err) = watch_config(cli.config.clone(), store.clone(), shutdown.clone()) {
            warn!(%err, "config hot reload disabled");
        }
    }

    let result = run(store, metrics, shutdown.clone()).await;
    shutdown.cancel();

    if let Err(err) = result {
        error!(%err, "proxy exited with error");
        std::process::exit(1);
    }
}
