// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use verification_relayer::config::RelayerArgs;
use verification_relayer::node::run_relayer_node;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

// Panics in any task are reported here so the node can stop instead of
// running on with a dead component.
fn install_panic_guard() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        error!("Unhandled panic: {panic_info}");
        let _ = tx.send(panic_info.to_string());
        default_hook(panic_info);
    }));
    rx
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loaded environment from {}", path.display());
    }
    init_logging();

    let args = RelayerArgs::parse();
    let server_config = args.into_config()?.validate()?;
    info!(
        listen_address = %server_config.listen_address,
        interval_ms = server_config.interval.as_millis() as u64,
        "Starting verification relayer"
    );

    let mut panics = install_panic_guard();
    let prometheus_registry = prometheus::Registry::new();
    let mut node = run_relayer_node(server_config, prometheus_registry).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping relayer");
            node.shutdown().await;
            Ok(())
        }
        result = &mut node.server => {
            match result {
                Ok(Ok(())) => warn!("Control plane exited"),
                Ok(Err(e)) => error!("Control plane failed: {e}"),
                Err(e) => error!("Control plane task aborted: {e}"),
            }
            node.shutdown().await;
            std::process::exit(1);
        }
        Some(message) = panics.recv() => {
            error!("Stopping relayer after unhandled panic: {message}");
            node.shutdown().await;
            std::process::exit(1);
        }
    }
}
