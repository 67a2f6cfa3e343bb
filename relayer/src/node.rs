// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain_client::{ChainClient, DualChainHealthCheck};
use crate::config::RelayerServerConfig;
use crate::contracts::{
    EthVerificationFlagStore, EthVerificationRegistry, VerificationFlagStore, VerificationRegistry,
};
use crate::error::RelayerResult;
use crate::metrics::RelayerMetrics;
use crate::server::{handler::RelayerRequestHandler, run_server};
use crate::status::StatusReporter;
use crate::supervisor::RelayerSupervisor;
use crate::sync_engine::SyncEngine;
use crate::watchdog::{ChainHeight, Observable, RelayerBalance, RelayerWatchDog};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Handles to the running relayer node.
pub struct RelayerNode {
    pub server: JoinHandle<RelayerResult<()>>,
    pub supervisor: Arc<RelayerSupervisor>,
    cancel: CancellationToken,
}

impl RelayerNode {
    /// Stops the sync schedule and the background observers. The control
    /// plane task is left to the caller.
    pub async fn shutdown(&self) {
        self.supervisor.stop().await;
        self.cancel.cancel();
    }
}

pub async fn run_relayer_node(
    config: RelayerServerConfig,
    prometheus_registry: prometheus::Registry,
) -> anyhow::Result<RelayerNode> {
    let metrics = Arc::new(RelayerMetrics::new(&prometheus_registry));
    let cancel = CancellationToken::new();
    let start_time = Instant::now();

    let uptime_metrics = metrics.clone();
    let uptime_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            uptime_metrics
                .server_uptime_seconds
                .set(start_time.elapsed().as_secs() as i64);
            tokio::select! {
                _ = uptime_cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(10)) => {}
            }
        }
    });

    let source_client = Arc::new(ChainClient::new_metered(
        "source",
        &config.source_rpc_url,
        config.source_chain_id,
        None,
        metrics.clone(),
        config.throttle,
    )?);
    let target_client = Arc::new(ChainClient::new_metered(
        "target",
        &config.target_rpc_url,
        config.target_chain_id,
        Some(config.wallet.clone()),
        metrics.clone(),
        config.throttle,
    )?);

    let registry: Arc<dyn VerificationRegistry> = Arc::new(EthVerificationRegistry::new(
        source_client.clone(),
        config.source_contract_address,
        &config.verification_event_signature,
    ));
    let flag_store: Arc<dyn VerificationFlagStore> = Arc::new(EthVerificationFlagStore::new(
        target_client.clone(),
        config.target_contract_address,
        config.gas_policy,
        metrics.clone(),
    )?);
    info!(
        relayer = %crate::types::display_address(&flag_store.relayer_address()),
        policy = %config.policy,
        "Relayer components initialized"
    );

    let engine = Arc::new(SyncEngine::new(
        registry.clone(),
        flag_store.clone(),
        config.policy,
        config.discovery_window_blocks,
        metrics.clone(),
    ));
    let supervisor = Arc::new(RelayerSupervisor::new(
        engine,
        Arc::new(DualChainHealthCheck::new(
            source_client.clone(),
            target_client.clone(),
        )),
        config.interval,
        metrics.clone(),
    ));
    let reporter = Arc::new(StatusReporter::new(
        supervisor.clone(),
        registry,
        flag_store.clone(),
    ));

    let observables: Vec<Box<dyn Observable + Send + Sync>> = vec![
        Box::new(RelayerBalance::new(
            flag_store,
            metrics.relayer_balance_milli_ether.clone(),
        )),
        Box::new(ChainHeight::new(
            source_client,
            metrics.chain_block_height.clone(),
        )),
        Box::new(ChainHeight::new(
            target_client,
            metrics.chain_block_height.clone(),
        )),
    ];
    tokio::spawn(RelayerWatchDog::new(observables, cancel.clone()).run());

    // The control plane comes up first so status stays reachable when startup fails.
    let handler = RelayerRequestHandler::new(supervisor.clone(), reporter, prometheus_registry);
    let server = run_server(&config.listen_address, handler, metrics);

    match supervisor.start().await {
        Ok(()) => info!("Cross-chain verification relayer started"),
        Err(e) => error!(
            error_type = e.error_type(),
            "Failed to start relayer service, control plane stays up: {e}"
        ),
    }

    Ok(RelayerNode {
        server,
        supervisor,
        cancel,
    })
}
