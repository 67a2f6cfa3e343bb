// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Periodic observations exported as gauges: the relayer's gas balance and
//! the block height of each chain.

use crate::chain_client::ChainClient;
use crate::contracts::VerificationFlagStore;
use async_trait::async_trait;
use ethers::providers::JsonRpcClient;
use ethers::types::U256;
use futures::future::join_all;
use prometheus::{IntGauge, IntGaugeVec};
use std::sync::Arc;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[async_trait]
pub trait Observable {
    fn name(&self) -> &str;
    async fn observe_and_report(&self);
    fn interval(&self) -> Duration;
}

pub struct RelayerWatchDog {
    observables: Vec<Box<dyn Observable + Send + Sync>>,
    cancel: CancellationToken,
}

impl RelayerWatchDog {
    pub fn new(
        observables: Vec<Box<dyn Observable + Send + Sync>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            observables,
            cancel,
        }
    }

    /// Runs every observable on its own interval until cancelled.
    pub async fn run(self) {
        let cancel = self.cancel;
        let handles = self.observables.into_iter().map(|observable| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(observable.interval());
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                info!("Starting observable {}", observable.name());
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => observable.observe_and_report().await,
                    }
                }
                info!("Observable {} stopped", observable.name());
            })
        });
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Watchdog task failed: {e}");
            }
        }
    }
}

pub struct RelayerBalance {
    flag_store: Arc<dyn VerificationFlagStore>,
    metric: IntGauge,
}

impl RelayerBalance {
    pub fn new(flag_store: Arc<dyn VerificationFlagStore>, metric: IntGauge) -> Self {
        Self { flag_store, metric }
    }
}

fn wei_to_milli_ether(wei: U256) -> i64 {
    let milli = wei / U256::exp10(15);
    if milli > U256::from(i64::MAX as u64) {
        i64::MAX
    } else {
        milli.as_u64() as i64
    }
}

#[async_trait]
impl Observable for RelayerBalance {
    fn name(&self) -> &str {
        "RelayerBalance"
    }

    async fn observe_and_report(&self) {
        match self.flag_store.relayer_balance().await {
            Ok(wei) => {
                self.metric.set(wei_to_milli_ether(wei));
                info!(
                    "Relayer balance on {}: {} ether",
                    self.flag_store.chain_name(),
                    ethers::utils::format_ether(wei)
                );
            }
            Err(e) => error!("Error getting relayer balance: {e}"),
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(60)
    }
}

pub struct ChainHeight<P> {
    client: Arc<ChainClient<P>>,
    metric: IntGaugeVec,
}

impl<P> ChainHeight<P> {
    pub fn new(client: Arc<ChainClient<P>>, metric: IntGaugeVec) -> Self {
        Self { client, metric }
    }
}

#[async_trait]
impl<P> Observable for ChainHeight<P>
where
    P: JsonRpcClient + Clone + 'static,
{
    fn name(&self) -> &str {
        "ChainHeight"
    }

    async fn observe_and_report(&self) {
        match self.client.current_block_height().await {
            Ok(height) => {
                self.metric
                    .with_label_values(&[self.client.name()])
                    .set(height as i64);
            }
            Err(e) => error!("Error getting {} block height: {e}", self.client.name()),
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(30)
    }
}
