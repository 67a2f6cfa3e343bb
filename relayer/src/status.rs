// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::contracts::{VerificationFlagStore, VerificationRegistry};
use crate::supervisor::{OperationalStats, RelayerState, RelayerSupervisor};
use crate::sync_engine::ReconciliationPolicy;
use crate::types::display_address;
use serde::Serialize;
use std::sync::Arc;
use sysinfo::System;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayerStatistics {
    #[serde(flatten)]
    pub stats: OperationalStats,
    pub is_running: bool,
    /// Milliseconds since the supervisor started, zero while stopped.
    pub uptime: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    pub name: String,
    pub chain_id: u64,
    pub contract_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetChainInfo {
    #[serde(flatten)]
    pub chain: ChainInfo,
    pub relayer_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relayer_balance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relayer_balance_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockchainStatus {
    pub source: ChainInfo,
    pub target: TargetChainInfo,
    pub synced_addresses: usize,
    pub known_addresses: usize,
    pub policy: ReconciliationPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayerStatus {
    pub is_running: bool,
    pub status: RelayerState,
    pub interval_ms: u64,
    pub stats: RelayerStatistics,
    pub blockchain: BlockchainStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    /// Resident set size in bytes.
    pub rss: u64,
    pub virtual_memory: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Seconds since the process started.
    pub uptime: u64,
    pub memory: MemoryUsage,
}

/// Read-only view over the supervisor, the engine and both contracts.
pub struct StatusReporter {
    supervisor: Arc<RelayerSupervisor>,
    registry: Arc<dyn VerificationRegistry>,
    flag_store: Arc<dyn VerificationFlagStore>,
}

impl StatusReporter {
    pub fn new(
        supervisor: Arc<RelayerSupervisor>,
        registry: Arc<dyn VerificationRegistry>,
        flag_store: Arc<dyn VerificationFlagStore>,
    ) -> Self {
        Self {
            supervisor,
            registry,
            flag_store,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.supervisor.is_running().await
    }

    pub async fn statistics(&self) -> RelayerStatistics {
        RelayerStatistics {
            stats: self.supervisor.stats().await,
            is_running: self.supervisor.is_running().await,
            uptime: self.supervisor.uptime().await.as_millis() as u64,
        }
    }

    pub async fn snapshot(&self) -> RelayerStatus {
        let engine = self.supervisor.engine();
        let relayer = self.flag_store.relayer_address();
        let (relayer_balance, relayer_balance_error) = match self.flag_store.relayer_balance().await
        {
            Ok(wei) => (Some(ethers::utils::format_ether(wei)), None),
            Err(e) => {
                tracing::warn!("Failed to read relayer balance: {e}");
                (None, Some(e.to_string()))
            }
        };
        RelayerStatus {
            is_running: self.supervisor.is_running().await,
            status: self.supervisor.state().await,
            interval_ms: self.supervisor.interval().as_millis() as u64,
            stats: self.statistics().await,
            blockchain: BlockchainStatus {
                source: ChainInfo {
                    name: self.registry.chain_name().to_string(),
                    chain_id: self.registry.chain_id(),
                    contract_address: display_address(&self.registry.contract_address()),
                },
                target: TargetChainInfo {
                    chain: ChainInfo {
                        name: self.flag_store.chain_name().to_string(),
                        chain_id: self.flag_store.chain_id(),
                        contract_address: display_address(&self.flag_store.contract_address()),
                    },
                    relayer_address: display_address(&relayer),
                    relayer_balance,
                    relayer_balance_error,
                },
                synced_addresses: engine.synced_count().await,
                known_addresses: engine.known_count().await,
                policy: engine.policy(),
            },
        }
    }
}

/// Uptime and memory of the current process, zeroed when the platform does
/// not expose them.
pub fn process_info() -> ProcessInfo {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return ProcessInfo::default();
    };
    let mut sys = System::new();
    sys.refresh_process(pid);
    sys.process(pid)
        .map(|process| ProcessInfo {
            uptime: process.run_time(),
            memory: MemoryUsage {
                rss: process.memory(),
                virtual_memory: process.virtual_memory(),
            },
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayerError;
    use crate::metrics::RelayerMetrics;
    use crate::sync_engine::SyncEngine;
    use crate::test_utils::{MockFlagStore, MockHealthCheck, MockVerificationRegistry};
    use ethers::types::{Address, U256};
    use std::time::Duration;

    fn reporter() -> (StatusReporter, Arc<RelayerSupervisor>, Arc<MockVerificationRegistry>, Arc<MockFlagStore>) {
        let registry = Arc::new(MockVerificationRegistry::default());
        let store = Arc::new(MockFlagStore::default());
        let metrics = Arc::new(RelayerMetrics::new_for_testing());
        let engine = Arc::new(SyncEngine::new(
            registry.clone(),
            store.clone(),
            ReconciliationPolicy::MarkAllDiscovered,
            2000,
            metrics.clone(),
        ));
        let supervisor = Arc::new(RelayerSupervisor::new(
            engine,
            Arc::new(MockHealthCheck::healthy()),
            Duration::from_secs(10),
            metrics,
        ));
        let reporter = StatusReporter::new(supervisor.clone(), registry.clone(), store.clone());
        (reporter, supervisor, registry, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reflects_components() {
        let (reporter, supervisor, registry, store) = reporter();
        registry.set_discovered(vec![Address::from_low_u64_be(1), Address::from_low_u64_be(2)]);
        store.set_balance(Ok(U256::exp10(18) / 4));

        let status = reporter.snapshot().await;
        assert!(!status.is_running);
        assert_eq!(status.status, RelayerState::Stopped);

        supervisor.start().await.unwrap();
        let status = reporter.snapshot().await;
        assert!(status.is_running);
        assert_eq!(status.status, RelayerState::Running);
        assert_eq!(status.interval_ms, 10_000);
        assert_eq!(status.stats.stats.successful_runs, 1);
        assert_eq!(status.blockchain.synced_addresses, 2);
        assert_eq!(status.blockchain.known_addresses, 2);
        assert_eq!(status.blockchain.source.chain_id, 42220);
        assert_eq!(status.blockchain.target.chain.chain_id, 11155111);
        assert_eq!(
            status.blockchain.target.relayer_balance.as_deref(),
            Some("0.250000000000000000")
        );
        assert_eq!(status.blockchain.target.relayer_balance_error, None);
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_balance_failure_is_reported_inline() {
        let (reporter, _supervisor, _registry, store) = reporter();
        store.set_balance(Err(RelayerError::Network("connection refused".into())));
        let status = reporter.snapshot().await;
        assert_eq!(status.blockchain.target.relayer_balance, None);
        assert_eq!(
            status.blockchain.target.relayer_balance_error.as_deref(),
            Some("network error: connection refused")
        );
    }

    #[tokio::test]
    async fn test_status_json_shape() {
        let (reporter, _supervisor, _registry, _store) = reporter();
        let json = serde_json::to_value(reporter.snapshot().await).unwrap();
        assert_eq!(json["isRunning"], false);
        assert_eq!(json["status"], "stopped");
        assert_eq!(json["stats"]["totalRuns"], 0);
        assert_eq!(json["stats"]["uptime"], 0);
        assert_eq!(json["stats"]["lastRun"], serde_json::Value::Null);
        assert_eq!(json["blockchain"]["policy"], "mark-all-discovered");
        assert_eq!(json["blockchain"]["target"]["chainId"], 11155111);
        assert!(json["blockchain"]["target"]["relayerAddress"].is_string());
    }

    #[test]
    fn test_process_info() {
        let info = process_info();
        assert!(info.memory.rss > 0);
    }
}
