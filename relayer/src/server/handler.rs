// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{RelayerError, RelayerResult};
use crate::status::{process_info, MemoryUsage, RelayerStatistics, RelayerStatus, StatusReporter};
use crate::supervisor::RelayerSupervisor;
use crate::types::SyncOutcome;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

pub const SERVICE_NAME: &str = "cross-chain verification relayer";
pub const HEALTH_SERVICE_NAME: &str = "cross-chain-verification-relayer";
pub const NOT_INITIALIZED: &str = "not-initialized";

#[async_trait]
pub trait RelayerRequestHandlerTrait {
    // Current run state, or zeroed statistics while the relayer is not running
    async fn handle_status(&self) -> RelayerResult<StatusResponse>;
    async fn handle_statistics(&self) -> RelayerResult<StatsResponse>;
    async fn handle_health(&self) -> RelayerResult<HealthResponse>;
    // Full discovery run outside the schedule
    async fn handle_trigger_sync(&self) -> RelayerResult<MessageResponse>;
    // Sync exactly the given addresses, skipping discovery
    async fn handle_sync_addresses(
        &self,
        addresses: Vec<String>,
    ) -> RelayerResult<SyncAddressesResponse>;
    async fn handle_reset_sync(&self) -> RelayerResult<MessageResponse>;
    // Prometheus text exposition of every registered family
    async fn handle_metrics(&self) -> RelayerResult<String>;
}

/// Statistics rendered while the supervisor is not running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleStatistics {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub verified_users_updated: u64,
    pub addresses_synced: u64,
    pub addresses_skipped: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub status: &'static str,
}

impl IdleStatistics {
    fn new() -> Self {
        Self {
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            verified_users_updated: 0,
            addresses_synced: 0,
            addresses_skipped: 0,
            last_run: None,
            status: NOT_INITIALIZED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleStatus {
    pub is_running: bool,
    pub status: &'static str,
    pub stats: IdleStatistics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StatusBody {
    Running(Box<RelayerStatus>),
    Idle(IdleStatus),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub body: StatusBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StatisticsBody {
    Running(RelayerStatistics),
    Idle(IdleStatistics),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsResponse {
    pub service: &'static str,
    pub timestamp: DateTime<Utc>,
    pub statistics: StatisticsBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub service: &'static str,
    pub timestamp: DateTime<Utc>,
    /// Process uptime in seconds.
    pub uptime: u64,
    pub memory: MemoryUsage,
    pub relayer: Box<RelayerStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl MessageResponse {
    fn now(message: &'static str) -> Self {
        Self {
            message,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncAddressesResponse {
    pub message: &'static str,
    pub result: SyncOutcome,
    pub timestamp: DateTime<Utc>,
}

pub struct RelayerRequestHandler {
    supervisor: Arc<RelayerSupervisor>,
    reporter: Arc<StatusReporter>,
    registry: Registry,
}

impl RelayerRequestHandler {
    pub fn new(
        supervisor: Arc<RelayerSupervisor>,
        reporter: Arc<StatusReporter>,
        registry: Registry,
    ) -> Self {
        Self {
            supervisor,
            reporter,
            registry,
        }
    }
}

#[async_trait]
impl RelayerRequestHandlerTrait for RelayerRequestHandler {
    async fn handle_status(&self) -> RelayerResult<StatusResponse> {
        let body = if self.reporter.is_running().await {
            StatusBody::Running(Box::new(self.reporter.snapshot().await))
        } else {
            StatusBody::Idle(IdleStatus {
                is_running: false,
                status: NOT_INITIALIZED,
                stats: IdleStatistics::new(),
            })
        };
        Ok(StatusResponse {
            service: SERVICE_NAME,
            timestamp: Utc::now(),
            body,
        })
    }

    async fn handle_statistics(&self) -> RelayerResult<StatsResponse> {
        let statistics = if self.reporter.is_running().await {
            StatisticsBody::Running(self.reporter.statistics().await)
        } else {
            StatisticsBody::Idle(IdleStatistics::new())
        };
        Ok(StatsResponse {
            service: SERVICE_NAME,
            timestamp: Utc::now(),
            statistics,
        })
    }

    async fn handle_health(&self) -> RelayerResult<HealthResponse> {
        let process = tokio::task::spawn_blocking(process_info)
            .await
            .map_err(|e| RelayerError::Internal(format!("process info task failed: {e}")))?;
        Ok(HealthResponse {
            service: HEALTH_SERVICE_NAME,
            timestamp: Utc::now(),
            uptime: process.uptime,
            memory: process.memory,
            relayer: Box::new(self.reporter.snapshot().await),
        })
    }

    async fn handle_trigger_sync(&self) -> RelayerResult<MessageResponse> {
        info!("Manual sync triggered via API");
        self.supervisor.trigger_manual_sync(None).await?;
        Ok(MessageResponse::now(
            "Cross-chain sync operation completed successfully",
        ))
    }

    async fn handle_sync_addresses(
        &self,
        addresses: Vec<String>,
    ) -> RelayerResult<SyncAddressesResponse> {
        info!("Manual sync for {} addresses via API", addresses.len());
        let result = self.supervisor.trigger_manual_sync(Some(addresses)).await?;
        Ok(SyncAddressesResponse {
            message: "Address sync completed",
            result,
            timestamp: Utc::now(),
        })
    }

    async fn handle_reset_sync(&self) -> RelayerResult<MessageResponse> {
        info!("Sync state reset via API");
        self.supervisor.reset_sync_state().await?;
        Ok(MessageResponse::now("Sync state reset successfully"))
    }

    async fn handle_metrics(&self) -> RelayerResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| RelayerError::Internal(format!("failed to encode metrics: {e}")))?;
        String::from_utf8(buffer)
            .map_err(|e| RelayerError::Internal(format!("metrics are not valid utf-8: {e}")))
    }
}
