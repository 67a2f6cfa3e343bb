// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain_client::HealthCheck;
use crate::error::{RelayerError, RelayerResult};
use crate::metrics::RelayerMetrics;
use crate::sync_engine::SyncEngine;
use crate::types::SyncOutcome;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelayerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Startup,
    Scheduled,
    Manual,
}

impl SyncTrigger {
    fn as_label(&self) -> &'static str {
        match self {
            SyncTrigger::Startup => "startup",
            SyncTrigger::Scheduled => "scheduled",
            SyncTrigger::Manual => "manual",
        }
    }
}

/// Counters accumulated over the supervisor's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationalStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_run_duration_ms: Option<u64>,
    // never reset, unlike the address counters below
    pub verified_users_updated: u64,
    pub addresses_synced: u64,
    pub addresses_skipped: u64,
    pub errors: u64,
}

struct Lifecycle {
    state: RelayerState,
    cancel: Option<CancellationToken>,
    schedule: Option<JoinHandle<()>>,
    started_at: Option<Instant>,
}

/// Owns the sync schedule: gates startup on the health check, drives the
/// engine on a fixed period and records every run into [`OperationalStats`].
pub struct RelayerSupervisor {
    engine: Arc<SyncEngine>,
    health_check: Arc<dyn HealthCheck>,
    interval: Duration,
    lifecycle: RwLock<Lifecycle>,
    stats: RwLock<OperationalStats>,
    metrics: Arc<RelayerMetrics>,
}

impl RelayerSupervisor {
    pub fn new(
        engine: Arc<SyncEngine>,
        health_check: Arc<dyn HealthCheck>,
        interval: Duration,
        metrics: Arc<RelayerMetrics>,
    ) -> Self {
        Self {
            engine,
            health_check,
            interval,
            lifecycle: RwLock::new(Lifecycle {
                state: RelayerState::Stopped,
                cancel: None,
                schedule: None,
                started_at: None,
            }),
            stats: RwLock::new(OperationalStats::default()),
            metrics,
        }
    }

    /// Health check, one immediate run, then the periodic schedule.
    ///
    /// On a failed health check the supervisor goes back to `Stopped` and the
    /// error is returned, as it is when `stop` lands before the schedule is
    /// armed. Starting an already running supervisor is a no-op.
    pub async fn start(self: &Arc<Self>) -> RelayerResult<()> {
        {
            let mut lifecycle = self.lifecycle.write().await;
            match lifecycle.state {
                RelayerState::Stopped => lifecycle.state = RelayerState::Starting,
                RelayerState::Running | RelayerState::Starting => {
                    tracing::warn!("Relayer service is already running");
                    return Ok(());
                }
                RelayerState::Stopping => {
                    return Err(RelayerError::Internal(
                        "relayer service is still stopping".into(),
                    ))
                }
            }
        }
        tracing::info!("Starting cross-chain verification relayer service");

        if let Err(e) = self.health_check.check().await {
            tracing::error!(error_type = e.error_type(), "Health check failed: {e}");
            self.lifecycle.write().await.state = RelayerState::Stopped;
            return Err(e);
        }

        let cancel = CancellationToken::new();
        {
            let mut lifecycle = self.lifecycle.write().await;
            if lifecycle.state != RelayerState::Starting {
                tracing::warn!("Relayer service stopped while starting");
                return Err(stopped_during_startup());
            }
            lifecycle.state = RelayerState::Running;
            lifecycle.cancel = Some(cancel.clone());
            lifecycle.started_at = Some(Instant::now());
        }
        self.metrics.supervisor_running.set(1);

        let _ = self.perform_sync_operation(SyncTrigger::Startup, None).await;

        let mut lifecycle = self.lifecycle.write().await;
        if cancel.is_cancelled() {
            tracing::warn!("Relayer service stopped during the startup sync");
            return Err(stopped_during_startup());
        }
        let this = self.clone();
        lifecycle.schedule = Some(tokio::spawn(async move {
            let schedule = tokio::spawn(this.clone().run_schedule(cancel));
            if let Err(e) = schedule.await {
                if e.is_panic() {
                    tracing::error!("Sync scheduler panicked, relayer service stopped");
                    this.mark_stopped().await;
                }
            }
        }));
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            "Cross-chain sync service started"
        );
        Ok(())
    }

    async fn run_schedule(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = time::interval_at(Instant::now() + self.interval, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Sync schedule cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let _ = self.perform_sync_operation(SyncTrigger::Scheduled, None).await;
                }
            }
        }
    }

    async fn mark_stopped(&self) {
        let mut lifecycle = self.lifecycle.write().await;
        lifecycle.state = RelayerState::Stopped;
        lifecycle.cancel = None;
        lifecycle.schedule = None;
        lifecycle.started_at = None;
        self.metrics.supervisor_running.set(0);
    }

    /// Cancel the schedule. A scheduled run already in progress completes and
    /// is recorded before this returns. The startup run is not awaited: it may
    /// still be finishing after this returns, and the pending `start` then
    /// fails. Stopping a stopped supervisor is a no-op.
    pub async fn stop(&self) {
        let (cancel, schedule) = {
            let mut lifecycle = self.lifecycle.write().await;
            match lifecycle.state {
                RelayerState::Stopped | RelayerState::Stopping => {
                    tracing::debug!("Relayer service is not running");
                    return;
                }
                RelayerState::Starting | RelayerState::Running => {}
            }
            lifecycle.state = RelayerState::Stopping;
            (lifecycle.cancel.take(), lifecycle.schedule.take())
        };
        tracing::info!("Stopping cross-chain sync service");
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(schedule) = schedule {
            let _ = schedule.await;
        }
        self.mark_stopped().await;
        tracing::info!("Cross-chain sync service stopped");
    }

    /// Run the engine once and fold the result into the statistics.
    pub async fn perform_sync_operation(
        &self,
        trigger: SyncTrigger,
        addresses: Option<Vec<String>>,
    ) -> RelayerResult<SyncOutcome> {
        let started = Instant::now();
        {
            let mut stats = self.stats.write().await;
            stats.total_runs += 1;
            stats.last_run = Some(Utc::now());
        }
        tracing::info!(trigger = trigger.as_label(), "Starting cross-chain verification sync");

        let result = self.engine.sync(addresses).await;
        let elapsed = started.elapsed();
        let duration_ms = elapsed.as_millis() as u64;

        let mut stats = self.stats.write().await;
        stats.last_run_duration_ms = Some(duration_ms);
        match &result {
            Ok(outcome) => {
                stats.successful_runs += 1;
                stats.addresses_synced += outcome.synced;
                stats.addresses_skipped += outcome.skipped;
                stats.errors += outcome.errors;
                stats.verified_users_updated += outcome.synced;
                stats.last_error = None;
                self.metrics
                    .last_successful_sync_timestamp
                    .set(Utc::now().timestamp());
                tracing::info!(
                    duration_ms,
                    synced = outcome.synced,
                    skipped = outcome.skipped,
                    errors = outcome.errors,
                    "Sync operation completed"
                );
            }
            Err(e) => {
                stats.failed_runs += 1;
                stats.last_error = Some(e.to_string());
                tracing::error!(
                    duration_ms,
                    error_type = e.error_type(),
                    "Sync operation failed: {e}"
                );
            }
        }
        drop(stats);

        let outcome_label = if result.is_ok() { "ok" } else { "err" };
        self.metrics
            .sync_runs
            .with_label_values(&[trigger.as_label(), outcome_label])
            .inc();
        self.metrics
            .sync_run_latency
            .with_label_values(&[trigger.as_label()])
            .observe(elapsed.as_secs_f64());
        result
    }

    /// Out-of-band run. `None` runs discovery, `Some` syncs exactly the given
    /// addresses. Queues behind a run already in progress.
    pub async fn trigger_manual_sync(
        &self,
        addresses: Option<Vec<String>>,
    ) -> RelayerResult<SyncOutcome> {
        self.ensure_running().await?;
        if let Some(addresses) = &addresses {
            tracing::info!("Manually syncing {} specific addresses", addresses.len());
        }
        self.perform_sync_operation(SyncTrigger::Manual, addresses)
            .await
    }

    /// Forget the dedup state and zero the counters derived from it.
    pub async fn reset_sync_state(&self) -> RelayerResult<()> {
        self.ensure_running().await?;
        self.engine.reset().await;
        let mut stats = self.stats.write().await;
        stats.addresses_synced = 0;
        stats.addresses_skipped = 0;
        stats.errors = 0;
        Ok(())
    }

    async fn ensure_running(&self) -> RelayerResult<()> {
        if self.is_running().await {
            Ok(())
        } else {
            Err(RelayerError::NotRunning)
        }
    }

    pub async fn state(&self) -> RelayerState {
        self.lifecycle.read().await.state
    }

    pub async fn is_running(&self) -> bool {
        self.state().await == RelayerState::Running
    }

    pub async fn stats(&self) -> OperationalStats {
        self.stats.read().await.clone()
    }

    /// Time since the last successful `start`, zero while stopped.
    pub async fn uptime(&self) -> Duration {
        self.lifecycle
            .read()
            .await
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }
}

fn stopped_during_startup() -> RelayerError {
    RelayerError::Internal("relayer service stopped during startup".into())
}
