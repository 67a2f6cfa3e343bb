// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Reconciliation of source chain verifications into target chain flags.
//!
//! One run goes through DISCOVER, FILTER, DECIDE, APPLY and REPORT. Runs are
//! serialized by `run_lock`, so the dedup set and the signer nonce are never
//! touched by two runs at once.

use crate::contracts::{VerificationFlagStore, VerificationRegistry};
use crate::error::RelayerResult;
use crate::metrics::RelayerMetrics;
use crate::types::{display_address, normalize_address, FlagUpdate, SyncOutcome};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// How DECIDE turns a candidate address into a flag write.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ReconciliationPolicy {
    /// Every discovered or explicitly requested address is marked verified
    /// without reading either chain first.
    #[default]
    MarkAllDiscovered,
    /// Confirm the source record and the current target flag before writing.
    ReverifyBeforeWrite,
}

impl std::fmt::Display for ReconciliationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconciliationPolicy::MarkAllDiscovered => write!(f, "mark-all-discovered"),
            ReconciliationPolicy::ReverifyBeforeWrite => write!(f, "reverify-before-write"),
        }
    }
}

#[derive(Debug, Default)]
struct SyncState {
    // addresses whose flag write was confirmed in this process
    synced: HashSet<Address>,
    // every address ever seen, informational
    known: HashSet<Address>,
}

pub struct SyncEngine {
    registry: Arc<dyn VerificationRegistry>,
    flag_store: Arc<dyn VerificationFlagStore>,
    policy: ReconciliationPolicy,
    discovery_window_blocks: u64,
    state: RwLock<SyncState>,
    run_lock: Mutex<()>,
    metrics: Arc<RelayerMetrics>,
}

impl SyncEngine {
    pub fn new(
        registry: Arc<dyn VerificationRegistry>,
        flag_store: Arc<dyn VerificationFlagStore>,
        policy: ReconciliationPolicy,
        discovery_window_blocks: u64,
        metrics: Arc<RelayerMetrics>,
    ) -> Self {
        Self {
            registry,
            flag_store,
            policy,
            discovery_window_blocks,
            state: RwLock::new(SyncState::default()),
            run_lock: Mutex::new(()),
            metrics,
        }
    }

    pub fn policy(&self) -> ReconciliationPolicy {
        self.policy
    }

    /// Run one reconciliation pass.
    ///
    /// With `explicit` set, the given addresses are used verbatim and event
    /// discovery is bypassed. Per-address failures are counted in the outcome;
    /// only a failed discovery fails the run as a whole. A call made while
    /// another run is in progress waits for it to finish.
    pub async fn sync(&self, explicit: Option<Vec<String>>) -> RelayerResult<SyncOutcome> {
        let _run = self.run_lock.lock().await;
        let mut outcome = SyncOutcome::default();

        let candidates = match explicit {
            Some(raw) => self.ingest_explicit(raw, &mut outcome).await,
            None => self.discover().await?,
        };
        if candidates.is_empty() {
            tracing::info!("No addresses to sync");
            self.record_outcome(&outcome).await;
            return Ok(outcome);
        }

        let pending = self.filter(candidates, &mut outcome).await;
        let updates = self.decide(pending, &mut outcome).await;
        if !updates.is_empty() {
            self.apply(&updates, &mut outcome).await;
        }

        tracing::info!(
            synced = outcome.synced,
            skipped = outcome.skipped,
            errors = outcome.errors,
            "Sync completed"
        );
        self.record_outcome(&outcome).await;
        Ok(outcome)
    }

    async fn ingest_explicit(&self, raw: Vec<String>, outcome: &mut SyncOutcome) -> Vec<Address> {
        let mut candidates = Vec::with_capacity(raw.len());
        for entry in raw {
            match normalize_address(&entry) {
                Ok(address) => candidates.push(address),
                Err(e) => {
                    tracing::warn!("Ignoring requested address: {e}");
                    outcome.errors += 1;
                }
            }
        }
        self.remember(&candidates).await;
        candidates
    }

    async fn discover(&self) -> RelayerResult<Vec<Address>> {
        let discovered = self
            .registry
            .discover_recently_verified(self.discovery_window_blocks)
            .await?;
        let known = self.remember(&discovered).await;
        self.metrics
            .addresses_discovered
            .inc_by(discovered.len() as u64);
        tracing::info!(
            discovered = discovered.len(),
            known,
            window_blocks = self.discovery_window_blocks,
            "Discovered addresses from {} events",
            self.registry.chain_name()
        );
        Ok(discovered)
    }

    async fn remember(&self, addresses: &[Address]) -> usize {
        let mut state = self.state.write().await;
        state.known.extend(addresses.iter().copied());
        self.metrics.known_addresses.set(state.known.len() as i64);
        state.known.len()
    }

    // Drops addresses already confirmed in this process, and repeats within the run.
    async fn filter(&self, candidates: Vec<Address>, outcome: &mut SyncOutcome) -> Vec<Address> {
        let state = self.state.read().await;
        let mut seen_in_run = HashSet::new();
        let mut pending = Vec::with_capacity(candidates.len());
        for address in candidates {
            if state.synced.contains(&address) || !seen_in_run.insert(address) {
                tracing::info!(
                    address = %display_address(&address),
                    "Skipping address: already synced"
                );
                outcome.skipped += 1;
            } else {
                pending.push(address);
            }
        }
        pending
    }

    async fn decide(&self, pending: Vec<Address>, outcome: &mut SyncOutcome) -> Vec<FlagUpdate> {
        match self.policy {
            ReconciliationPolicy::MarkAllDiscovered => {
                pending.into_iter().map(FlagUpdate::verified).collect()
            }
            ReconciliationPolicy::ReverifyBeforeWrite => {
                let mut updates = Vec::with_capacity(pending.len());
                for address in pending {
                    if self.needs_write(address, outcome).await {
                        updates.push(FlagUpdate::verified(address));
                    }
                }
                updates
            }
        }
    }

    async fn needs_write(&self, address: Address, outcome: &mut SyncOutcome) -> bool {
        let shown = display_address(&address);
        match self.registry.read_verification_record(address).await {
            Err(e) => {
                tracing::warn!(address = %shown, "Source record read failed, retrying later: {e}");
                outcome.errors += 1;
                return false;
            }
            Ok(None) => {
                tracing::info!(address = %shown, "No verification record on source chain");
                outcome.skipped += 1;
                return false;
            }
            Ok(Some(_)) => {}
        }
        match self.flag_store.read_verification_flag(address).await {
            Ok(true) => {
                tracing::info!(address = %shown, "Already verified on target chain");
                self.state.write().await.synced.insert(address);
                outcome.skipped += 1;
                false
            }
            Ok(false) => true,
            Err(e) => {
                tracing::warn!(address = %shown, "Target flag read failed, assuming unverified: {e}");
                true
            }
        }
    }

    async fn apply(&self, updates: &[FlagUpdate], outcome: &mut SyncOutcome) {
        tracing::info!(
            count = updates.len(),
            "Updating {} addresses on {}",
            updates.len(),
            self.flag_store.chain_name()
        );
        let outcomes = self.flag_store.write_verification_flags_batch(updates).await;
        let mut state = self.state.write().await;
        for write in outcomes {
            match write.result {
                Ok(_) => {
                    state.synced.insert(write.address);
                    outcome.synced += 1;
                }
                Err(_) => outcome.errors += 1,
            }
        }
    }

    async fn record_outcome(&self, outcome: &SyncOutcome) {
        self.metrics.addresses_synced.inc_by(outcome.synced);
        self.metrics.addresses_skipped.inc_by(outcome.skipped);
        self.metrics.addresses_errored.inc_by(outcome.errors);
        let synced = self.state.read().await.synced.len();
        self.metrics.synced_addresses.set(synced as i64);
    }

    /// Forget every synced and known address.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.synced.clear();
        state.known.clear();
        self.metrics.synced_addresses.set(0);
        self.metrics.known_addresses.set(0);
        tracing::info!("Sync state reset");
    }

    pub async fn synced_count(&self) -> usize {
        self.state.read().await.synced.len()
    }

    pub async fn known_count(&self) -> usize {
        self.state.read().await.known.len()
    }

    pub async fn is_synced(&self, address: &Address) -> bool {
        self.state.read().await.synced.contains(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayerError;
    use crate::test_utils::{MockFlagStore, MockVerificationRegistry};
    use std::time::Duration;

    const AAA: &str = "0x00000000000000000000000000000000000aaaaa";
    const BBB: &str = "0x00000000000000000000000000000000000bbbbb";
    const CCC: &str = "0x00000000000000000000000000000000000ccccc";

    fn addr(raw: &str) -> Address {
        normalize_address(raw).unwrap()
    }

    fn engine_with(
        policy: ReconciliationPolicy,
    ) -> (Arc<SyncEngine>, Arc<MockVerificationRegistry>, Arc<MockFlagStore>) {
        let registry = Arc::new(MockVerificationRegistry::default());
        let store = Arc::new(MockFlagStore::default());
        let engine = Arc::new(SyncEngine::new(
            registry.clone(),
            store.clone(),
            policy,
            2000,
            Arc::new(RelayerMetrics::new_for_testing()),
        ));
        (engine, registry, store)
    }

    fn engine() -> (Arc<SyncEngine>, Arc<MockVerificationRegistry>, Arc<MockFlagStore>) {
        engine_with(ReconciliationPolicy::MarkAllDiscovered)
    }

    fn outcome(synced: u64, skipped: u64, errors: u64) -> SyncOutcome {
        SyncOutcome {
            synced,
            skipped,
            errors,
        }
    }

    #[tokio::test]
    async fn test_fresh_discovery_then_repeat_run() {
        let (engine, registry, store) = engine();
        registry.set_discovered(vec![addr(AAA), addr(BBB)]);

        assert_eq!(engine.sync(None).await.unwrap(), outcome(2, 0, 0));
        assert!(engine.is_synced(&addr(AAA)).await);
        assert!(engine.is_synced(&addr(BBB)).await);
        assert_eq!(registry.discovery_windows(), vec![2000]);

        // second run finds the same events and writes nothing
        assert_eq!(engine.sync(None).await.unwrap(), outcome(0, 2, 0));
        assert_eq!(store.write_attempts(), vec![addr(AAA), addr(BBB)]);
        assert!(store.flag(&addr(AAA)));
    }

    #[tokio::test]
    async fn test_writes_follow_discovery_order() {
        let (engine, registry, store) = engine();
        registry.set_discovered(vec![addr(CCC), addr(AAA), addr(BBB)]);
        engine.sync(None).await.unwrap();
        assert_eq!(
            store.write_attempts(),
            vec![addr(CCC), addr(AAA), addr(BBB)]
        );
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let (engine, registry, store) = engine();
        registry.set_discovered(vec![addr(AAA), addr(BBB), addr(CCC)]);
        store.fail_writes_for(addr(BBB));

        assert_eq!(engine.sync(None).await.unwrap(), outcome(2, 0, 1));
        assert_eq!(store.write_attempts().len(), 3);
        assert!(!engine.is_synced(&addr(BBB)).await);

        // the failed address is retried on the next run
        store.clear_failures();
        assert_eq!(engine.sync(None).await.unwrap(), outcome(1, 2, 0));
        assert!(engine.is_synced(&addr(BBB)).await);
    }

    #[tokio::test]
    async fn test_case_variants_are_one_address() {
        let (engine, _registry, store) = engine();
        let lower = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".to_string();
        let checksum = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".to_string();

        let result = engine
            .sync(Some(vec![lower.clone(), checksum.clone()]))
            .await
            .unwrap();
        assert_eq!(result, outcome(1, 1, 0));
        assert_eq!(engine.known_count().await, 1);
        assert_eq!(store.write_attempts().len(), 1);

        assert_eq!(
            engine.sync(Some(vec![checksum])).await.unwrap(),
            outcome(0, 1, 0)
        );
        assert_eq!(engine.known_count().await, 1);
    }

    #[tokio::test]
    async fn test_manual_sync_bypasses_discovery() {
        let (engine, registry, _store) = engine();
        registry.fail_discovery(RelayerError::Network("source down".into()));

        let result = engine.sync(Some(vec![CCC.to_string()])).await.unwrap();
        assert_eq!(result, outcome(1, 0, 0));
        assert!(engine.is_synced(&addr(CCC)).await);
        assert!(registry.discovery_windows().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_explicit_address_counts_as_error() {
        let (engine, _registry, store) = engine();
        let result = engine
            .sync(Some(vec!["nope".to_string(), AAA.to_string()]))
            .await
            .unwrap();
        assert_eq!(result, outcome(1, 0, 1));
        assert_eq!(store.write_attempts(), vec![addr(AAA)]);
    }

    #[tokio::test]
    async fn test_discovery_failure_fails_the_run() {
        let (engine, registry, store) = engine();
        registry.fail_discovery(RelayerError::Network("timeout".into()));
        assert_eq!(
            engine.sync(None).await.unwrap_err(),
            RelayerError::Network("timeout".into())
        );
        assert!(store.write_attempts().is_empty());
    }

    #[tokio::test]
    async fn test_empty_discovery() {
        let (engine, _registry, store) = engine();
        assert_eq!(engine.sync(None).await.unwrap(), SyncOutcome::default());
        assert!(store.write_attempts().is_empty());
    }

    #[tokio::test]
    async fn test_reset_allows_resync() {
        let (engine, registry, store) = engine();
        registry.set_discovered(vec![addr(AAA)]);
        assert_eq!(engine.sync(None).await.unwrap(), outcome(1, 0, 0));

        engine.reset().await;
        assert_eq!(engine.synced_count().await, 0);
        assert_eq!(engine.known_count().await, 0);

        assert_eq!(engine.sync(None).await.unwrap(), outcome(1, 0, 0));
        assert_eq!(store.write_attempts(), vec![addr(AAA), addr(AAA)]);
    }

    #[tokio::test]
    async fn test_mark_all_policy_reads_neither_chain() {
        let (engine, registry, store) = engine();
        registry.set_discovered(vec![addr(AAA)]);
        store.set_flag(addr(AAA), true);

        assert_eq!(engine.sync(None).await.unwrap(), outcome(1, 0, 0));
        assert_eq!(registry.record_reads(), 0);
        assert_eq!(store.flag_reads(), 0);
    }

    #[tokio::test]
    async fn test_reverify_policy() {
        let (engine, registry, store) =
            engine_with(ReconciliationPolicy::ReverifyBeforeWrite);
        let a = addr(AAA);
        let b = addr(BBB);
        let c = addr(CCC);
        let d = Address::from_low_u64_be(0xd);
        let e = Address::from_low_u64_be(0xe);
        registry.set_discovered(vec![a, b, c, d, e]);
        // a: verified on source, unset on target -> write
        registry.set_record(a, true);
        // b: no source record -> skipped, not cached
        registry.set_record(b, false);
        // c: already true on target -> skipped and cached
        registry.set_record(c, true);
        store.set_flag(c, true);
        // d: source read fails -> error
        registry.fail_record(d);
        // e: target read fails -> write anyway
        registry.set_record(e, true);
        store.fail_reads_for(e);

        assert_eq!(engine.sync(None).await.unwrap(), outcome(2, 2, 1));
        assert_eq!(store.write_attempts(), vec![a, e]);
        assert!(engine.is_synced(&c).await);
        assert!(!engine.is_synced(&b).await);
        assert!(!engine.is_synced(&d).await);

        // b and d are looked at again, c is not
        assert_eq!(engine.sync(None).await.unwrap(), outcome(0, 4, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_runs_do_not_overlap() {
        let (engine, registry, store) = engine();
        registry.set_discovered(vec![addr(AAA), addr(BBB)]);
        store.set_write_delay(Duration::from_secs(5));

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.sync(None).await }
        });
        let second = tokio::spawn({
            let engine = engine.clone();
            async move { engine.sync(None).await }
        });
        let mut results = vec![first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];
        results.sort_by_key(|o| o.synced);

        assert_eq!(results, vec![outcome(0, 2, 0), outcome(2, 0, 0)]);
        assert_eq!(store.max_in_flight(), 1);
        assert_eq!(store.write_attempts().len(), 2);
    }
}
