// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain_client::HealthCheck;
use crate::contracts::{ChainContract, VerificationFlagStore, VerificationRegistry};
use crate::error::{RelayerError, RelayerResult};
use crate::types::{TxReceiptSummary, VerificationRecord};
use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const MOCK_REGISTRY_ADDRESS: u64 = 0xaa;
pub const MOCK_FLAG_STORE_ADDRESS: u64 = 0xbb;
pub const MOCK_RELAYER_ADDRESS: u64 = 0x7e1a;

fn present_record(address: Address) -> VerificationRecord {
    VerificationRecord {
        user_address: address,
        timestamp: U256::from(1_700_000_000u64),
        gender: "F".into(),
        nationality: "NLD".into(),
        minimum_age: U256::from(18),
    }
}

#[derive(Default)]
pub struct MockVerificationRegistry {
    discovered: Mutex<Vec<Address>>,
    discovery_error: Mutex<Option<RelayerError>>,
    discovery_windows: Mutex<Vec<u64>>,
    records: Mutex<HashMap<Address, RelayerResult<Option<VerificationRecord>>>>,
    record_reads: AtomicUsize,
}

impl MockVerificationRegistry {
    pub fn set_discovered(&self, addresses: Vec<Address>) {
        *self.discovered.lock().unwrap() = addresses;
    }

    pub fn fail_discovery(&self, err: RelayerError) {
        *self.discovery_error.lock().unwrap() = Some(err);
    }

    pub fn set_record(&self, address: Address, present: bool) {
        let record = present.then(|| present_record(address));
        self.records.lock().unwrap().insert(address, Ok(record));
    }

    pub fn fail_record(&self, address: Address) {
        self.records.lock().unwrap().insert(
            address,
            Err(RelayerError::Network("source read failed".into())),
        );
    }

    pub fn discovery_windows(&self) -> Vec<u64> {
        self.discovery_windows.lock().unwrap().clone()
    }

    pub fn record_reads(&self) -> usize {
        self.record_reads.load(Ordering::SeqCst)
    }
}

impl ChainContract for MockVerificationRegistry {
    fn chain_name(&self) -> &str {
        "source"
    }

    fn chain_id(&self) -> u64 {
        42220
    }

    fn contract_address(&self) -> Address {
        Address::from_low_u64_be(MOCK_REGISTRY_ADDRESS)
    }
}

#[async_trait]
impl VerificationRegistry for MockVerificationRegistry {
    async fn read_verification_record(
        &self,
        address: Address,
    ) -> RelayerResult<Option<VerificationRecord>> {
        self.record_reads.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap()
            .get(&address)
            .cloned()
            .unwrap_or(Ok(None))
    }

    async fn discover_recently_verified(&self, window_blocks: u64) -> RelayerResult<Vec<Address>> {
        self.discovery_windows.lock().unwrap().push(window_blocks);
        if let Some(err) = self.discovery_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.discovered.lock().unwrap().clone())
    }
}

pub struct MockFlagStore {
    flags: Mutex<HashMap<Address, bool>>,
    failing_writes: Mutex<HashSet<Address>>,
    failing_reads: Mutex<HashSet<Address>>,
    attempts: Mutex<Vec<Address>>,
    write_delay: Mutex<Option<Duration>>,
    balance: Mutex<RelayerResult<U256>>,
    flag_reads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockFlagStore {
    fn default() -> Self {
        Self {
            flags: Mutex::new(HashMap::new()),
            failing_writes: Mutex::new(HashSet::new()),
            failing_reads: Mutex::new(HashSet::new()),
            attempts: Mutex::new(Vec::new()),
            write_delay: Mutex::new(None),
            balance: Mutex::new(Ok(U256::exp10(17))),
            flag_reads: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl MockFlagStore {
    pub fn fail_writes_for(&self, address: Address) {
        self.failing_writes.lock().unwrap().insert(address);
    }

    pub fn fail_reads_for(&self, address: Address) {
        self.failing_reads.lock().unwrap().insert(address);
    }

    pub fn clear_failures(&self) {
        self.failing_writes.lock().unwrap().clear();
        self.failing_reads.lock().unwrap().clear();
    }

    pub fn set_flag(&self, address: Address, value: bool) {
        self.flags.lock().unwrap().insert(address, value);
    }

    pub fn flag(&self, address: &Address) -> bool {
        self.flags
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or(false)
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_balance(&self, balance: RelayerResult<U256>) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn write_attempts(&self) -> Vec<Address> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn flag_reads(&self) -> usize {
        self.flag_reads.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl ChainContract for MockFlagStore {
    fn chain_name(&self) -> &str {
        "target"
    }

    fn chain_id(&self) -> u64 {
        11155111
    }

    fn contract_address(&self) -> Address {
        Address::from_low_u64_be(MOCK_FLAG_STORE_ADDRESS)
    }
}

#[async_trait]
impl VerificationFlagStore for MockFlagStore {
    fn relayer_address(&self) -> Address {
        Address::from_low_u64_be(MOCK_RELAYER_ADDRESS)
    }

    async fn relayer_balance(&self) -> RelayerResult<U256> {
        self.balance.lock().unwrap().clone()
    }

    async fn read_verification_flag(&self, address: Address) -> RelayerResult<bool> {
        self.flag_reads.fetch_add(1, Ordering::SeqCst);
        if self.failing_reads.lock().unwrap().contains(&address) {
            return Err(RelayerError::Network("target read failed".into()));
        }
        Ok(self.flag(&address))
    }

    async fn write_verification_flag(
        &self,
        address: Address,
        value: bool,
    ) -> RelayerResult<TxReceiptSummary> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        self.attempts.lock().unwrap().push(address);

        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_writes.lock().unwrap().contains(&address) {
            return Err(RelayerError::Transaction("execution reverted".into()));
        }
        self.set_flag(address, value);
        let attempt = self.attempts.lock().unwrap().len() as u64;
        Ok(TxReceiptSummary {
            address,
            tx_hash: H256::from_low_u64_be(attempt),
            block_number: Some(attempt),
            gas_used: Some(U256::from(46_000u64)),
        })
    }
}

pub struct MockHealthCheck {
    result: Mutex<RelayerResult<()>>,
    calls: AtomicUsize,
}

impl MockHealthCheck {
    pub fn healthy() -> Self {
        Self::with_result(Ok(()))
    }

    pub fn failing(err: RelayerError) -> Self {
        Self::with_result(Err(err))
    }

    fn with_result(result: RelayerResult<()>) -> Self {
        Self {
            result: Mutex::new(result),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthCheck for MockHealthCheck {
    async fn check(&self) -> RelayerResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.lock().unwrap().clone()
    }
}
