// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Typed access to the two contracts the relayer works against: the
//! proof-of-personhood registry on the source chain (read only) and the
//! verification flag store on the target chain (written by the relayer key).

use crate::abi::{CentralWallet, ProofOfHuman};
use crate::chain_client::{ChainClient, SigningClient};
use crate::error::{RelayerError, RelayerResult};
use crate::metrics::RelayerMetrics;
use crate::types::{display_address, FlagUpdate, FlagWriteOutcome, TxReceiptSummary, VerificationRecord};
use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, Middleware, Provider};
use ethers::types::{Address, Filter, Log, H256, U256, U64};
use ethers::utils::keccak256;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tap::TapFallible;

const PENDING_TX_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Identity of a contract deployment on a given chain.
pub trait ChainContract: Send + Sync {
    fn chain_name(&self) -> &str;
    fn chain_id(&self) -> u64;
    fn contract_address(&self) -> Address;
}

#[async_trait]
pub trait VerificationRegistry: ChainContract {
    /// Look up the record for `address`. `Ok(None)` means no record exists.
    /// Any RPC failure is returned as an error and must never be read as
    /// "verified" by the caller.
    async fn read_verification_record(
        &self,
        address: Address,
    ) -> RelayerResult<Option<VerificationRecord>>;

    /// Scan the trailing `window_blocks` blocks for completed verifications.
    /// Addresses are deduplicated and returned in first-seen order.
    async fn discover_recently_verified(&self, window_blocks: u64) -> RelayerResult<Vec<Address>>;
}

#[async_trait]
pub trait VerificationFlagStore: ChainContract {
    fn relayer_address(&self) -> Address;

    /// Native balance of the relayer identity, in wei.
    async fn relayer_balance(&self) -> RelayerResult<U256>;

    async fn read_verification_flag(&self, address: Address) -> RelayerResult<bool>;

    /// Submit one signed flag update and wait for it to be mined.
    async fn write_verification_flag(
        &self,
        address: Address,
        value: bool,
    ) -> RelayerResult<TxReceiptSummary>;

    /// One transaction per entry, strictly in order. A failing entry is
    /// reported in its outcome and does not stop the remaining ones.
    async fn write_verification_flags_batch(&self, entries: &[FlagUpdate]) -> Vec<FlagWriteOutcome> {
        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            let result = self
                .write_verification_flag(entry.address, entry.is_verified)
                .await
                .tap_err(|e| {
                    tracing::warn!(
                        address = %display_address(&entry.address),
                        error_type = e.error_type(),
                        "Flag write failed: {e}"
                    )
                });
            outcomes.push(FlagWriteOutcome {
                address: entry.address,
                result,
            });
        }
        outcomes
    }
}

/// Gas and confirmation settings applied to every flag write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPolicy {
    pub gas_limit_headroom_percent: u64,
    pub fee_bump_percent: u64,
    pub confirmation_timeout: Duration,
    pub confirmations: usize,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            gas_limit_headroom_percent: 20,
            fee_bump_percent: 10,
            confirmation_timeout: Duration::from_secs(120),
            confirmations: 1,
        }
    }
}

impl GasPolicy {
    pub fn gas_limit(&self, estimate: U256) -> U256 {
        add_percent(estimate, self.gas_limit_headroom_percent)
    }

    pub fn bump_fee(&self, fee: U256) -> U256 {
        add_percent(fee, self.fee_bump_percent)
    }
}

fn add_percent(value: U256, percent: u64) -> U256 {
    value.saturating_mul(U256::from(100 + percent)) / U256::from(100)
}

pub struct EthVerificationRegistry<P> {
    client: Arc<ChainClient<P>>,
    contract: ProofOfHuman<Provider<P>>,
    address: Address,
    event_topic: H256,
}

impl<P> EthVerificationRegistry<P>
where
    P: JsonRpcClient + Clone + 'static,
{
    /// `event_signature` is the canonical signature of the completion event,
    /// e.g. `VerificationCompleted(address,uint256)`.
    pub fn new(client: Arc<ChainClient<P>>, address: Address, event_signature: &str) -> Self {
        let contract = ProofOfHuman::new(address, Arc::new(client.provider().clone()));
        Self {
            client,
            contract,
            address,
            event_topic: H256::from(keccak256(event_signature.as_bytes())),
        }
    }
}

impl<P> ChainContract for EthVerificationRegistry<P>
where
    P: JsonRpcClient + Clone + 'static,
{
    fn chain_name(&self) -> &str {
        self.client.name()
    }

    fn chain_id(&self) -> u64 {
        self.client.expected_chain_id()
    }

    fn contract_address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl<P> VerificationRegistry for EthVerificationRegistry<P>
where
    P: JsonRpcClient + Clone + 'static,
{
    async fn read_verification_record(
        &self,
        address: Address,
    ) -> RelayerResult<Option<VerificationRecord>> {
        let (user_address, timestamp, gender, nationality, minimum_age) = self
            .contract
            .verified_humans(address)
            .call()
            .await
            .map_err(|e| RelayerError::Network(format!("verifiedHumans read failed: {e}")))?;
        let record = VerificationRecord {
            user_address,
            timestamp,
            gender,
            nationality,
            minimum_age,
        };
        Ok(record.is_present().then_some(record))
    }

    async fn discover_recently_verified(&self, window_blocks: u64) -> RelayerResult<Vec<Address>> {
        let latest = self.client.current_block_height().await?;
        let from_block = latest.saturating_sub(window_blocks);
        let filter = Filter::new()
            .address(self.address)
            .topic0(self.event_topic)
            .from_block(from_block)
            .to_block(latest);
        let logs = self.client.provider().get_logs(&filter).await?;
        tracing::debug!(
            from_block,
            to_block = latest,
            logs = logs.len(),
            "Fetched verification events"
        );

        let mut seen = HashSet::new();
        let mut discovered = Vec::new();
        for log in &logs {
            match verified_address_from_log(log) {
                Some(address) => {
                    if seen.insert(address) {
                        discovered.push(address);
                    }
                }
                None => tracing::warn!(
                    tx_hash = ?log.transaction_hash,
                    "Verification event without a user address, ignored"
                ),
            }
        }
        Ok(discovered)
    }
}

// The user address is the first event argument: a topic when indexed,
// otherwise the first data word.
fn verified_address_from_log(log: &Log) -> Option<Address> {
    if let Some(topic) = log.topics.get(1) {
        return Some(Address::from(*topic));
    }
    log.data.get(12..32).map(Address::from_slice)
}

pub struct EthVerificationFlagStore<P> {
    client: Arc<ChainClient<P>>,
    reader: CentralWallet<Provider<P>>,
    writer: CentralWallet<SigningClient<P>>,
    address: Address,
    relayer: Address,
    gas_policy: GasPolicy,
    poll_interval: Duration,
    metrics: Arc<RelayerMetrics>,
}

impl<P> EthVerificationFlagStore<P>
where
    P: JsonRpcClient + Clone + 'static,
{
    /// Fails with a configuration error when the client holds no signing key.
    pub fn new(
        client: Arc<ChainClient<P>>,
        address: Address,
        gas_policy: GasPolicy,
        metrics: Arc<RelayerMetrics>,
    ) -> RelayerResult<Self> {
        let relayer = client.signer_address()?;
        let writer = CentralWallet::new(address, client.signing_client()?);
        let reader = CentralWallet::new(address, Arc::new(client.provider().clone()));
        Ok(Self {
            client,
            reader,
            writer,
            address,
            relayer,
            gas_policy,
            poll_interval: PENDING_TX_POLL_INTERVAL,
            metrics,
        })
    }

    /// How often a sent transaction is polled for inclusion.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Current EIP-1559 fee suggestion with the policy's bump applied, as
    /// `(max_fee_per_gas, max_priority_fee_per_gas)`.
    async fn suggested_fees(&self) -> RelayerResult<(U256, U256)> {
        let (max_fee, max_priority_fee) = self
            .client
            .provider()
            .estimate_eip1559_fees(None)
            .await
            .map_err(|e| RelayerError::Gas(format!("fee estimation failed: {e}")))?;
        Ok((
            self.gas_policy.bump_fee(max_fee),
            self.gas_policy.bump_fee(max_priority_fee),
        ))
    }

    async fn submit_flag(&self, address: Address, value: bool) -> RelayerResult<TxReceiptSummary> {
        let mut call = self.writer.set_verified_human(address, value);

        let estimate = call.estimate_gas().await?;
        let gas_limit = self.gas_policy.gas_limit(estimate);
        let (max_fee, max_priority_fee) = self.suggested_fees().await?;
        match call.tx.as_eip1559_mut() {
            Some(tx) => {
                tx.gas = Some(gas_limit);
                tx.max_fee_per_gas = Some(max_fee);
                tx.max_priority_fee_per_gas = Some(max_priority_fee);
            }
            None => {
                call.tx.set_gas(gas_limit);
                call.tx.set_gas_price(max_fee);
            }
        }

        let pending = call.send().await?;
        let tx_hash = pending.tx_hash();
        self.metrics.tx_submitted.inc();
        tracing::info!(
            address = %display_address(&address),
            ?tx_hash,
            %gas_limit,
            %max_fee,
            "Flag transaction sent"
        );

        let started = Instant::now();
        let receipt = tokio::time::timeout(
            self.gas_policy.confirmation_timeout,
            pending
                .interval(self.poll_interval)
                .confirmations(self.gas_policy.confirmations),
        )
        .await
        .map_err(|_| {
            RelayerError::Network(format!(
                "transaction {tx_hash:?} not mined within {:?}",
                self.gas_policy.confirmation_timeout
            ))
        })??
        .ok_or_else(|| RelayerError::Network(format!("transaction {tx_hash:?} dropped from mempool")))?;

        let reverted = receipt.status == Some(U64::zero());
        self.metrics
            .tx_latency
            .with_label_values(&[if reverted { "reverted" } else { "ok" }])
            .observe(started.elapsed().as_secs_f64());
        if reverted {
            return Err(RelayerError::Transaction(format!(
                "transaction {tx_hash:?} reverted in block {:?}",
                receipt.block_number
            )));
        }
        self.metrics.tx_confirmed.inc();
        Ok(TxReceiptSummary {
            address,
            tx_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()),
            gas_used: receipt.gas_used,
        })
    }
}

impl<P> ChainContract for EthVerificationFlagStore<P>
where
    P: JsonRpcClient + Clone + 'static,
{
    fn chain_name(&self) -> &str {
        self.client.name()
    }

    fn chain_id(&self) -> u64 {
        self.client.expected_chain_id()
    }

    fn contract_address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl<P> VerificationFlagStore for EthVerificationFlagStore<P>
where
    P: JsonRpcClient + Clone + 'static,
{
    fn relayer_address(&self) -> Address {
        self.relayer
    }

    async fn relayer_balance(&self) -> RelayerResult<U256> {
        self.client.native_balance(self.relayer).await
    }

    async fn read_verification_flag(&self, address: Address) -> RelayerResult<bool> {
        self.reader
            .is_human_verified(address)
            .call()
            .await
            .map_err(|e| RelayerError::Network(format!("isHumanVerified read failed: {e}")))
    }

    async fn write_verification_flag(
        &self,
        address: Address,
        value: bool,
    ) -> RelayerResult<TxReceiptSummary> {
        let result = self.submit_flag(address, value).await;
        match &result {
            Ok(receipt) => tracing::info!(
                address = %display_address(&address),
                tx_hash = ?receipt.tx_hash,
                block = ?receipt.block_number,
                "Verification flag updated"
            ),
            Err(e) => self
                .metrics
                .tx_failed
                .with_label_values(&[e.error_type()])
                .inc(),
        }
        result
    }
}
