// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{RelayerError, RelayerResult};
use crate::metered_eth_provider::{new_metered_eth_provider, MeteredEthHttpProvider, RpcThrottle};
use crate::metrics::RelayerMetrics;
use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{JsonRpcClient, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use std::sync::Arc;
use tap::TapFallible;

pub type SigningClient<P> = SignerMiddleware<Provider<P>, LocalWallet>;

/// Connection handle to one EVM chain, bound to the chain id it is expected
/// to serve. Only the target chain client carries a signing identity.
pub struct ChainClient<P> {
    name: String,
    provider: Provider<P>,
    expected_chain_id: u64,
    wallet: Option<LocalWallet>,
}

impl ChainClient<MeteredEthHttpProvider> {
    /// Build a client over the metered HTTP transport without touching the network.
    pub fn new_metered(
        name: &str,
        rpc_url: &str,
        expected_chain_id: u64,
        wallet: Option<LocalWallet>,
        metrics: Arc<RelayerMetrics>,
        throttle: RpcThrottle,
    ) -> RelayerResult<Self> {
        let provider = new_metered_eth_provider(rpc_url, name, metrics, throttle)
            .map_err(|e| RelayerError::Config(format!("invalid {name} rpc url: {e}")))?;
        Ok(Self::new(name, provider, expected_chain_id, wallet))
    }

    /// Build a metered client and verify the endpoint before handing it out.
    pub async fn connect(
        name: &str,
        rpc_url: &str,
        expected_chain_id: u64,
        wallet: Option<LocalWallet>,
        metrics: Arc<RelayerMetrics>,
        throttle: RpcThrottle,
    ) -> RelayerResult<Self> {
        let client =
            Self::new_metered(name, rpc_url, expected_chain_id, wallet, metrics, throttle)?;
        client.verify_connection().await?;
        Ok(client)
    }
}

impl<P> ChainClient<P>
where
    P: JsonRpcClient + Clone + 'static,
{
    pub fn new(
        name: &str,
        provider: Provider<P>,
        expected_chain_id: u64,
        wallet: Option<LocalWallet>,
    ) -> Self {
        Self {
            name: name.to_string(),
            provider,
            expected_chain_id,
            wallet: wallet.map(|w| w.with_chain_id(expected_chain_id)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expected_chain_id(&self) -> u64 {
        self.expected_chain_id
    }

    pub fn provider(&self) -> &Provider<P> {
        &self.provider
    }

    pub async fn chain_id(&self) -> RelayerResult<u64> {
        let chain_id = self.provider.get_chainid().await?;
        if chain_id > U256::from(u64::MAX) {
            return Err(RelayerError::Network(format!(
                "{} endpoint reports out of range chain id {chain_id}",
                self.name
            )));
        }
        Ok(chain_id.as_u64())
    }

    /// Check that the endpoint answers and serves the expected chain.
    /// Returns the current block height.
    pub async fn verify_connection(&self) -> RelayerResult<u64> {
        let chain_id = self
            .chain_id()
            .await
            .tap_err(|e| tracing::warn!(chain = %self.name, "Chain id query failed: {e}"))?;
        if chain_id != self.expected_chain_id {
            return Err(RelayerError::Network(format!(
                "{} endpoint reports chain id {}, expected {}",
                self.name, chain_id, self.expected_chain_id
            )));
        }
        let height = self.current_block_height().await?;
        tracing::info!(
            chain = %self.name,
            chain_id,
            "Connected to chain {} (verified), current block: {}",
            chain_id,
            height
        );
        Ok(height)
    }

    pub async fn current_block_height(&self) -> RelayerResult<u64> {
        let height = self.provider.get_block_number().await?;
        Ok(height.as_u64())
    }

    pub fn signer_address(&self) -> RelayerResult<Address> {
        self.wallet
            .as_ref()
            .map(|w| w.address())
            .ok_or_else(|| {
                RelayerError::Config(format!("no signing key configured for {}", self.name))
            })
    }

    /// Balance in wei.
    pub async fn native_balance(&self, address: Address) -> RelayerResult<U256> {
        Ok(self.provider.get_balance(address, None).await?)
    }

    /// Balance rendered in whole ether units.
    pub async fn native_balance_ether(&self, address: Address) -> RelayerResult<String> {
        let balance = self.native_balance(address).await?;
        Ok(ethers::utils::format_ether(balance))
    }

    pub fn signing_client(&self) -> RelayerResult<Arc<SigningClient<P>>> {
        let wallet = self.wallet.clone().ok_or_else(|| {
            RelayerError::Config(format!("no signing key configured for {}", self.name))
        })?;
        Ok(Arc::new(SignerMiddleware::new(
            self.provider.clone(),
            wallet,
        )))
    }
}

/// Startup gate for the supervisor: dependencies must be usable before it
/// may enter the running state.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> RelayerResult<()>;
}

pub struct DualChainHealthCheck<S, T> {
    source: Arc<ChainClient<S>>,
    target: Arc<ChainClient<T>>,
}

impl<S, T> DualChainHealthCheck<S, T> {
    pub fn new(source: Arc<ChainClient<S>>, target: Arc<ChainClient<T>>) -> Self {
        Self { source, target }
    }
}

#[async_trait]
impl<S, T> HealthCheck for DualChainHealthCheck<S, T>
where
    S: JsonRpcClient + Clone + 'static,
    T: JsonRpcClient + Clone + 'static,
{
    async fn check(&self) -> RelayerResult<()> {
        let relayer = self.target.signer_address()?;
        let source_height = self.source.verify_connection().await?;
        let target_height = self.target.verify_connection().await?;
        tracing::info!(
            relayer = ?relayer,
            source_height,
            target_height,
            "Health check passed"
        );
        Ok(())
    }
}
