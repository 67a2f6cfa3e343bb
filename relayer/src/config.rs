// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::contracts::GasPolicy;
use crate::error::{RelayerError, RelayerResult};
use crate::metered_eth_provider::RpcThrottle;
use crate::sync_engine::ReconciliationPolicy;
use crate::types::normalize_address;
use clap::Parser;
use ethers::signers::LocalWallet;
use ethers::types::Address;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use url::Url;

pub const DEFAULT_SOURCE_CHAIN_ID: u64 = 42220;
pub const DEFAULT_TARGET_CHAIN_ID: u64 = 11155111;
pub const DEFAULT_EVENT_SIGNATURE: &str = "VerificationCompleted(address,uint256)";

/// YAML or JSON backed configuration file.
pub trait Config: Serialize + DeserializeOwned {
    fn load<P: AsRef<Path>>(path: P) -> RelayerResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| RelayerError::Config(format!("cannot read {}: {e}", path.display())))?;
        let is_yaml = matches!(
            path.extension().and_then(|s| s.to_str()),
            Some("yaml") | Some("yml")
        );
        let parsed = if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        };
        parsed.map_err(|e| RelayerError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> RelayerResult<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RelayerError::Internal(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(|e| RelayerError::Config(format!("cannot write {}: {e}", path.display())))
    }
}

/// Hex encoded secp256k1 key. Never serialized and redacted in debug output.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct RelayerKey(String);

impl RelayerKey {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }
}

impl std::fmt::Debug for RelayerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RelayerKey(<redacted>)")
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct SourceChainConfig {
    // Rpc url of the chain hosting the proof-of-personhood registry
    pub rpc_url: Option<String>,
    #[serde(default = "default_source_chain_id")]
    pub chain_id: u64,
    pub contract_address: Option<String>,
    #[serde(default = "default_event_signature")]
    pub verification_event_signature: String,
    #[serde(default = "default_discovery_window")]
    pub discovery_window_blocks: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct TargetChainConfig {
    // Rpc url of the chain hosting the verification flag store
    pub rpc_url: Option<String>,
    #[serde(default = "default_target_chain_id")]
    pub chain_id: u64,
    pub contract_address: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default)]
pub struct GasConfig {
    pub gas_limit_headroom_percent: u64,
    pub fee_bump_percent: u64,
    pub tx_confirmation_timeout_secs: u64,
    pub tx_confirmations: usize,
}

impl Default for GasConfig {
    fn default() -> Self {
        let policy = GasPolicy::default();
        Self {
            gas_limit_headroom_percent: policy.gas_limit_headroom_percent,
            fee_bump_percent: policy.fee_bump_percent,
            tx_confirmation_timeout_secs: policy.confirmation_timeout.as_secs(),
            tx_confirmations: policy.confirmations,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default)]
pub struct RpcConfig {
    pub max_concurrent_requests: usize,
    pub min_request_interval_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        let throttle = RpcThrottle::default();
        Self {
            max_concurrent_requests: throttle.max_concurrent_requests,
            min_request_interval_ms: throttle.min_request_interval.as_millis() as u64,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct RelayerNodeConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub source: SourceChainConfig,
    pub target: TargetChainConfig,
    #[serde(default, skip_serializing)]
    pub relayer_private_key: Option<RelayerKey>,
    #[serde(default = "default_interval_ms")]
    pub relayer_interval_ms: u64,
    #[serde(default)]
    pub reconciliation_policy: ReconciliationPolicy,
    #[serde(default)]
    pub gas: GasConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
}

impl Config for RelayerNodeConfig {}

fn default_source_chain_id() -> u64 {
    DEFAULT_SOURCE_CHAIN_ID
}

fn default_target_chain_id() -> u64 {
    DEFAULT_TARGET_CHAIN_ID
}

fn default_event_signature() -> String {
    DEFAULT_EVENT_SIGNATURE.to_string()
}

fn default_discovery_window() -> u64 {
    2000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8001
}

fn default_interval_ms() -> u64 {
    10_000
}

/// Everything needed to build the relayer, checked and parsed.
#[derive(Debug, Clone)]
pub struct RelayerServerConfig {
    pub listen_address: SocketAddr,
    pub source_rpc_url: String,
    pub source_chain_id: u64,
    pub source_contract_address: Address,
    pub verification_event_signature: String,
    pub discovery_window_blocks: u64,
    pub target_rpc_url: String,
    pub target_chain_id: u64,
    pub target_contract_address: Address,
    pub wallet: LocalWallet,
    pub interval: Duration,
    pub policy: ReconciliationPolicy,
    pub gas_policy: GasPolicy,
    pub throttle: RpcThrottle,
}

impl RelayerNodeConfig {
    pub fn validate(&self) -> RelayerResult<RelayerServerConfig> {
        info!("Starting config validation");
        let host = IpAddr::from_str(self.host.trim())
            .map_err(|_| RelayerError::Config(format!("invalid listen host: {}", self.host)))?;
        let source_rpc_url = required_url("source rpc url", &self.source.rpc_url)?;
        let target_rpc_url = required_url("target rpc url", &self.target.rpc_url)?;
        let source_contract_address =
            required_contract("source contract address", &self.source.contract_address)?;
        let target_contract_address =
            required_contract("target contract address", &self.target.contract_address)?;

        let key = self
            .relayer_private_key
            .as_ref()
            .ok_or_else(|| RelayerError::Config("relayer private key is not set".into()))?;
        // the key itself must never end up in an error message
        let wallet = LocalWallet::from_str(key.0.trim())
            .map_err(|_| RelayerError::Config("relayer private key is malformed".into()))?;

        let signature = self.source.verification_event_signature.trim();
        if !(signature.contains('(') && signature.ends_with(')')) {
            return Err(RelayerError::Config(format!(
                "invalid verification event signature: {signature}"
            )));
        }
        if self.relayer_interval_ms == 0 {
            return Err(RelayerError::Config("relayer interval must be positive".into()));
        }
        if self.source.discovery_window_blocks == 0 {
            return Err(RelayerError::Config(
                "discovery window must be at least one block".into(),
            ));
        }
        if self.gas.tx_confirmation_timeout_secs == 0 {
            return Err(RelayerError::Config(
                "transaction confirmation timeout must be positive".into(),
            ));
        }

        info!("Config validation complete");
        Ok(RelayerServerConfig {
            listen_address: SocketAddr::new(host, self.port),
            source_rpc_url,
            source_chain_id: self.source.chain_id,
            source_contract_address,
            verification_event_signature: signature.to_string(),
            discovery_window_blocks: self.source.discovery_window_blocks,
            target_rpc_url,
            target_chain_id: self.target.chain_id,
            target_contract_address,
            wallet,
            interval: Duration::from_millis(self.relayer_interval_ms),
            policy: self.reconciliation_policy,
            gas_policy: GasPolicy {
                gas_limit_headroom_percent: self.gas.gas_limit_headroom_percent,
                fee_bump_percent: self.gas.fee_bump_percent,
                confirmation_timeout: Duration::from_secs(self.gas.tx_confirmation_timeout_secs),
                confirmations: self.gas.tx_confirmations,
            },
            throttle: RpcThrottle {
                max_concurrent_requests: self.rpc.max_concurrent_requests.max(1),
                min_request_interval: Duration::from_millis(self.rpc.min_request_interval_ms),
            },
        })
    }
}

fn required_url(what: &str, value: &Option<String>) -> RelayerResult<String> {
    let value = value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RelayerError::Config(format!("{what} is not set")))?;
    Url::parse(value).map_err(|e| RelayerError::Config(format!("invalid {what} {value}: {e}")))?;
    Ok(value.to_string())
}

fn required_contract(what: &str, value: &Option<String>) -> RelayerResult<Address> {
    let value = value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| RelayerError::Config(format!("{what} is not set")))?;
    let address = normalize_address(value)
        .map_err(|_| RelayerError::Config(format!("invalid {what}: {value}")))?;
    if address.is_zero() {
        return Err(RelayerError::Config(format!(
            "{what} is zero; deploy the contract and update the config"
        )));
    }
    Ok(address)
}

#[derive(Parser, Debug)]
#[clap(rename_all = "kebab-case", author, version)]
pub struct RelayerArgs {
    /// YAML or JSON config file; when set, the chain options below are ignored
    #[clap(env, long)]
    pub config_path: Option<PathBuf>,
    /// Also read from CELO_RPC
    #[clap(env, long)]
    pub source_rpc_url: Option<String>,
    #[clap(env, long, default_value_t = DEFAULT_SOURCE_CHAIN_ID)]
    pub source_chain_id: u64,
    /// Also read from PROOF_OF_HUMAN_CONTRACT
    #[clap(env, long)]
    pub source_contract_address: Option<String>,
    /// Also read from SEPOLIA_RPC
    #[clap(env, long)]
    pub target_rpc_url: Option<String>,
    #[clap(env, long, default_value_t = DEFAULT_TARGET_CHAIN_ID)]
    pub target_chain_id: u64,
    /// Also read from CENTRAL_WALLET_CONTRACT
    #[clap(env, long)]
    pub target_contract_address: Option<String>,
    #[clap(env, long, hide_env_values = true)]
    pub relayer_private_key: Option<String>,
    #[clap(env, long, default_value_t = 10_000)]
    pub relayer_interval_ms: u64,
    #[clap(env, long, default_value_t = 2000)]
    pub discovery_window_blocks: u64,
    #[clap(env, long, default_value = DEFAULT_EVENT_SIGNATURE)]
    pub verification_event_signature: String,
    #[clap(env, long, value_enum, default_value_t = ReconciliationPolicy::MarkAllDiscovered)]
    pub reconciliation_policy: ReconciliationPolicy,
    #[clap(env, long, default_value_t = 20)]
    pub gas_limit_headroom_percent: u64,
    #[clap(env, long, default_value_t = 10)]
    pub fee_bump_percent: u64,
    #[clap(env, long, default_value_t = 120)]
    pub tx_confirmation_timeout_secs: u64,
    #[clap(env, long, default_value_t = 1)]
    pub tx_confirmations: usize,
    #[clap(env, long, default_value_t = 4)]
    pub rpc_max_concurrent_requests: usize,
    #[clap(env, long, default_value_t = 100)]
    pub rpc_min_request_interval_ms: u64,
    #[clap(env, long, default_value = "0.0.0.0")]
    pub host: String,
    #[clap(env, long, default_value_t = 8001)]
    pub port: u16,
}

impl RelayerArgs {
    /// Fill chain options left unset from their alternative environment names.
    /// Flags and the primary variables take precedence; blank values are ignored.
    pub fn apply_env_aliases<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if self.source_rpc_url.is_none() {
            self.source_rpc_url = lookup("CELO_RPC");
        }
        if self.source_contract_address.is_none() {
            self.source_contract_address = lookup("PROOF_OF_HUMAN_CONTRACT");
        }
        if self.target_rpc_url.is_none() {
            self.target_rpc_url = lookup("SEPOLIA_RPC");
        }
        if self.target_contract_address.is_none() {
            self.target_contract_address = lookup("CENTRAL_WALLET_CONTRACT");
        }
    }

    /// Resolve the node config from the config file if one is given, otherwise
    /// from flags and environment. The private key from the environment fills
    /// in a file that does not carry one.
    pub fn into_config(mut self) -> RelayerResult<RelayerNodeConfig> {
        let env_key = self.relayer_private_key.clone().map(RelayerKey::new);
        if let Some(path) = &self.config_path {
            let mut config = RelayerNodeConfig::load(path)?;
            if config.relayer_private_key.is_none() {
                config.relayer_private_key = env_key;
            }
            info!("Loaded relayer config from {}", path.display());
            return Ok(config);
        }
        self.apply_env_aliases(|name| std::env::var(name).ok());
        Ok(RelayerNodeConfig {
            host: self.host,
            port: self.port,
            source: SourceChainConfig {
                rpc_url: self.source_rpc_url,
                chain_id: self.source_chain_id,
                contract_address: self.source_contract_address,
                verification_event_signature: self.verification_event_signature,
                discovery_window_blocks: self.discovery_window_blocks,
            },
            target: TargetChainConfig {
                rpc_url: self.target_rpc_url,
                chain_id: self.target_chain_id,
                contract_address: self.target_contract_address,
            },
            relayer_private_key: env_key,
            relayer_interval_ms: self.relayer_interval_ms,
            reconciliation_policy: self.reconciliation_policy,
            gas: GasConfig {
                gas_limit_headroom_percent: self.gas_limit_headroom_percent,
                fee_bump_percent: self.fee_bump_percent,
                tx_confirmation_timeout_secs: self.tx_confirmation_timeout_secs,
                tx_confirmations: self.tx_confirmations,
            },
            rpc: RpcConfig {
                max_concurrent_requests: self.rpc_max_concurrent_requests,
                min_request_interval_ms: self.rpc_min_request_interval_ms,
            },
        })
    }
}
