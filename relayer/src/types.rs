// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{RelayerError, RelayerResult};
use ethers::types::{Address, H256, U256};
use ethers::utils::to_checksum;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Parse a textual account address into its canonical 20 byte form.
///
/// Any casing (checksummed, lower, upper) with or without the `0x` prefix maps
/// to the same value, so the result is safe to use as a map or dedup key.
pub fn normalize_address(raw: &str) -> RelayerResult<Address> {
    let trimmed = raw.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(RelayerError::InvalidAddress(raw.to_string()));
    }
    Address::from_str(hex).map_err(|_| RelayerError::InvalidAddress(raw.to_string()))
}

/// EIP-55 checksummed rendering used in logs and API responses.
pub fn display_address(address: &Address) -> String {
    to_checksum(address, None)
}

/// Proof of personhood anchored on the source chain for one address.
///
/// Disclosed attributes are carried through as-is; only the presence of the
/// record is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRecord {
    pub user_address: Address,
    pub timestamp: U256,
    pub gender: String,
    pub nationality: String,
    pub minimum_age: U256,
}

impl VerificationRecord {
    /// A record exists iff its embedded address is non-zero.
    pub fn is_present(&self) -> bool {
        !self.user_address.is_zero()
    }
}

/// A single flag write requested from the target chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagUpdate {
    pub address: Address,
    pub is_verified: bool,
}

impl FlagUpdate {
    pub fn verified(address: Address) -> Self {
        Self {
            address,
            is_verified: true,
        }
    }
}

/// What is kept from a mined flag write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceiptSummary {
    pub address: Address,
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    pub gas_used: Option<U256>,
}

/// Outcome of one flag write inside a batch, attributable to its address.
#[derive(Debug, Clone)]
pub struct FlagWriteOutcome {
    pub address: Address,
    pub result: RelayerResult<TxReceiptSummary>,
}

/// Result of a single sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub synced: u64,
    pub skipped: u64,
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOWER: &str = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";
    const CHECKSUM: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    #[test]
    fn test_normalize_address_is_case_insensitive() {
        let a = normalize_address(LOWER).unwrap();
        let b = normalize_address(CHECKSUM).unwrap();
        let c = normalize_address(&LOWER.to_uppercase().replacen("0X", "0x", 1)).unwrap();
        let d = normalize_address(LOWER.trim_start_matches("0x")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a, d);
        assert_eq!(display_address(&a), CHECKSUM);
    }

    #[test]
    fn test_normalize_address_rejects_garbage() {
        for raw in ["", "0x", "0x1234", "not an address", &format!("{LOWER}00")] {
            assert_eq!(
                normalize_address(raw),
                Err(RelayerError::InvalidAddress(raw.to_string()))
            );
        }
    }

    #[test]
    fn test_record_presence() {
        let mut record = VerificationRecord {
            user_address: Address::zero(),
            timestamp: U256::from(1_700_000_000u64),
            gender: "M".into(),
            nationality: "FRA".into(),
            minimum_age: U256::from(18),
        };
        assert!(!record.is_present());
        record.user_address = Address::from_low_u64_be(7);
        assert!(record.is_present());
    }
}
