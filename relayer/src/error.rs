// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::contract::ContractError;
use ethers::providers::{Middleware, ProviderError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayerError {
    // Missing or malformed configuration, fatal at startup
    #[error("configuration error: {0}")]
    Config(String),
    // RPC endpoint unreachable, timed out or misconfigured
    #[error("network error: {0}")]
    Network(String),
    // Transaction was mined but reverted, or the call reverted during simulation
    #[error("transaction error: {0}")]
    Transaction(String),
    // Fee estimation or gas limit problem
    #[error("gas error: {0}")]
    Gas(String),
    // Operation requires a running supervisor
    #[error("relayer service is not running")]
    NotRunning,
    // Input could not be parsed as a 20 byte account address
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    // Malformed control-plane request
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    // Uncategorized error
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            RelayerError::Config(_) => "config",
            RelayerError::Network(_) => "network",
            RelayerError::Transaction(_) => "transaction",
            RelayerError::Gas(_) => "gas",
            RelayerError::NotRunning => "not_running",
            RelayerError::InvalidAddress(_) => "invalid_address",
            RelayerError::InvalidRequest(_) => "invalid_request",
            RelayerError::Internal(_) => "internal",
        }
    }

    /// Classify a failure reported by a node while estimating or submitting a transaction.
    pub(crate) fn from_submission_message(message: String) -> Self {
        if looks_like_gas_error(&message) {
            RelayerError::Gas(message)
        } else if looks_like_revert(&message) {
            RelayerError::Transaction(message)
        } else {
            RelayerError::Network(message)
        }
    }
}

pub type RelayerResult<T> = Result<T, RelayerError>;

fn looks_like_gas_error(message: &str) -> bool {
    let message = message.to_lowercase();
    [
        "gas required exceeds",
        "intrinsic gas",
        "out of gas",
        "gas too low",
        "max fee per gas",
        "fee cap",
        "underpriced",
        "insufficient funds",
        "base fee",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

fn looks_like_revert(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("revert") || message.contains("execution reverted")
}

impl From<ProviderError> for RelayerError {
    fn from(err: ProviderError) -> Self {
        RelayerError::Network(err.to_string())
    }
}

impl<M: Middleware> From<ContractError<M>> for RelayerError {
    fn from(err: ContractError<M>) -> Self {
        match err {
            ContractError::Revert(data) => RelayerError::Transaction(format!("reverted: {data}")),
            ContractError::ProviderError { e } => RelayerError::Network(e.to_string()),
            ContractError::MiddlewareError { e } => {
                RelayerError::from_submission_message(e.to_string())
            }
            other => RelayerError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_labels() {
        let cases = vec![
            (RelayerError::Config("x".into()), "config"),
            (RelayerError::Network("x".into()), "network"),
            (RelayerError::Transaction("x".into()), "transaction"),
            (RelayerError::Gas("x".into()), "gas"),
            (RelayerError::NotRunning, "not_running"),
            (RelayerError::InvalidAddress("x".into()), "invalid_address"),
            (RelayerError::InvalidRequest("x".into()), "invalid_request"),
            (RelayerError::Internal("x".into()), "internal"),
        ];
        for (err, expected) in cases {
            assert_eq!(err.error_type(), expected);
        }
    }

    #[test]
    fn test_submission_message_classification() {
        assert!(matches!(
            RelayerError::from_submission_message(
                "(code: -32000, message: insufficient funds for gas * price + value)".into()
            ),
            RelayerError::Gas(_)
        ));
        assert!(matches!(
            RelayerError::from_submission_message("replacement transaction underpriced".into()),
            RelayerError::Gas(_)
        ));
        assert!(matches!(
            RelayerError::from_submission_message("execution reverted: not owner".into()),
            RelayerError::Transaction(_)
        ));
        assert!(matches!(
            RelayerError::from_submission_message("error sending request for url".into()),
            RelayerError::Network(_)
        ));
    }
}
