// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod abi;
pub mod chain_client;
pub mod config;
pub mod contracts;
pub mod error;
pub mod metered_eth_provider;
pub mod metrics;
pub mod node;
pub mod server;
pub mod status;
pub mod supervisor;
pub mod sync_engine;
pub mod types;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod test_utils;
