// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_vec_with_registry,
    register_int_gauge_with_registry, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Registry,
};

const FINE_GRAINED_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.15, 0.2, 0.25, 0.3, 0.35, 0.4, 0.45, 0.5, 0.6, 0.7, 0.8, 0.9,
    1.0, 1.2, 1.4, 1.6, 1.8, 2.0, 2.5, 3.0, 3.5, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10., 15., 20., 25.,
    30., 40., 50., 60., 90., 120., 180., 240., 300.,
];

const SYNC_RUN_SEC_BUCKETS: &[f64] = &[
    0.1, 0.5, 1.0, 2.5, 5.0, 10., 20., 30., 60., 120., 300., 600., 1200.,
];

#[derive(Clone, Debug)]
pub struct RelayerMetrics {
    pub(crate) requests_received: IntCounterVec,
    pub(crate) requests_ok: IntCounterVec,
    pub(crate) err_requests: IntCounterVec,
    pub(crate) requests_inflight: IntGaugeVec,

    pub(crate) rpc_queries: IntCounterVec,
    pub(crate) rpc_queries_latency: HistogramVec,
    pub(crate) rpc_rate_limited: IntCounterVec,
    pub(crate) rpc_node_connected: IntGaugeVec,

    pub(crate) sync_runs: IntCounterVec,
    pub(crate) sync_run_latency: HistogramVec,
    pub(crate) addresses_discovered: IntCounter,
    pub(crate) addresses_synced: IntCounter,
    pub(crate) addresses_skipped: IntCounter,
    pub(crate) addresses_errored: IntCounter,
    pub(crate) known_addresses: IntGauge,
    pub(crate) synced_addresses: IntGauge,

    pub(crate) tx_submitted: IntCounter,
    pub(crate) tx_confirmed: IntCounter,
    pub(crate) tx_failed: IntCounterVec,
    pub(crate) tx_latency: HistogramVec,

    pub(crate) relayer_balance_milli_ether: IntGauge,
    pub(crate) chain_block_height: IntGaugeVec,
    pub(crate) supervisor_running: IntGauge,
    pub(crate) server_uptime_seconds: IntGauge,
    pub(crate) last_successful_sync_timestamp: IntGauge,
}

impl RelayerMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            requests_received: register_int_counter_vec_with_registry!(
                "relayer_requests_received",
                "Total number of requests received in Server, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            requests_ok: register_int_counter_vec_with_registry!(
                "relayer_requests_ok",
                "Total number of ok requests, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            err_requests: register_int_counter_vec_with_registry!(
                "relayer_err_requests",
                "Total number of erred requests, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            requests_inflight: register_int_gauge_vec_with_registry!(
                "relayer_requests_inflight",
                "Total number of inflight requests, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            rpc_queries: register_int_counter_vec_with_registry!(
                "relayer_rpc_queries",
                "Total number of queries issued to a chain provider, by chain and method",
                &["chain", "method"],
                registry,
            )
            .unwrap(),
            rpc_queries_latency: register_histogram_vec_with_registry!(
                "relayer_rpc_queries_latency",
                "Latency of queries issued to a chain provider, by chain and method",
                &["chain", "method"],
                FINE_GRAINED_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            rpc_rate_limited: register_int_counter_vec_with_registry!(
                "relayer_rpc_rate_limited",
                "Total number of rate limited responses retried, by chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            rpc_node_connected: register_int_gauge_vec_with_registry!(
                "relayer_rpc_node_connected",
                "Whether the last request to the chain node succeeded (1) or not (0)",
                &["chain"],
                registry,
            )
            .unwrap(),
            sync_runs: register_int_counter_vec_with_registry!(
                "relayer_sync_runs",
                "Total number of sync runs, by trigger and outcome",
                &["trigger", "outcome"],
                registry,
            )
            .unwrap(),
            sync_run_latency: register_histogram_vec_with_registry!(
                "relayer_sync_run_latency",
                "Duration of sync runs in seconds, by trigger",
                &["trigger"],
                SYNC_RUN_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            addresses_discovered: register_int_counter_with_registry!(
                "relayer_addresses_discovered",
                "Total number of addresses returned by event discovery",
                registry,
            )
            .unwrap(),
            addresses_synced: register_int_counter_with_registry!(
                "relayer_addresses_synced",
                "Total number of addresses whose flag was written on the target chain",
                registry,
            )
            .unwrap(),
            addresses_skipped: register_int_counter_with_registry!(
                "relayer_addresses_skipped",
                "Total number of addresses skipped during sync",
                registry,
            )
            .unwrap(),
            addresses_errored: register_int_counter_with_registry!(
                "relayer_addresses_errored",
                "Total number of per address failures during sync",
                registry,
            )
            .unwrap(),
            known_addresses: register_int_gauge_with_registry!(
                "relayer_known_addresses",
                "Number of distinct addresses discovered in this process",
                registry,
            )
            .unwrap(),
            synced_addresses: register_int_gauge_with_registry!(
                "relayer_synced_addresses",
                "Number of addresses in the dedup set",
                registry,
            )
            .unwrap(),
            tx_submitted: register_int_counter_with_registry!(
                "relayer_tx_submitted",
                "Total number of flag transactions submitted to the target chain",
                registry,
            )
            .unwrap(),
            tx_confirmed: register_int_counter_with_registry!(
                "relayer_tx_confirmed",
                "Total number of flag transactions confirmed on the target chain",
                registry,
            )
            .unwrap(),
            tx_failed: register_int_counter_vec_with_registry!(
                "relayer_tx_failed",
                "Total number of failed flag writes, by error type",
                &["error_type"],
                registry,
            )
            .unwrap(),
            tx_latency: register_histogram_vec_with_registry!(
                "relayer_tx_latency",
                "Time from submission to confirmation of flag transactions",
                &["outcome"],
                FINE_GRAINED_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            relayer_balance_milli_ether: register_int_gauge_with_registry!(
                "relayer_balance_milli_ether",
                "Native balance of the relayer identity on the target chain, in milli-ether",
                registry,
            )
            .unwrap(),
            chain_block_height: register_int_gauge_vec_with_registry!(
                "relayer_chain_block_height",
                "Latest observed block height, by chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            supervisor_running: register_int_gauge_with_registry!(
                "relayer_supervisor_running",
                "Whether the relayer supervisor is running (1) or not (0)",
                registry,
            )
            .unwrap(),
            server_uptime_seconds: register_int_gauge_with_registry!(
                "relayer_server_uptime_seconds",
                "Relayer server uptime in seconds",
                registry,
            )
            .unwrap(),
            last_successful_sync_timestamp: register_int_gauge_with_registry!(
                "relayer_last_successful_sync_timestamp",
                "Unix timestamp of the last successful sync run",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}
