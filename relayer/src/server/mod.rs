// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::with_metrics;
use crate::{
    error::{RelayerError, RelayerResult},
    metrics::RelayerMetrics,
    server::handler::{
        HealthResponse, MessageResponse, RelayerRequestHandler, RelayerRequestHandlerTrait,
        StatsResponse, StatusResponse, SyncAddressesResponse,
    },
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, instrument};

pub mod handler;

pub const STATUS_PATH: &str = "/status";
pub const STATS_PATH: &str = "/stats";
pub const HEALTH_PATH: &str = "/health";
pub const METRICS_PATH: &str = "/metrics";
pub const TRIGGER_SYNC_PATH: &str = "/trigger-sync";
pub const SYNC_ADDRESSES_PATH: &str = "/sync-addresses";
pub const RESET_SYNC_PATH: &str = "/reset-sync";

const ADDRESS_LIST_REQUIRED: &str = "Please provide an array of addresses to sync";

/// Body of a `POST /sync-addresses` request.
#[derive(Debug, Deserialize)]
pub struct SyncAddressesRequest {
    pub addresses: Vec<String>,
}

impl SyncAddressesRequest {
    /// At least one address is required.
    pub fn into_addresses(self) -> RelayerResult<Vec<String>> {
        if self.addresses.is_empty() {
            return Err(RelayerError::InvalidRequest(ADDRESS_LIST_REQUIRED.to_string()));
        }
        Ok(self.addresses)
    }
}

/// A [`RelayerError`] together with the headline used for `500` bodies.
#[derive(Debug)]
pub struct ApiError {
    title: &'static str,
    error: RelayerError,
}

impl ApiError {
    pub fn new(title: &'static str, error: RelayerError) -> Self {
        Self { title, error }
    }
}

impl From<RelayerError> for ApiError {
    fn from(error: RelayerError) -> Self {
        Self::new("Request failed", error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let title = self.title;
        match self.error {
            RelayerError::NotRunning => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "Relayer service not initialized",
                    "status": "not-available",
                })),
            )
                .into_response(),
            RelayerError::InvalidRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid request", "message": message })),
            )
                .into_response(),
            err @ RelayerError::InvalidAddress(_) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid request", "message": err.to_string() })),
            )
                .into_response(),
            err => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": title,
                    "message": err.to_string(),
                    "timestamp": Utc::now(),
                })),
            )
                .into_response(),
        }
    }
}

impl IntoResponse for RelayerError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

pub fn run_server(
    socket_address: &SocketAddr,
    handler: RelayerRequestHandler,
    metrics: Arc<RelayerMetrics>,
) -> tokio::task::JoinHandle<RelayerResult<()>> {
    let socket_address = *socket_address;
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(socket_address)
            .await
            .map_err(|e| RelayerError::Config(format!("cannot bind {socket_address}: {e}")))?;
        info!("Control plane listening on {socket_address}");
        axum::serve(
            listener,
            make_router(Arc::new(handler), metrics).into_make_service(),
        )
        .await
        .map_err(|e| RelayerError::Internal(format!("control plane server failed: {e}")))
    })
}

pub(crate) fn make_router(
    handler: Arc<impl RelayerRequestHandlerTrait + Sync + Send + 'static>,
    metrics: Arc<RelayerMetrics>,
) -> Router {
    Router::new()
        .route(STATUS_PATH, get(status))
        .route(STATS_PATH, get(stats))
        .route(HEALTH_PATH, get(health))
        .route(METRICS_PATH, get(metrics_text))
        .route(TRIGGER_SYNC_PATH, post(trigger_sync))
        .route(SYNC_ADDRESSES_PATH, post(sync_addresses))
        .route(RESET_SYNC_PATH, post(reset_sync))
        .with_state((handler, metrics))
}

async fn status(
    State((handler, metrics)): State<(
        Arc<impl RelayerRequestHandlerTrait + Sync + Send>,
        Arc<RelayerMetrics>,
    )>,
) -> Result<Json<StatusResponse>, ApiError> {
    let future = async {
        handler
            .handle_status()
            .await
            .map(Json)
            .map_err(|e| ApiError::new("Status unavailable", e))
    };
    with_metrics!(metrics.clone(), "status", future).await
}

async fn stats(
    State((handler, metrics)): State<(
        Arc<impl RelayerRequestHandlerTrait + Sync + Send>,
        Arc<RelayerMetrics>,
    )>,
) -> Result<Json<StatsResponse>, ApiError> {
    let future = async {
        handler
            .handle_statistics()
            .await
            .map(Json)
            .map_err(|e| ApiError::new("Statistics unavailable", e))
    };
    with_metrics!(metrics.clone(), "stats", future).await
}

async fn health(
    State((handler, metrics)): State<(
        Arc<impl RelayerRequestHandlerTrait + Sync + Send>,
        Arc<RelayerMetrics>,
    )>,
) -> Result<Json<HealthResponse>, ApiError> {
    let future = async {
        handler
            .handle_health()
            .await
            .map(Json)
            .map_err(|e| ApiError::new("Health check failed", e))
    };
    with_metrics!(metrics.clone(), "health", future).await
}

async fn metrics_text(
    State((handler, _)): State<(
        Arc<impl RelayerRequestHandlerTrait + Sync + Send>,
        Arc<RelayerMetrics>,
    )>,
) -> Result<String, ApiError> {
    handler
        .handle_metrics()
        .await
        .map_err(|e| ApiError::new("Metrics export failed", e))
}

#[instrument(level = "info", skip_all)]
async fn trigger_sync(
    State((handler, metrics)): State<(
        Arc<impl RelayerRequestHandlerTrait + Sync + Send>,
        Arc<RelayerMetrics>,
    )>,
) -> Result<Json<MessageResponse>, ApiError> {
    let future = async {
        handler
            .handle_trigger_sync()
            .await
            .map(Json)
            .map_err(|e| ApiError::new("Sync operation failed", e))
    };
    with_metrics!(metrics.clone(), "trigger_sync", future).await
}

#[instrument(level = "info", skip_all)]
async fn sync_addresses(
    State((handler, metrics)): State<(
        Arc<impl RelayerRequestHandlerTrait + Sync + Send>,
        Arc<RelayerMetrics>,
    )>,
    payload: Result<Json<SyncAddressesRequest>, JsonRejection>,
) -> Result<Json<SyncAddressesResponse>, ApiError> {
    let future = async {
        let addresses = payload
            .map_err(|rejection| {
                tracing::debug!("Rejected address sync body: {rejection}");
                RelayerError::InvalidRequest(ADDRESS_LIST_REQUIRED.to_string())
            })
            .and_then(|Json(request)| request.into_addresses())
            .map_err(|e| ApiError::new("Address sync failed", e))?;
        handler
            .handle_sync_addresses(addresses)
            .await
            .map(Json)
            .map_err(|e| ApiError::new("Address sync failed", e))
    };
    with_metrics!(metrics.clone(), "sync_addresses", future).await
}

#[instrument(level = "info", skip_all)]
async fn reset_sync(
    State((handler, metrics)): State<(
        Arc<impl RelayerRequestHandlerTrait + Sync + Send>,
        Arc<RelayerMetrics>,
    )>,
) -> Result<Json<MessageResponse>, ApiError> {
    let future = async {
        handler
            .handle_reset_sync()
            .await
            .map(Json)
            .map_err(|e| ApiError::new("Reset failed", e))
    };
    with_metrics!(metrics.clone(), "reset_sync", future).await
}

#[macro_export]
macro_rules! with_metrics {
    ($metrics:expr, $type_:expr, $func:expr) => {
        async move {
            info!("Received {} request", $type_);
            $metrics
                .requests_received
                .with_label_values(&[$type_])
                .inc();
            $metrics
                .requests_inflight
                .with_label_values(&[$type_])
                .inc();

            let result = $func.await;

            match &result {
                Ok(_) => {
                    info!("{} request succeeded", $type_);
                    $metrics.requests_ok.with_label_values(&[$type_]).inc();
                }
                Err(e) => {
                    info!("{} request failed: {:?}", $type_, e);
                    $metrics.err_requests.with_label_values(&[$type_]).inc();
                }
            }

            $metrics
                .requests_inflight
                .with_label_values(&[$type_])
                .dec();
            result
        }
    };
}
