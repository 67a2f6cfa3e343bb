// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::metrics::RelayerMetrics;
use ethers::providers::{Http, HttpClientError, JsonRpcClient, Provider};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use url::{ParseError, Url};

const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Request shaping applied to every JSON-RPC call against one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcThrottle {
    pub max_concurrent_requests: usize,
    pub min_request_interval: Duration,
}

impl Default for RpcThrottle {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 4,
            min_request_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MeteredEthHttpProvider {
    inner: Http,
    chain: String,
    metrics: Arc<RelayerMetrics>,
    semaphore: Arc<Semaphore>,
    min_request_interval: Duration,
    last_request_time: Arc<Mutex<Instant>>,
}

#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
impl JsonRpcClient for MeteredEthHttpProvider {
    type Error = HttpClientError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, HttpClientError> {
        // The semaphore is owned here and never closed
        let _permit = self.semaphore.acquire().await.ok();

        let mut last_request = self.last_request_time.lock().await;
        let elapsed = Instant::now().saturating_duration_since(*last_request);
        if elapsed < self.min_request_interval {
            tokio::time::sleep(self.min_request_interval - elapsed).await;
        }
        *last_request = Instant::now();
        drop(last_request);

        self.metrics
            .rpc_queries
            .with_label_values(&[&self.chain, method])
            .inc();
        let _guard = self
            .metrics
            .rpc_queries_latency
            .with_label_values(&[&self.chain, method])
            .start_timer();

        let mut result = self.inner.request(method, &params).await;
        let mut retry_count = 0;
        while retry_count < MAX_RATE_LIMIT_RETRIES {
            match &result {
                Err(e) if is_rate_limit_error(e) => {}
                _ => break,
            }
            // 1s, 2s, 4s
            let backoff = Duration::from_secs(1 << retry_count);
            tracing::warn!(
                chain = %self.chain,
                method,
                "Rate limited by provider, retrying after {:?} (attempt {}/{})",
                backoff,
                retry_count + 1,
                MAX_RATE_LIMIT_RETRIES
            );
            self.metrics
                .rpc_rate_limited
                .with_label_values(&[&self.chain])
                .inc();
            tokio::time::sleep(backoff).await;
            result = self.inner.request(method, &params).await;
            retry_count += 1;
        }

        self.metrics
            .rpc_node_connected
            .with_label_values(&[&self.chain])
            .set(i64::from(result.is_ok()));
        result
    }
}

// Some providers answer with a non standard body such as
// {"code":-32005,"message":"Too Many Requests"}, which only surfaces as a
// deserialization error, so the rendered error text is inspected.
fn is_rate_limit_error(err: &HttpClientError) -> bool {
    let text = format!("{:?}", err).to_lowercase();
    text.contains("429")
        || text.contains("-32005")
        || text.contains("too many requests")
        || text.contains("rate limit")
}

impl MeteredEthHttpProvider {
    pub fn new(
        url: impl Into<Url>,
        chain: impl Into<String>,
        metrics: Arc<RelayerMetrics>,
        throttle: RpcThrottle,
    ) -> Self {
        Self {
            inner: Http::new(url),
            chain: chain.into(),
            metrics,
            semaphore: Arc::new(Semaphore::new(throttle.max_concurrent_requests.max(1))),
            min_request_interval: throttle.min_request_interval,
            last_request_time: Arc::new(Mutex::new(
                Instant::now()
                    .checked_sub(throttle.min_request_interval)
                    .unwrap_or_else(Instant::now),
            )),
        }
    }
}

pub fn new_metered_eth_provider(
    url: &str,
    chain: &str,
    metrics: Arc<RelayerMetrics>,
    throttle: RpcThrottle,
) -> Result<Provider<MeteredEthHttpProvider>, ParseError> {
    let http_provider = MeteredEthHttpProvider::new(Url::parse(url)?, chain, metrics, throttle);
    Ok(Provider::new(http_provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{JsonRpcError, Middleware};

    fn fast_throttle() -> RpcThrottle {
        RpcThrottle {
            max_concurrent_requests: 2,
            min_request_interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_metered_eth_provider() {
        let metrics = Arc::new(RelayerMetrics::new_for_testing());
        let provider = new_metered_eth_provider(
            "http://localhost:9876",
            "target",
            metrics.clone(),
            fast_throttle(),
        )
        .unwrap();

        let labels = ["target", "eth_blockNumber"];
        assert_eq!(
            metrics
                .rpc_queries
                .get_metric_with_label_values(&labels)
                .unwrap()
                .get(),
            0
        );

        provider.get_block_number().await.unwrap_err(); // nothing listens there

        assert_eq!(
            metrics
                .rpc_queries
                .get_metric_with_label_values(&labels)
                .unwrap()
                .get(),
            1
        );
        assert_eq!(
            metrics
                .rpc_queries_latency
                .get_metric_with_label_values(&labels)
                .unwrap()
                .get_sample_count(),
            1
        );
        assert_eq!(
            metrics
                .rpc_node_connected
                .get_metric_with_label_values(&["target"])
                .unwrap()
                .get(),
            0
        );
        // Connection failures are not retried
        assert_eq!(
            metrics
                .rpc_rate_limited
                .get_metric_with_label_values(&["target"])
                .unwrap()
                .get(),
            0
        );
    }

    #[test]
    fn test_rate_limit_detection() {
        let rate_limited = HttpClientError::JsonRpcError(JsonRpcError {
            code: -32005,
            message: "Too Many Requests".into(),
            data: None,
        });
        assert!(is_rate_limit_error(&rate_limited));

        let reverted = HttpClientError::JsonRpcError(JsonRpcError {
            code: 3,
            message: "execution reverted".into(),
            data: None,
        });
        assert!(!is_rate_limit_error(&reverted));
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let metrics = Arc::new(RelayerMetrics::new_for_testing());
        assert!(new_metered_eth_provider("not a url", "source", metrics, fast_throttle()).is_err());
    }
}
