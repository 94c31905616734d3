//! Single shared entry point to the venue: rate limiting, retries, stats

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{CancelOutcome, Exchange, OrderRequest, OrderStatusReport, RateLimiter, RetryPolicy, VenueResult};
use crate::core::types::MarginMode;
use crate::error::GridBotResult;

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    successes: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
    rate_limited: AtomicU64,
}

/// Point-in-time copy of the gateway counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub requests: u64,
    pub successes: u64,
    pub retries: u64,
    pub failures: u64,
    pub rate_limited: u64,
    pub in_flight: usize,
}

/// Every venue request from every symbol goes through one of these.
/// Retryable failures (RateLimited, Transient) are retried with backoff;
/// Rejected and Unauthorized surface immediately.
pub struct ExchangeGateway {
    venue: Arc<dyn Exchange>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    counters: Counters,
}

impl ExchangeGateway {
    pub fn new(venue: Arc<dyn Exchange>, limiter: RateLimiter, retry: RetryPolicy) -> Self {
        Self {
            venue,
            limiter,
            retry,
            counters: Counters::default(),
        }
    }

    pub fn venue_name(&self) -> &str {
        self.venue.name()
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            rate_limited: self.counters.rate_limited.load(Ordering::Relaxed),
            in_flight: self.limiter.in_flight(),
        }
    }

    pub async fn get_price(&self, symbol: &str) -> GridBotResult<f64> {
        self.call("get_price", symbol, || self.venue.get_price(symbol)).await
    }

    pub async fn place_order(&self, request: &OrderRequest) -> GridBotResult<String> {
        self.call("place_order", &request.symbol, || self.venue.place_order(request))
            .await
    }

    pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> GridBotResult<CancelOutcome> {
        self.call("cancel_order", symbol, || self.venue.cancel_order(symbol, order_id))
            .await
    }

    pub async fn get_order_status(&self, symbol: &str, order_id: &str) -> GridBotResult<OrderStatusReport> {
        self.call("get_order_status", symbol, || {
            self.venue.get_order_status(symbol, order_id)
        })
        .await
    }

    pub async fn set_leverage(&self, symbol: &str, leverage: u32, margin_mode: MarginMode) -> GridBotResult<()> {
        self.call("set_leverage", symbol, || {
            self.venue.set_leverage(symbol, leverage, margin_mode)
        })
        .await
    }

    async fn call<T, F, Fut>(&self, op: &'static str, symbol: &str, mut request: F) -> GridBotResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = VenueResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = match self.limiter.acquire().await {
                Ok(_permit) => {
                    self.counters.requests.fetch_add(1, Ordering::Relaxed);
                    request().await
                }
                Err(e) => Err(e),
            };

            let err = match result {
                Ok(value) => {
                    self.counters.successes.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(err) => err,
            };

            if matches!(err, super::VenueError::RateLimited(_)) {
                self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
            }

            if err.is_retryable() && self.retry.should_retry(attempt) {
                let delay = self.retry.delay_for(attempt);
                self.counters.retries.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "⚠️  {} {} failed (attempt {}/{}), retrying in {:?}: {}",
                    op, symbol, attempt, self.retry.max_attempts, delay, err
                );
                sleep(delay).await;
                continue;
            }

            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            debug!("{} {} gave up after {} attempt(s): {}", op, symbol, attempt, err);
            return Err(err.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GridBotError;
    use crate::exchange::{PaperExchange, VenueError};
    use std::time::Duration;

    fn gateway(venue: Arc<PaperExchange>) -> ExchangeGateway {
        ExchangeGateway::new(
            venue,
            RateLimiter::new(100, Duration::from_secs(1), 10, Duration::from_secs(5)),
            RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1), 2.0),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let venue = Arc::new(PaperExchange::new());
        venue.set_price("XRPUSDT", 0.5).await;
        venue.inject_fault("get_price", VenueError::Transient("timeout".into())).await;

        let gateway = gateway(Arc::clone(&venue));
        assert_eq!(gateway.get_price("XRPUSDT").await.unwrap(), 0.5);

        let stats = gateway.stats();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.retries, 1);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_is_not_retried() {
        let venue = Arc::new(PaperExchange::new());
        venue.set_price("XRPUSDT", 0.5).await;
        venue.inject_fault("place_order", VenueError::Rejected("min notional".into())).await;

        let gateway = gateway(Arc::clone(&venue));
        let err = gateway
            .place_order(&OrderRequest::limit_buy("XRPUSDT", 0.49, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, GridBotError::GatewayRejected(_)));
        assert_eq!(gateway.stats().requests, 1);
        assert_eq!(gateway.stats().retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let venue = Arc::new(PaperExchange::new());
        venue.set_price("XRPUSDT", 0.5).await;
        for _ in 0..3 {
            venue.inject_fault("get_price", VenueError::RateLimited("429".into())).await;
        }

        let gateway = gateway(Arc::clone(&venue));
        let err = gateway.get_price("XRPUSDT").await.unwrap_err();
        assert!(matches!(err, GridBotError::RateLimited(_)));
        assert_eq!(gateway.stats().rate_limited, 3);
        assert_eq!(gateway.stats().failures, 1);
    }
}
