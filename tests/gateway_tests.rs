// Integration tests for the shared, rate-limited gateway

mod common;

use common::*;
use futures_util::future::join_all;
use martingale_grid_bot::{ExchangeGateway, OrderRequest, PaperExchange, RateLimiter, RetryPolicy, VenueError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_window_is_shared_across_symbols() {
    let venue = Arc::new(PaperExchange::new());
    venue.set_price("XRPUSDT", 0.5).await;
    venue.set_price("BTCUSDT", 60_000.0).await;

    let limiter = RateLimiter::new(4, Duration::from_secs(1), 2, Duration::from_secs(30));
    let gateway = Arc::new(ExchangeGateway::new(venue, limiter, RetryPolicy::none()));

    let start = Instant::now();
    let calls = (0..10).map(|i| {
        let gateway = Arc::clone(&gateway);
        let symbol = if i % 2 == 0 { "XRPUSDT" } else { "BTCUSDT" };
        async move { gateway.get_price(symbol).await }
    });
    let results = join_all(calls).await;

    assert!(results.iter().all(|r| r.is_ok()));
    // 10 requests through a 4-per-second window need two full extra windows
    assert!(start.elapsed() >= Duration::from_secs(2));

    let stats = gateway.stats();
    assert_eq!(stats.requests, 10);
    assert_eq!(stats.successes, 10);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_response_backs_off_then_succeeds() {
    let venue = Arc::new(PaperExchange::new());
    venue.set_price(SYMBOL, 0.5).await;
    venue.inject_fault("place_order", VenueError::RateLimited("429".into())).await;

    let retry = RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(5), 2.0);
    let gateway = create_test_gateway(Arc::clone(&venue), retry);

    let start = Instant::now();
    let id = gateway
        .place_order(&OrderRequest::limit_buy(SYMBOL, 0.45, 2.0))
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_millis(500));
    assert!(venue.order(&id).await.is_some());

    let stats = gateway.stats();
    assert_eq!(stats.rate_limited, 1);
    assert_eq!(stats.retries, 1);
    assert_eq!(venue.placed_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_is_surfaced_immediately() {
    let venue = Arc::new(PaperExchange::new());
    venue.set_price(SYMBOL, 0.5).await;
    venue.inject_fault("set_leverage", VenueError::Unauthorized("expired key".into())).await;

    let retry = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(1), 2.0);
    let gateway = create_test_gateway(Arc::clone(&venue), retry);

    let err = gateway
        .set_leverage(SYMBOL, 20, martingale_grid_bot::MarginMode::Cross)
        .await
        .unwrap_err();
    assert!(err.is_symbol_fatal());
    assert_eq!(gateway.stats().retries, 0);
    assert_eq!(venue.leverage(SYMBOL).await, None);
}
