// Common test utilities and helpers
#![allow(dead_code)]

use martingale_grid_bot::{
    CycleCoordinator, CycleEventKind, Database, EventSink, ExchangeGateway, GridConfig, MarginMode, MemorySink,
    OrderRepository, PaperExchange, RateLimiter, RetryPolicy, SqliteOrderRepository, VenuePrecision,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const SYMBOL: &str = "XRPUSDT";

/// Scenario strategy: 10 USDT at 20x over 15 levels, 1s polls, 5s cooldown
pub fn create_test_config() -> GridConfig {
    GridConfig {
        deposit_amount: 10.0,
        leverage: 20,
        margin_mode: MarginMode::Cross,
        coverage_percent: 0.40,
        grid_levels: 15,
        martingale_multiplier: 1.30,
        take_profit_percent: 0.02,
        market_entry: true,
        poll_interval: Duration::from_secs(1),
        restart_delay: Duration::from_secs(5),
        precision: VenuePrecision::default(),
        max_planning_attempts: 3,
        max_tracking_failures: 3,
    }
}

/// Create a temporary directory for test databases
pub fn create_temp_db_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");
    (temp_dir, db_path)
}

pub fn create_test_repo() -> Arc<dyn OrderRepository> {
    let db = Database::new_in_memory().expect("Failed to create database");
    db.run_migrations().expect("Failed to run migrations");
    Arc::new(SqliteOrderRepository::new(&db))
}

/// Generous limits so tests never wait on the window
pub fn create_test_gateway(venue: Arc<PaperExchange>, retry: RetryPolicy) -> Arc<ExchangeGateway> {
    let limiter = RateLimiter::new(10_000, Duration::from_secs(1), 8, Duration::from_secs(5));
    Arc::new(ExchangeGateway::new(venue, limiter, retry))
}

/// Paper venue, gateway, repository and event history wired together
pub struct Harness {
    pub venue: Arc<PaperExchange>,
    pub gateway: Arc<ExchangeGateway>,
    pub repo: Arc<dyn OrderRepository>,
    pub events: Arc<MemorySink>,
}

impl Harness {
    pub async fn new(price: f64) -> Self {
        Self::with_repo(price, create_test_repo()).await
    }

    pub async fn with_repo(price: f64, repo: Arc<dyn OrderRepository>) -> Self {
        let venue = Arc::new(PaperExchange::new());
        venue.set_price(SYMBOL, price).await;
        Self {
            gateway: create_test_gateway(Arc::clone(&venue), RetryPolicy::none()),
            venue,
            repo,
            events: Arc::new(MemorySink::new(500)),
        }
    }

    pub fn coordinator(&self, config: GridConfig, cancel: CancellationToken) -> CycleCoordinator {
        let events: Arc<dyn EventSink> = self.events.clone();
        CycleCoordinator::new(
            SYMBOL,
            config,
            Arc::clone(&self.gateway),
            Arc::clone(&self.repo),
            events,
            cancel,
        )
        .expect("valid test config")
    }

    pub fn count(&self, matches: impl Fn(&CycleEventKind) -> bool) -> usize {
        self.events.count(matches)
    }

    /// Let the paused clock run until `done` holds
    pub async fn wait_until(&self, done: impl Fn(&Self) -> bool) {
        for _ in 0..2_000 {
            if done(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("condition not reached; events: {:#?}", self.events.events());
    }
}

pub fn is_take_profit_placed(kind: &CycleEventKind) -> bool {
    matches!(kind, CycleEventKind::TakeProfitPlaced { .. })
}

pub fn is_take_profit_filled(kind: &CycleEventKind) -> bool {
    matches!(kind, CycleEventKind::TakeProfitFilled { .. })
}

pub fn is_fatal(kind: &CycleEventKind) -> bool {
    matches!(kind, CycleEventKind::FatalError { .. })
}

pub fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {} ± {}, got {}",
        expected,
        tolerance,
        actual
    );
}
