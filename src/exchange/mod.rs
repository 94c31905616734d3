//! Venue abstraction and the rate-limited gateway in front of it

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::types::{MarginMode, OrderKind, OrderSide, OrderStatus};

pub mod gateway;
pub mod paper;
pub mod rate_limiter;
pub mod retry;

pub use gateway::{ExchangeGateway, GatewayStats};
pub use paper::PaperExchange;
pub use rate_limiter::RateLimiter;
pub use retry::RetryPolicy;

/// Failure reported by a venue call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VenueError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl VenueError {
    /// Only throttling and transient faults are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, VenueError::RateLimited(_) | VenueError::Transient(_))
    }
}

pub type VenueResult<T> = Result<T, VenueError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    /// None for market orders
    pub price: Option<f64>,
    pub quantity: f64,
}

impl OrderRequest {
    pub fn market_buy(symbol: &str, quantity: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            kind: OrderKind::Market,
            price: None,
            quantity,
        }
    }

    pub fn limit_buy(symbol: &str, price: f64, quantity: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            kind: OrderKind::Limit,
            price: Some(price),
            quantity,
        }
    }

    pub fn take_profit(symbol: &str, price: f64, quantity: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: OrderSide::Sell,
            kind: OrderKind::TakeProfit,
            price: Some(price),
            quantity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Order was already filled or cancelled venue-side
    AlreadyClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusReport {
    pub status: OrderStatus,
    pub filled_quantity: f64,
    pub average_price: Option<f64>,
}

/// Exchange venue
#[async_trait]
pub trait Exchange: Send + Sync {
    fn name(&self) -> &str;

    async fn get_price(&self, symbol: &str) -> VenueResult<f64>;

    /// Returns the venue order id
    async fn place_order(&self, request: &OrderRequest) -> VenueResult<String>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> VenueResult<CancelOutcome>;

    async fn get_order_status(&self, symbol: &str, order_id: &str) -> VenueResult<OrderStatusReport>;

    async fn set_leverage(&self, symbol: &str, leverage: u32, margin_mode: MarginMode) -> VenueResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(VenueError::RateLimited("429".into()).is_retryable());
        assert!(VenueError::Transient("timeout".into()).is_retryable());
        assert!(!VenueError::Rejected("min notional".into()).is_retryable());
        assert!(!VenueError::Unauthorized("bad key".into()).is_retryable());
    }

    #[test]
    fn test_order_request_builders() {
        let market = OrderRequest::market_buy("XRPUSDT", 2.8);
        assert_eq!(market.kind, OrderKind::Market);
        assert!(market.price.is_none());

        let tp = OrderRequest::take_profit("XRPUSDT", 0.478, 11.17);
        assert_eq!(tp.side, OrderSide::Sell);
        assert_eq!(tp.price, Some(0.478));
    }
}
