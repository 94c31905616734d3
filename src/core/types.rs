// Domain types shared by the planner, ledger and coordinator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "SELL" => OrderSide::Sell,
            _ => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit,
    TakeProfit,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "MARKET",
            OrderKind::Limit => "LIMIT",
            OrderKind::TakeProfit => "TAKE_PROFIT",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "MARKET" => OrderKind::Market,
            "TAKE_PROFIT" => OrderKind::TakeProfit,
            _ => OrderKind::Limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Filled, Cancelled and Rejected never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELLED" => OrderStatus::Cancelled,
            "REJECTED" => OrderStatus::Rejected,
            _ => OrderStatus::Pending,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rung of the ladder as computed by the planner (unfloored)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridLevel {
    pub index: u32,
    pub target_price: f64,
    pub quantity: f64,
    pub kind: OrderKind,
}

/// Entry order owned by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub cycle_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub price: f64,
    pub requested_quantity: f64,
    pub filled_quantity: f64,
    /// Venue-reported average fill price, when the venue supplies one
    pub average_fill_price: Option<f64>,
    pub status: OrderStatus,
    pub grid_level: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub reject_reason: Option<String>,
}

impl Order {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Price used for the weighted average of this order's fills
    pub fn fill_price(&self) -> f64 {
        self.average_fill_price.unwrap_or(self.price)
    }

    pub fn has_fill(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::PartiallyFilled | OrderStatus::Filled
        ) && self.filled_quantity > 0.0
    }
}

/// The single aggregate exit order of a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitOrder {
    pub order_id: String,
    pub cycle_id: String,
    pub symbol: String,
    pub price: f64,
    pub quantity: f64,
    pub filled_quantity: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl TakeProfitOrder {
    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// A filled slice of an entry order, input to the take-profit engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub quantity: f64,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CyclePhase {
    Planning,
    Placing,
    Tracking,
    Closing,
    CoolingDown,
    Stopped,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Planning => "planning",
            CyclePhase::Placing => "placing",
            CyclePhase::Tracking => "tracking",
            CyclePhase::Closing => "closing",
            CyclePhase::CoolingDown => "cooling-down",
            CyclePhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    Cross,
    Isolated,
}

impl MarginMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginMode::Cross => "cross",
            MarginMode::Isolated => "isolated",
        }
    }
}

/// Venue tick and lot sizes; prices and quantities are floored to these
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VenuePrecision {
    pub price_tick: f64,
    pub quantity_step: f64,
}

impl Default for VenuePrecision {
    fn default() -> Self {
        Self {
            price_tick: 0.00001,
            quantity_step: 0.00001,
        }
    }
}

impl VenuePrecision {
    pub fn floor_price(&self, price: f64) -> f64 {
        floor_to_step(price, self.price_tick)
    }

    pub fn floor_quantity(&self, quantity: f64) -> f64 {
        floor_to_step(quantity, self.quantity_step)
    }
}

fn floor_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    // Nudge by a tiny epsilon so 0.3 / 0.1 style representation error doesn't drop a step
    let steps = (value / step + 1e-9).floor();
    steps * step
}

/// Snapshot of a symbol's cycle, exposed to the scheduler and CLI
#[derive(Debug, Clone, Serialize)]
pub struct CycleState {
    pub symbol: String,
    pub cycle_id: String,
    pub phase: CyclePhase,
    pub orders: Vec<Order>,
    pub take_profit: Option<TakeProfitOrder>,
    pub average_fill_price: Option<f64>,
    pub total_filled_quantity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn test_status_string_mapping() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
        ] {
            assert_eq!(OrderStatus::from_str_lossy(status.as_str()), status);
        }
    }

    #[test]
    fn test_precision_flooring() {
        let precision = VenuePrecision {
            price_tick: 0.001,
            quantity_step: 0.1,
        };
        assert!((precision.floor_price(0.48678) - 0.486).abs() < 1e-12);
        assert!((precision.floor_quantity(2.79) - 2.7).abs() < 1e-12);
        assert!((precision.floor_quantity(0.3) - 0.3).abs() < 1e-12);
        assert_eq!(precision.floor_quantity(0.05), 0.0);
    }
}
