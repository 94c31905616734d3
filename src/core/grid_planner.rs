// Martingale ladder construction

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::core::types::{GridLevel, MarginMode, OrderKind, VenuePrecision};
use crate::error::{GridBotError, GridBotResult};

/// Immutable per-cycle strategy parameters, validated once at cycle start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    pub deposit_amount: f64,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    pub coverage_percent: f64,
    pub grid_levels: u32,
    pub martingale_multiplier: f64,
    pub take_profit_percent: f64,
    pub market_entry: bool,
    pub poll_interval: Duration,
    pub restart_delay: Duration,
    pub precision: VenuePrecision,
    /// Planning attempts (price fetch + leverage setup) before the symbol is halted
    pub max_planning_attempts: u32,
    /// Consecutive failed polls before the symbol is halted
    pub max_tracking_failures: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            deposit_amount: 100.0,
            leverage: 20,
            margin_mode: MarginMode::Cross,
            coverage_percent: 0.40,
            grid_levels: 15,
            martingale_multiplier: 1.30,
            take_profit_percent: 0.02,
            market_entry: true,
            poll_interval: Duration::from_secs(3),
            restart_delay: Duration::from_secs(60),
            precision: VenuePrecision::default(),
            max_planning_attempts: 3,
            max_tracking_failures: 5,
        }
    }
}

impl GridConfig {
    pub fn validate(&self) -> GridBotResult<()> {
        if self.leverage == 0 {
            return Err(invalid("leverage must be a positive integer"));
        }
        if !(self.deposit_amount > 0.0) {
            return Err(invalid("deposit_amount must be positive"));
        }
        if !(self.coverage_percent > 0.0 && self.coverage_percent < 1.0) {
            return Err(invalid("coverage_percent must be inside (0, 1)"));
        }
        if self.grid_levels < 2 {
            return Err(invalid("grid_levels must be at least 2"));
        }
        if !(self.martingale_multiplier > 1.0) {
            return Err(invalid("martingale_multiplier must be greater than 1"));
        }
        if !(self.take_profit_percent > 0.0) {
            return Err(invalid("take_profit_percent must be positive"));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval must be non-zero"));
        }
        if !(self.precision.price_tick > 0.0 && self.precision.quantity_step > 0.0) {
            return Err(invalid("price_tick and quantity_step must be positive"));
        }
        if self.max_planning_attempts == 0 || self.max_tracking_failures == 0 {
            return Err(invalid("fault thresholds must be at least 1"));
        }
        Ok(())
    }

    pub fn available_capital(&self) -> f64 {
        self.deposit_amount * self.leverage as f64
    }
}

fn invalid(msg: &str) -> GridBotError {
    GridBotError::InvalidConfig(msg.to_string())
}

/// `Σ m^i for i in 0..n`, closed form when m != 1
pub fn total_multiplier(multiplier: f64, levels: u32) -> f64 {
    if (multiplier - 1.0).abs() < f64::EPSILON {
        return levels as f64;
    }
    (multiplier.powi(levels as i32) - 1.0) / (multiplier - 1.0)
}

/// Result of planning one cycle
#[derive(Debug, Clone, Serialize)]
pub struct GridPlan {
    pub reference_price: f64,
    pub available_capital: f64,
    pub total_multiplier: f64,
    pub base_quantity: f64,
    pub min_price: f64,
    pub price_step: f64,
    pub levels: Vec<GridLevel>,
}

pub struct GridPlanner;

impl GridPlanner {
    /// Build the ladder for `current_price`. Quantities are not floored to
    /// the venue step; the caller does that before placement.
    pub fn plan(current_price: f64, config: &GridConfig) -> GridBotResult<GridPlan> {
        config.validate()?;
        if !(current_price > 0.0) || !current_price.is_finite() {
            return Err(invalid("current price must be positive"));
        }

        let available_capital = config.available_capital();
        let multiplier = config.martingale_multiplier;
        let total = total_multiplier(multiplier, config.grid_levels);
        let base_quantity = available_capital / (total * current_price);

        let min_price = current_price * (1.0 - config.coverage_percent);
        let price_step = (current_price - min_price) / (config.grid_levels - 1) as f64;

        let levels = (0..config.grid_levels)
            .map(|i| {
                let kind = if i == 0 && config.market_entry {
                    OrderKind::Market
                } else {
                    OrderKind::Limit
                };
                GridLevel {
                    index: i,
                    target_price: current_price - i as f64 * price_step,
                    quantity: base_quantity * multiplier.powi(i as i32),
                    kind,
                }
            })
            .collect();

        Ok(GridPlan {
            reference_price: current_price,
            available_capital,
            total_multiplier: total,
            base_quantity,
            min_price,
            price_step,
            levels,
        })
    }
}

/// Summary of a planned ladder for logs and the `plan` command
#[derive(Debug, Clone, Serialize)]
pub struct GridStatistics {
    pub total_levels: usize,
    pub market_levels: usize,
    pub limit_levels: usize,
    pub total_quantity: f64,
    pub total_notional: f64,
    pub margin_required: f64,
    pub average_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub spread_percent: f64,
}

impl GridStatistics {
    pub fn from_levels(levels: &[GridLevel], leverage: u32) -> Option<Self> {
        if levels.is_empty() {
            return None;
        }

        let total_quantity: f64 = levels.iter().map(|l| l.quantity).sum();
        let total_notional: f64 = levels.iter().map(|l| l.quantity * l.target_price).sum();
        let min_price = levels.iter().map(|l| l.target_price).fold(f64::INFINITY, f64::min);
        let max_price = levels.iter().map(|l| l.target_price).fold(0.0, f64::max);
        let market_levels = levels.iter().filter(|l| l.kind == OrderKind::Market).count();

        Some(Self {
            total_levels: levels.len(),
            market_levels,
            limit_levels: levels.len() - market_levels,
            total_quantity,
            total_notional,
            margin_required: total_notional / leverage.max(1) as f64,
            average_price: if total_quantity > 0.0 { total_notional / total_quantity } else { 0.0 },
            min_price,
            max_price,
            spread_percent: if max_price > 0.0 { (max_price - min_price) / max_price * 100.0 } else { 0.0 },
        })
    }

    pub fn log(&self, symbol: &str) {
        info!(
            "🏗️  {} grid: {} levels ({} market, {} limit), {:.5} units, notional {:.2}, margin {:.2}",
            symbol,
            self.total_levels,
            self.market_levels,
            self.limit_levels,
            self.total_quantity,
            self.total_notional,
            self.margin_required
        );
        info!(
            "   📉 range {:.5} → {:.5} ({:.2}% spread), avg planned price {:.5}",
            self.max_price, self.min_price, self.spread_percent, self.average_price
        );
    }
}
