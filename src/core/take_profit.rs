// Aggregate exit order computation

use serde::Serialize;

use crate::core::grid_planner::GridConfig;
use crate::core::types::{Fill, TakeProfitOrder, VenuePrecision};
use crate::error::{GridBotError, GridBotResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TakeProfitTarget {
    /// Quantity-weighted mean entry price
    pub average_price: f64,
    /// Sum of entry fills
    pub total_quantity: f64,
    /// Quantity the exit order should carry (entries minus what earlier exits sold)
    pub exit_quantity: f64,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TakeProfitAction {
    /// Live order already matches the target
    Keep,
    Place(TakeProfitTarget),
    /// Venue has no amend, so the old order is cancelled and a new one placed
    Replace {
        cancel_order_id: String,
        target: TakeProfitTarget,
    },
}

#[derive(Debug, Clone)]
pub struct TakeProfitEngine {
    take_profit_percent: f64,
    precision: VenuePrecision,
}

impl TakeProfitEngine {
    pub fn new(take_profit_percent: f64, precision: VenuePrecision) -> Self {
        Self {
            take_profit_percent,
            precision,
        }
    }

    pub fn from_config(config: &GridConfig) -> Self {
        Self::new(config.take_profit_percent, config.precision)
    }

    /// Recompute the target from the full filled set. Never incremental:
    /// the average is rebuilt from every fill each time.
    pub fn compute(&self, fills: &[Fill], exited_quantity: f64) -> GridBotResult<TakeProfitTarget> {
        let total_quantity: f64 = fills.iter().map(|f| f.quantity).sum();
        if total_quantity <= 0.0 {
            return Err(GridBotError::NoFillsYet);
        }

        let total_cost: f64 = fills.iter().map(|f| f.quantity * f.price).sum();
        let average_price = total_cost / total_quantity;
        let price = self
            .precision
            .floor_price(average_price * (1.0 + self.take_profit_percent));
        let exit_quantity = self
            .precision
            .floor_quantity((total_quantity - exited_quantity).max(0.0));

        Ok(TakeProfitTarget {
            average_price,
            total_quantity,
            exit_quantity,
            price,
        })
    }

    pub fn decide(&self, live: Option<&TakeProfitOrder>, target: TakeProfitTarget) -> TakeProfitAction {
        match live.filter(|tp| tp.is_live()) {
            Some(tp) if self.matches(tp, &target) => TakeProfitAction::Keep,
            Some(tp) => TakeProfitAction::Replace {
                cancel_order_id: tp.order_id.clone(),
                target,
            },
            None if target.exit_quantity <= 0.0 => TakeProfitAction::Keep,
            None => TakeProfitAction::Place(target),
        }
    }

    fn matches(&self, live: &TakeProfitOrder, target: &TakeProfitTarget) -> bool {
        let price_tolerance = self.precision.price_tick / 2.0;
        let quantity_tolerance = self.precision.quantity_step / 2.0;
        (live.price - target.price).abs() < price_tolerance
            && (live.quantity - target.exit_quantity).abs() < quantity_tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::OrderStatus;
    use chrono::Utc;

    fn engine() -> TakeProfitEngine {
        TakeProfitEngine::new(0.02, VenuePrecision::default())
    }

    fn scenario_fills() -> Vec<Fill> {
        vec![
            Fill { quantity: 2.8, price: 0.486 },
            Fill { quantity: 3.64, price: 0.471 },
            Fill { quantity: 4.73, price: 0.457 },
        ]
    }

    fn live_tp(target: &TakeProfitTarget) -> TakeProfitOrder {
        TakeProfitOrder {
            order_id: "tp-1".to_string(),
            cycle_id: "c".to_string(),
            symbol: "XRPUSDT".to_string(),
            price: target.price,
            quantity: target.exit_quantity,
            filled_quantity: 0.0,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            filled_at: None,
        }
    }

    #[test]
    fn test_three_fill_scenario() {
        let target = engine().compute(&scenario_fills(), 0.0).unwrap();
        assert!((target.total_quantity - 11.17).abs() < 1e-9);
        assert!((target.average_price - 0.468).abs() < 0.001);
        assert!((target.price - 0.477).abs() < 0.002);
        assert!((target.price - target.average_price * 1.02).abs() < 0.00001);
    }

    #[test]
    fn test_no_fills() {
        assert!(matches!(engine().compute(&[], 0.0), Err(GridBotError::NoFillsYet)));
    }

    #[test]
    fn test_unchanged_fills_keep_live_order() {
        let engine = engine();
        let target = engine.compute(&scenario_fills(), 0.0).unwrap();
        let live = live_tp(&target);

        let again = engine.compute(&scenario_fills(), 0.0).unwrap();
        assert_eq!(engine.decide(Some(&live), again), TakeProfitAction::Keep);
    }

    #[test]
    fn test_new_fill_replaces_live_order() {
        let engine = engine();
        let mut fills = scenario_fills();
        let live = live_tp(&engine.compute(&fills, 0.0).unwrap());

        fills.push(Fill { quantity: 6.15, price: 0.443 });
        let target = engine.compute(&fills, 0.0).unwrap();
        match engine.decide(Some(&live), target) {
            TakeProfitAction::Replace { cancel_order_id, target } => {
                assert_eq!(cancel_order_id, "tp-1");
                assert!(target.exit_quantity > live.quantity);
                assert!(target.price < live.price);
            }
            other => panic!("expected replace, got {:?}", other),
        }
    }

    #[test]
    fn test_exited_quantity_is_not_resold() {
        let target = engine().compute(&scenario_fills(), 5.0).unwrap();
        assert!((target.exit_quantity - 6.17).abs() < 1e-6);
        assert!((target.total_quantity - 11.17).abs() < 1e-9);
    }

    #[test]
    fn test_cancelled_live_order_is_replaced_by_placement() {
        let engine = engine();
        let target = engine.compute(&scenario_fills(), 0.0).unwrap();
        let mut stale = live_tp(&target);
        stale.status = OrderStatus::Cancelled;
        assert_eq!(engine.decide(Some(&stale), target), TakeProfitAction::Place(target));
    }
}
