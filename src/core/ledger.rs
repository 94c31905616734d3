// Authoritative per-symbol order record

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::types::{
    CyclePhase, CycleState, Fill, GridLevel, Order, OrderSide, OrderStatus, TakeProfitOrder,
};
use crate::core::take_profit::TakeProfitTarget;
use crate::db::OrderRepository;
use crate::error::{GridBotError, GridBotResult};
use crate::exchange::OrderStatusReport;

/// Fill progress observed on one entry order during a poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillUpdate {
    /// Quantity filled since the previous observation
    pub newly_filled: f64,
    pub status: OrderStatus,
    pub fill_price: f64,
}

/// Orders of one symbol-cycle. Owned by exactly one coordinator; every
/// mutation is written through to the repository before it returns.
pub struct OrderLedger {
    symbol: String,
    cycle_id: String,
    orders: Vec<Order>,
    take_profit: Option<TakeProfitOrder>,
    /// Quantity sold by take-profit orders that were later superseded
    exited_quantity: f64,
    /// Σ price × filled over those superseded orders
    exited_proceeds: f64,
    repo: Arc<dyn OrderRepository>,
}

impl OrderLedger {
    pub fn new(symbol: &str, cycle_id: &str, repo: Arc<dyn OrderRepository>) -> Self {
        Self {
            symbol: symbol.to_string(),
            cycle_id: cycle_id.to_string(),
            orders: Vec::new(),
            take_profit: None,
            exited_quantity: 0.0,
            exited_proceeds: 0.0,
            repo,
        }
    }

    /// Rebuild the ledger of an interrupted cycle from persisted rows.
    /// Returns None when the symbol has nothing live.
    pub fn restore(symbol: &str, repo: Arc<dyn OrderRepository>) -> GridBotResult<Option<Self>> {
        let open = repo.list_open_orders(symbol)?;
        let live_tp = repo.live_take_profit(symbol)?;

        let cycle_id = match (open.first(), live_tp.as_ref()) {
            (_, Some(tp)) => tp.cycle_id.clone(),
            (Some(order), None) => order.cycle_id.clone(),
            (None, None) => return Ok(None),
        };

        let orders = repo.list_cycle_orders(symbol, &cycle_id)?;
        let retired: Vec<TakeProfitOrder> = repo
            .list_cycle_take_profits(symbol, &cycle_id)?
            .into_iter()
            .filter(|tp| !tp.is_live())
            .collect();
        let exited_quantity = retired.iter().map(|tp| tp.filled_quantity).sum();
        let exited_proceeds = retired.iter().map(|tp| tp.filled_quantity * tp.price).sum();

        Ok(Some(Self {
            symbol: symbol.to_string(),
            cycle_id,
            orders,
            take_profit: live_tp,
            exited_quantity,
            exited_proceeds,
            repo,
        }))
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn cycle_id(&self) -> &str {
        &self.cycle_id
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn order(&self, order_id: &str) -> Option<&Order> {
        self.orders.iter().find(|o| o.order_id == order_id)
    }

    /// Record an order the venue acknowledged
    pub fn record_placed(&mut self, order_id: String, level: &GridLevel) -> GridBotResult<()> {
        let order = self.entry_order(order_id, level, OrderStatus::Pending, None);
        self.repo.save_order(&order)?;
        debug!("📝 {} level {} placed as {}", self.symbol, level.index, order.order_id);
        self.orders.push(order);
        Ok(())
    }

    /// Record a level the venue refused; it is never tracked
    pub fn record_rejected(&mut self, level: &GridLevel, reason: &str) -> GridBotResult<()> {
        let order_id = format!("rejected-{}-{}", self.cycle_id, level.index);
        let order = self.entry_order(order_id, level, OrderStatus::Rejected, Some(reason.to_string()));
        self.repo.save_order(&order)?;
        self.orders.push(order);
        Ok(())
    }

    fn entry_order(&self, order_id: String, level: &GridLevel, status: OrderStatus, reason: Option<String>) -> Order {
        Order {
            order_id,
            cycle_id: self.cycle_id.clone(),
            symbol: self.symbol.clone(),
            side: OrderSide::Buy,
            kind: level.kind,
            price: level.target_price,
            requested_quantity: level.quantity,
            filled_quantity: 0.0,
            average_fill_price: None,
            status,
            grid_level: Some(level.index),
            created_at: Utc::now(),
            filled_at: None,
            reject_reason: reason,
        }
    }

    /// Reconcile one entry order with the venue's report. Terminal orders
    /// are never touched again; contradictions are logged and the venue
    /// view wins.
    pub fn apply_report(&mut self, order_id: &str, report: &OrderStatusReport) -> GridBotResult<Option<FillUpdate>> {
        let symbol = self.symbol.clone();
        let order = self
            .orders
            .iter_mut()
            .find(|o| o.order_id == order_id)
            .ok_or_else(|| GridBotError::Internal(format!("{} has no order {}", symbol, order_id)))?;

        if order.is_terminal() {
            return Ok(None);
        }

        if report.filled_quantity + 1e-12 < order.filled_quantity {
            let err = GridBotError::LedgerInconsistency {
                order_id: order_id.to_string(),
                detail: format!(
                    "venue fill {} below recorded {}",
                    report.filled_quantity, order.filled_quantity
                ),
            };
            warn!("⚠️  {}: {}", symbol, err);
        }
        if report.filled_quantity > order.requested_quantity + 1e-9 {
            let err = GridBotError::LedgerInconsistency {
                order_id: order_id.to_string(),
                detail: format!(
                    "venue fill {} above requested {}",
                    report.filled_quantity, order.requested_quantity
                ),
            };
            warn!("⚠️  {}: {}", symbol, err);
        }

        let status = match report.status {
            OrderStatus::Pending if report.filled_quantity > 0.0 => OrderStatus::PartiallyFilled,
            other => other,
        };

        let fill_changed = (report.filled_quantity - order.filled_quantity).abs() > 1e-12;
        let price_changed = report.average_price.is_some() && report.average_price != order.average_fill_price;
        if !fill_changed && !price_changed && status == order.status {
            return Ok(None);
        }

        let newly_filled = report.filled_quantity - order.filled_quantity;
        order.filled_quantity = report.filled_quantity;
        if report.average_price.is_some() {
            order.average_fill_price = report.average_price;
        }
        order.status = status;
        if status == OrderStatus::Filled && order.filled_at.is_none() {
            order.filled_at = Some(Utc::now());
        }

        self.repo.update_order(order)?;
        Ok(Some(FillUpdate {
            newly_filled,
            status,
            fill_price: order.fill_price(),
        }))
    }

    /// Mark an entry order cancelled unless it already reached a terminal state
    pub fn mark_cancelled(&mut self, order_id: &str) -> GridBotResult<()> {
        if let Some(order) = self.orders.iter_mut().find(|o| o.order_id == order_id) {
            if !order.is_terminal() {
                order.status = OrderStatus::Cancelled;
                self.repo.update_order(order)?;
            }
        }
        Ok(())
    }

    /// Entry orders still working at the venue
    pub fn open_entries(&self) -> Vec<&Order> {
        self.orders.iter().filter(|o| !o.is_terminal()).collect()
    }

    /// Every entry fill, including partial fills of orders cancelled later
    pub fn fills(&self) -> Vec<Fill> {
        self.orders
            .iter()
            .filter(|o| o.filled_quantity > 0.0)
            .map(|o| Fill {
                quantity: o.filled_quantity,
                price: o.fill_price(),
            })
            .collect()
    }

    pub fn total_filled_quantity(&self) -> f64 {
        self.orders.iter().map(|o| o.filled_quantity).sum()
    }

    /// Quantity-weighted mean entry price, rebuilt from all fills
    pub fn average_fill_price(&self) -> Option<f64> {
        let fills = self.fills();
        let quantity: f64 = fills.iter().map(|f| f.quantity).sum();
        if quantity <= 0.0 {
            return None;
        }
        let cost: f64 = fills.iter().map(|f| f.quantity * f.price).sum();
        Some(cost / quantity)
    }

    pub fn take_profit(&self) -> Option<&TakeProfitOrder> {
        self.take_profit.as_ref()
    }

    pub fn live_take_profit(&self) -> Option<&TakeProfitOrder> {
        self.take_profit.as_ref().filter(|tp| tp.is_live())
    }

    /// Quantity sold by superseded exits
    pub fn exited_quantity(&self) -> f64 {
        self.exited_quantity
    }

    /// Install a freshly placed take-profit. Any previous one must have
    /// been retired first.
    pub fn set_take_profit(&mut self, order_id: String, target: &TakeProfitTarget) -> GridBotResult<()> {
        if let Some(previous) = self.live_take_profit() {
            return Err(GridBotError::Internal(format!(
                "{} already has live take-profit {}",
                self.symbol, previous.order_id
            )));
        }

        let tp = TakeProfitOrder {
            order_id,
            cycle_id: self.cycle_id.clone(),
            symbol: self.symbol.clone(),
            price: target.price,
            quantity: target.exit_quantity,
            filled_quantity: 0.0,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            filled_at: None,
        };
        self.repo.save_take_profit(&tp)?;
        self.take_profit = Some(tp);
        Ok(())
    }

    /// Retire the live take-profit after a cancel; whatever it sold before
    /// the cancel counts as exited
    pub fn retire_take_profit(&mut self, filled_quantity: Option<f64>) -> GridBotResult<()> {
        let Some(tp) = self.take_profit.as_mut() else {
            return Ok(());
        };
        if let Some(filled) = filled_quantity {
            tp.filled_quantity = filled.max(tp.filled_quantity);
        }
        if tp.is_live() {
            tp.status = OrderStatus::Cancelled;
        }
        self.exited_quantity += tp.filled_quantity;
        self.exited_proceeds += tp.filled_quantity * tp.price;
        self.repo.save_take_profit(tp)?;
        Ok(())
    }

    /// Exit proceeds minus entry cost of the sold quantity, fees excluded
    pub fn realized_pnl(&self) -> f64 {
        let Some(average) = self.average_fill_price() else {
            return 0.0;
        };
        let (live_quantity, live_proceeds) = match self.take_profit.as_ref() {
            Some(tp) if tp.status != OrderStatus::Cancelled => (tp.filled_quantity, tp.filled_quantity * tp.price),
            _ => (0.0, 0.0),
        };
        let sold = self.exited_quantity + live_quantity;
        self.exited_proceeds + live_proceeds - average * sold
    }

    /// Reconcile the take-profit with the venue; returns its new status
    pub fn apply_take_profit_report(&mut self, report: &OrderStatusReport) -> GridBotResult<Option<OrderStatus>> {
        let Some(tp) = self.take_profit.as_mut() else {
            return Ok(None);
        };
        if !tp.is_live() {
            return Ok(Some(tp.status));
        }

        let status = match report.status {
            OrderStatus::Pending if report.filled_quantity > 0.0 => OrderStatus::PartiallyFilled,
            other => other,
        };
        if status == tp.status && (report.filled_quantity - tp.filled_quantity).abs() <= 1e-12 {
            return Ok(Some(status));
        }

        tp.filled_quantity = report.filled_quantity;
        tp.status = status;
        if status == OrderStatus::Filled {
            tp.filled_at = Some(Utc::now());
        }
        self.repo.save_take_profit(tp)?;
        Ok(Some(status))
    }

    pub fn snapshot(&self, phase: CyclePhase) -> CycleState {
        CycleState {
            symbol: self.symbol.clone(),
            cycle_id: self.cycle_id.clone(),
            phase,
            orders: self.orders.clone(),
            take_profit: self.take_profit.clone(),
            average_fill_price: self.average_fill_price(),
            total_filled_quantity: self.total_filled_quantity(),
        }
    }

    pub fn placed_count(&self) -> usize {
        self.orders
            .iter()
            .filter(|o| o.status != OrderStatus::Rejected)
            .count()
    }

    pub fn rejected_count(&self) -> usize {
        self.orders.len() - self.placed_count()
    }
}
