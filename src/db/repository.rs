//! Persistence seam used by the order ledger and the CLI

use rusqlite::Connection;
use std::sync::{Arc, Mutex};

use super::{lock, orders, CycleRecord, Database};
use crate::core::types::{Order, TakeProfitOrder};
use crate::error::GridBotResult;

/// Everything the ledger writes, keyed by (symbol, order id).
///
/// Calls are synchronous and short; the coordinator invokes them between
/// venue requests, never while holding a gateway permit.
pub trait OrderRepository: Send + Sync {
    /// Insert or replace an entry order
    fn save_order(&self, order: &Order) -> GridBotResult<()>;
    fn update_order(&self, order: &Order) -> GridBotResult<()>;
    fn find_order(&self, symbol: &str, order_id: &str) -> GridBotResult<Option<Order>>;
    fn list_open_orders(&self, symbol: &str) -> GridBotResult<Vec<Order>>;
    fn list_cycle_orders(&self, symbol: &str, cycle_id: &str) -> GridBotResult<Vec<Order>>;

    /// Insert or replace a take-profit order
    fn save_take_profit(&self, tp: &TakeProfitOrder) -> GridBotResult<()>;
    fn live_take_profit(&self, symbol: &str) -> GridBotResult<Option<TakeProfitOrder>>;
    fn list_cycle_take_profits(&self, symbol: &str, cycle_id: &str) -> GridBotResult<Vec<TakeProfitOrder>>;

    fn record_cycle_start(&self, record: &CycleRecord) -> GridBotResult<()>;
    fn record_cycle_end(&self, record: &CycleRecord) -> GridBotResult<()>;
    fn find_running_cycle(&self, symbol: &str) -> GridBotResult<Option<CycleRecord>>;
    fn list_cycles(&self, symbol: &str, limit: usize) -> GridBotResult<Vec<CycleRecord>>;
    fn total_realized_pnl(&self, symbol: &str) -> GridBotResult<f64>;
}

/// SQLite-backed repository sharing the [`Database`] connection
#[derive(Clone)]
pub struct SqliteOrderRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteOrderRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            conn: db.get_connection(),
        }
    }
}

impl OrderRepository for SqliteOrderRepository {
    fn save_order(&self, order: &Order) -> GridBotResult<()> {
        orders::upsert_order(&*lock(&self.conn)?, order)
    }

    fn update_order(&self, order: &Order) -> GridBotResult<()> {
        let conn = lock(&self.conn)?;
        if orders::update_order_fill(&conn, order)? == 0 {
            // Row missing (e.g. recovered from venue only); write it whole
            orders::upsert_order(&conn, order)?;
        }
        Ok(())
    }

    fn find_order(&self, symbol: &str, order_id: &str) -> GridBotResult<Option<Order>> {
        orders::find_order(&*lock(&self.conn)?, symbol, order_id)
    }

    fn list_open_orders(&self, symbol: &str) -> GridBotResult<Vec<Order>> {
        orders::list_open_orders(&*lock(&self.conn)?, symbol)
    }

    fn list_cycle_orders(&self, symbol: &str, cycle_id: &str) -> GridBotResult<Vec<Order>> {
        orders::list_cycle_orders(&*lock(&self.conn)?, symbol, cycle_id)
    }

    fn save_take_profit(&self, tp: &TakeProfitOrder) -> GridBotResult<()> {
        orders::upsert_take_profit(&*lock(&self.conn)?, tp)
    }

    fn live_take_profit(&self, symbol: &str) -> GridBotResult<Option<TakeProfitOrder>> {
        orders::find_live_take_profit(&*lock(&self.conn)?, symbol)
    }

    fn list_cycle_take_profits(&self, symbol: &str, cycle_id: &str) -> GridBotResult<Vec<TakeProfitOrder>> {
        orders::list_cycle_take_profits(&*lock(&self.conn)?, symbol, cycle_id)
    }

    fn record_cycle_start(&self, record: &CycleRecord) -> GridBotResult<()> {
        record.insert(&*lock(&self.conn)?)
    }

    fn record_cycle_end(&self, record: &CycleRecord) -> GridBotResult<()> {
        record.update(&*lock(&self.conn)?)?;
        Ok(())
    }

    fn find_running_cycle(&self, symbol: &str) -> GridBotResult<Option<CycleRecord>> {
        CycleRecord::find_running(&*lock(&self.conn)?, symbol)
    }

    fn list_cycles(&self, symbol: &str, limit: usize) -> GridBotResult<Vec<CycleRecord>> {
        CycleRecord::list_by_symbol(&*lock(&self.conn)?, symbol, limit)
    }

    fn total_realized_pnl(&self, symbol: &str) -> GridBotResult<f64> {
        CycleRecord::total_realized_pnl(&*lock(&self.conn)?, symbol)
    }
}
