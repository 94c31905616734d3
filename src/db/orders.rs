//! Entry and take-profit order rows

use rusqlite::{params, Connection, Row};

use super::{format_ts, parse_opt_ts, parse_ts};
use crate::core::types::{Order, OrderKind, OrderSide, OrderStatus, TakeProfitOrder};
use crate::error::GridBotResult;

const ORDER_COLUMNS: &str = "symbol, order_id, cycle_id, side, kind, price, requested_quantity,
    filled_quantity, average_fill_price, status, grid_level, created_at, filled_at, reject_reason";

const TAKE_PROFIT_COLUMNS: &str =
    "symbol, order_id, cycle_id, price, quantity, filled_quantity, status, created_at, filled_at";

fn order_from_row(row: &Row) -> rusqlite::Result<Order> {
    Ok(Order {
        symbol: row.get(0)?,
        order_id: row.get(1)?,
        cycle_id: row.get(2)?,
        side: OrderSide::from_str_lossy(&row.get::<_, String>(3)?),
        kind: OrderKind::from_str_lossy(&row.get::<_, String>(4)?),
        price: row.get(5)?,
        requested_quantity: row.get(6)?,
        filled_quantity: row.get(7)?,
        average_fill_price: row.get(8)?,
        status: OrderStatus::from_str_lossy(&row.get::<_, String>(9)?),
        grid_level: row.get(10)?,
        created_at: parse_ts(11, row.get(11)?)?,
        filled_at: parse_opt_ts(12, row.get(12)?)?,
        reject_reason: row.get(13)?,
    })
}

fn take_profit_from_row(row: &Row) -> rusqlite::Result<TakeProfitOrder> {
    Ok(TakeProfitOrder {
        symbol: row.get(0)?,
        order_id: row.get(1)?,
        cycle_id: row.get(2)?,
        price: row.get(3)?,
        quantity: row.get(4)?,
        filled_quantity: row.get(5)?,
        status: OrderStatus::from_str_lossy(&row.get::<_, String>(6)?),
        created_at: parse_ts(7, row.get(7)?)?,
        filled_at: parse_opt_ts(8, row.get(8)?)?,
    })
}

/// Insert or replace an entry order
pub fn upsert_order(conn: &Connection, order: &Order) -> GridBotResult<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO orders ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            ORDER_COLUMNS
        ),
        params![
            order.symbol,
            order.order_id,
            order.cycle_id,
            order.side.as_str(),
            order.kind.as_str(),
            order.price,
            order.requested_quantity,
            order.filled_quantity,
            order.average_fill_price,
            order.status.as_str(),
            order.grid_level,
            format_ts(&order.created_at),
            order.filled_at.as_ref().map(format_ts),
            order.reject_reason,
        ],
    )?;
    Ok(())
}

/// Update the mutable fill state of an entry order
pub fn update_order_fill(conn: &Connection, order: &Order) -> GridBotResult<usize> {
    let changed = conn.execute(
        "UPDATE orders SET filled_quantity = ?1, average_fill_price = ?2, status = ?3, filled_at = ?4
         WHERE symbol = ?5 AND order_id = ?6",
        params![
            order.filled_quantity,
            order.average_fill_price,
            order.status.as_str(),
            order.filled_at.as_ref().map(format_ts),
            order.symbol,
            order.order_id,
        ],
    )?;
    Ok(changed)
}

pub fn find_order(conn: &Connection, symbol: &str, order_id: &str) -> GridBotResult<Option<Order>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM orders WHERE symbol = ?1 AND order_id = ?2",
        ORDER_COLUMNS
    ))?;

    let mut rows = stmt.query(params![symbol, order_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(order_from_row(row)?)),
        None => Ok(None),
    }
}

/// Entry orders still Pending or PartiallyFilled
pub fn list_open_orders(conn: &Connection, symbol: &str) -> GridBotResult<Vec<Order>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM orders
         WHERE symbol = ?1 AND status IN ('PENDING', 'PARTIALLY_FILLED')
         ORDER BY grid_level ASC",
        ORDER_COLUMNS
    ))?;

    let rows = stmt.query_map(params![symbol], order_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn list_cycle_orders(conn: &Connection, symbol: &str, cycle_id: &str) -> GridBotResult<Vec<Order>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM orders WHERE symbol = ?1 AND cycle_id = ?2 ORDER BY grid_level ASC",
        ORDER_COLUMNS
    ))?;

    let rows = stmt.query_map(params![symbol, cycle_id], order_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn upsert_take_profit(conn: &Connection, tp: &TakeProfitOrder) -> GridBotResult<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO take_profit_orders ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            TAKE_PROFIT_COLUMNS
        ),
        params![
            tp.symbol,
            tp.order_id,
            tp.cycle_id,
            tp.price,
            tp.quantity,
            tp.filled_quantity,
            tp.status.as_str(),
            format_ts(&tp.created_at),
            tp.filled_at.as_ref().map(format_ts),
        ],
    )?;
    Ok(())
}

/// Most recent non-terminal take-profit for a symbol
pub fn find_live_take_profit(conn: &Connection, symbol: &str) -> GridBotResult<Option<TakeProfitOrder>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM take_profit_orders
         WHERE symbol = ?1 AND status IN ('PENDING', 'PARTIALLY_FILLED')
         ORDER BY created_at DESC LIMIT 1",
        TAKE_PROFIT_COLUMNS
    ))?;

    let mut rows = stmt.query(params![symbol])?;
    match rows.next()? {
        Some(row) => Ok(Some(take_profit_from_row(row)?)),
        None => Ok(None),
    }
}

pub fn list_cycle_take_profits(
    conn: &Connection,
    symbol: &str,
    cycle_id: &str,
) -> GridBotResult<Vec<TakeProfitOrder>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM take_profit_orders WHERE symbol = ?1 AND cycle_id = ?2 ORDER BY created_at ASC",
        TAKE_PROFIT_COLUMNS
    ))?;

    let rows = stmt.query_map(params![symbol, cycle_id], take_profit_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::Utc;

    fn sample_order(order_id: &str, level: u32) -> Order {
        Order {
            order_id: order_id.to_string(),
            cycle_id: "cycle-1".to_string(),
            symbol: "XRPUSDT".to_string(),
            side: OrderSide::Buy,
            kind: OrderKind::Limit,
            price: 0.486,
            requested_quantity: 2.8,
            filled_quantity: 0.0,
            average_fill_price: None,
            status: OrderStatus::Pending,
            grid_level: Some(level),
            created_at: Utc::now(),
            filled_at: None,
            reject_reason: None,
        }
    }

    #[test]
    fn test_order_crud() {
        let db = Database::new_in_memory().unwrap();
        db.run_migrations().unwrap();
        let conn = db.get_connection();
        let conn = conn.lock().unwrap();

        upsert_order(&conn, &sample_order("a", 0)).unwrap();
        upsert_order(&conn, &sample_order("b", 1)).unwrap();

        let mut filled = find_order(&conn, "XRPUSDT", "a").unwrap().unwrap();
        assert_eq!(filled.grid_level, Some(0));
        filled.filled_quantity = 2.8;
        filled.status = OrderStatus::Filled;
        filled.filled_at = Some(Utc::now());
        assert_eq!(update_order_fill(&conn, &filled).unwrap(), 1);

        let open = list_open_orders(&conn, "XRPUSDT").unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].order_id, "b");

        let cycle = list_cycle_orders(&conn, "XRPUSDT", "cycle-1").unwrap();
        assert_eq!(cycle.len(), 2);
        assert_eq!(cycle[0].status, OrderStatus::Filled);
        assert!(find_order(&conn, "BTCUSDT", "a").unwrap().is_none());
    }

    #[test]
    fn test_live_take_profit_lookup() {
        let db = Database::new_in_memory().unwrap();
        db.run_migrations().unwrap();
        let conn = db.get_connection();
        let conn = conn.lock().unwrap();

        let mut tp = TakeProfitOrder {
            order_id: "tp-1".to_string(),
            cycle_id: "cycle-1".to_string(),
            symbol: "XRPUSDT".to_string(),
            price: 0.478,
            quantity: 11.17,
            filled_quantity: 0.0,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            filled_at: None,
        };
        upsert_take_profit(&conn, &tp).unwrap();
        assert_eq!(find_live_take_profit(&conn, "XRPUSDT").unwrap().unwrap().order_id, "tp-1");

        tp.status = OrderStatus::Cancelled;
        upsert_take_profit(&conn, &tp).unwrap();
        assert!(find_live_take_profit(&conn, "XRPUSDT").unwrap().is_none());
        assert_eq!(list_cycle_take_profits(&conn, "XRPUSDT", "cycle-1").unwrap().len(), 1);
    }
}
