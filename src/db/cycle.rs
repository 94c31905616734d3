//! Cycle history database operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result as SqlResult, Row};
use serde::{Deserialize, Serialize};

use super::{format_ts, parse_opt_ts, parse_ts};
use crate::error::GridBotResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle_id: String,
    pub symbol: String,
    pub reference_price: f64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: CycleStatus,
    pub average_fill_price: Option<f64>,
    pub filled_quantity: f64,
    pub take_profit_price: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CycleStatus {
    Running,
    Completed,
    Stopped,
    Failed,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Running => "RUNNING",
            CycleStatus::Completed => "COMPLETED",
            CycleStatus::Stopped => "STOPPED",
            CycleStatus::Failed => "FAILED",
        }
    }

    fn from_string(s: &str) -> Self {
        match s {
            "COMPLETED" => CycleStatus::Completed,
            "STOPPED" => CycleStatus::Stopped,
            "FAILED" => CycleStatus::Failed,
            _ => CycleStatus::Running,
        }
    }
}

impl CycleRecord {
    /// Create a new running cycle record
    pub fn new(cycle_id: String, symbol: String, reference_price: f64) -> Self {
        CycleRecord {
            cycle_id,
            symbol,
            reference_price,
            started_at: Utc::now(),
            ended_at: None,
            status: CycleStatus::Running,
            average_fill_price: None,
            filled_quantity: 0.0,
            take_profit_price: None,
            realized_pnl: None,
            error_message: None,
        }
    }

    fn from_row(row: &Row) -> SqlResult<Self> {
        Ok(CycleRecord {
            cycle_id: row.get(0)?,
            symbol: row.get(1)?,
            reference_price: row.get(2)?,
            started_at: parse_ts(3, row.get(3)?)?,
            ended_at: parse_opt_ts(4, row.get(4)?)?,
            status: CycleStatus::from_string(&row.get::<_, String>(5)?),
            average_fill_price: row.get(6)?,
            filled_quantity: row.get(7)?,
            take_profit_price: row.get(8)?,
            realized_pnl: row.get(9)?,
            error_message: row.get(10)?,
        })
    }

    pub fn insert(&self, conn: &Connection) -> GridBotResult<()> {
        conn.execute(
            "INSERT OR REPLACE INTO cycles (
                cycle_id, symbol, reference_price, started_at, ended_at, status,
                average_fill_price, filled_quantity, take_profit_price, realized_pnl, error_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                self.cycle_id,
                self.symbol,
                self.reference_price,
                format_ts(&self.started_at),
                self.ended_at.as_ref().map(format_ts),
                self.status.as_str(),
                self.average_fill_price,
                self.filled_quantity,
                self.take_profit_price,
                self.realized_pnl,
                self.error_message,
            ],
        )?;
        Ok(())
    }

    /// Close out a cycle; returns the number of rows touched
    pub fn update(&self, conn: &Connection) -> GridBotResult<usize> {
        let changed = conn.execute(
            "UPDATE cycles SET
                ended_at = ?1, status = ?2, average_fill_price = ?3, filled_quantity = ?4,
                take_profit_price = ?5, realized_pnl = ?6, error_message = ?7
            WHERE cycle_id = ?8",
            params![
                self.ended_at.as_ref().map(format_ts),
                self.status.as_str(),
                self.average_fill_price,
                self.filled_quantity,
                self.take_profit_price,
                self.realized_pnl,
                self.error_message,
                self.cycle_id,
            ],
        )?;
        Ok(changed)
    }

    pub fn find_by_id(conn: &Connection, cycle_id: &str) -> GridBotResult<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT cycle_id, symbol, reference_price, started_at, ended_at, status,
                    average_fill_price, filled_quantity, take_profit_price, realized_pnl, error_message
             FROM cycles WHERE cycle_id = ?1",
        )?;

        let mut rows = stmt.query(params![cycle_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Newest first
    pub fn list_by_symbol(conn: &Connection, symbol: &str, limit: usize) -> GridBotResult<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT cycle_id, symbol, reference_price, started_at, ended_at, status,
                    average_fill_price, filled_quantity, take_profit_price, realized_pnl, error_message
             FROM cycles
             WHERE symbol = ?1
             ORDER BY started_at DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![symbol, limit as i64], Self::from_row)?;
        Ok(rows.collect::<SqlResult<Vec<_>>>()?)
    }

    /// The cycle a crashed process left in RUNNING state, if any
    pub fn find_running(conn: &Connection, symbol: &str) -> GridBotResult<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT cycle_id, symbol, reference_price, started_at, ended_at, status,
                    average_fill_price, filled_quantity, take_profit_price, realized_pnl, error_message
             FROM cycles
             WHERE symbol = ?1 AND status = 'RUNNING'
             ORDER BY started_at DESC
             LIMIT 1",
        )?;

        let mut rows = stmt.query(params![symbol])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Sum of realized PnL over completed cycles
    pub fn total_realized_pnl(conn: &Connection, symbol: &str) -> GridBotResult<f64> {
        let total: Option<f64> = conn.query_row(
            "SELECT SUM(realized_pnl) FROM cycles WHERE symbol = ?1 AND status = 'COMPLETED'",
            params![symbol],
            |row| row.get(0),
        )?;
        Ok(total.unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_cycle_history() {
        let db = Database::new_in_memory().unwrap();
        db.run_migrations().unwrap();
        let conn = db.get_connection();
        let conn = conn.lock().unwrap();

        let mut record = CycleRecord::new("cycle-1".to_string(), "XRPUSDT".to_string(), 0.5);
        record.insert(&conn).unwrap();

        let running = CycleRecord::find_running(&conn, "XRPUSDT").unwrap().unwrap();
        assert_eq!(running.cycle_id, "cycle-1");
        assert_eq!(running.status, CycleStatus::Running);

        record.status = CycleStatus::Completed;
        record.ended_at = Some(Utc::now());
        record.realized_pnl = Some(0.104);
        assert_eq!(record.update(&conn).unwrap(), 1);

        assert!(CycleRecord::find_running(&conn, "XRPUSDT").unwrap().is_none());
        let loaded = CycleRecord::find_by_id(&conn, "cycle-1").unwrap().unwrap();
        assert_eq!(loaded.status, CycleStatus::Completed);
        assert!((CycleRecord::total_realized_pnl(&conn, "XRPUSDT").unwrap() - 0.104).abs() < 1e-12);
    }

    #[test]
    fn test_list_by_symbol_is_newest_first() {
        let db = Database::new_in_memory().unwrap();
        db.run_migrations().unwrap();
        let conn = db.get_connection();
        let conn = conn.lock().unwrap();

        let mut older = CycleRecord::new("a".to_string(), "XRPUSDT".to_string(), 0.5);
        older.started_at = Utc::now() - chrono::Duration::minutes(5);
        older.insert(&conn).unwrap();
        CycleRecord::new("b".to_string(), "XRPUSDT".to_string(), 0.49)
            .insert(&conn)
            .unwrap();
        CycleRecord::new("c".to_string(), "BTCUSDT".to_string(), 60000.0)
            .insert(&conn)
            .unwrap();

        let cycles = CycleRecord::list_by_symbol(&conn, "XRPUSDT", 10).unwrap();
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0].cycle_id, "b");
        assert_eq!(CycleRecord::total_realized_pnl(&conn, "BTCUSDT").unwrap(), 0.0);
    }
}
