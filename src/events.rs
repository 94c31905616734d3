//! Cycle notifications
//!
//! The coordinator reports what happened to a symbol through an
//! [`EventSink`]. Delivery is best-effort and never fails the cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CycleEventKind {
    GridPlaced {
        reference_price: f64,
        placed_levels: usize,
        rejected_levels: usize,
    },
    OrderFilled {
        order_id: String,
        grid_level: Option<u32>,
        filled_quantity: f64,
        fill_price: f64,
    },
    TakeProfitPlaced {
        order_id: String,
        price: f64,
        quantity: f64,
        average_price: f64,
    },
    TakeProfitFilled {
        order_id: String,
        price: f64,
        quantity: f64,
        realized_pnl: f64,
    },
    CycleRestarted,
    CycleRecovered {
        open_orders: usize,
    },
    CycleStopped {
        reason: String,
    },
    FatalError {
        category: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleEvent {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub cycle_id: String,
    #[serde(flatten)]
    pub kind: CycleEventKind,
}

impl CycleEvent {
    pub fn new(symbol: &str, cycle_id: &str, kind: CycleEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            cycle_id: cycle_id.to_string(),
            kind,
        }
    }

    pub fn level(&self) -> EventLevel {
        match self.kind {
            CycleEventKind::FatalError { .. } => EventLevel::Critical,
            CycleEventKind::CycleStopped { .. } | CycleEventKind::CycleRecovered { .. } => EventLevel::Warning,
            _ => EventLevel::Info,
        }
    }

    fn summary(&self) -> String {
        match &self.kind {
            CycleEventKind::GridPlaced { reference_price, placed_levels, rejected_levels } => format!(
                "🧱 {} grid placed at {:.5}: {} levels ({} rejected)",
                self.symbol, reference_price, placed_levels, rejected_levels
            ),
            CycleEventKind::OrderFilled { grid_level, filled_quantity, fill_price, .. } => format!(
                "✅ {} level {:?} filled {:.5} @ {:.5}",
                self.symbol, grid_level, filled_quantity, fill_price
            ),
            CycleEventKind::TakeProfitPlaced { price, quantity, average_price, .. } => format!(
                "🎯 {} take-profit {:.5} @ {:.5} (avg entry {:.5})",
                self.symbol, quantity, price, average_price
            ),
            CycleEventKind::TakeProfitFilled { price, quantity, realized_pnl, .. } => format!(
                "💰 {} take-profit filled {:.5} @ {:.5}, pnl {:.4}",
                self.symbol, quantity, price, realized_pnl
            ),
            CycleEventKind::CycleRestarted => format!("🔄 {} new cycle", self.symbol),
            CycleEventKind::CycleRecovered { open_orders } => format!(
                "🩹 {} recovered cycle with {} open orders",
                self.symbol, open_orders
            ),
            CycleEventKind::CycleStopped { reason } => format!("🛑 {} stopped: {}", self.symbol, reason),
            CycleEventKind::FatalError { category, message } => format!(
                "❌ {} fatal {} error: {}",
                self.symbol, category, message
            ),
        }
    }
}

/// Notification boundary
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CycleEvent);
}

/// Writes every event to the tracing log, optionally as JSON
#[derive(Debug, Default, Clone)]
pub struct LogSink {
    pub json: bool,
}

impl LogSink {
    pub fn new(json: bool) -> Self {
        Self { json }
    }
}

impl EventSink for LogSink {
    fn emit(&self, event: CycleEvent) {
        let line = if self.json {
            serde_json::to_string(&event).unwrap_or_else(|_| event.summary())
        } else {
            event.summary()
        };

        match event.level() {
            EventLevel::Info => info!("{}", line),
            EventLevel::Warning => warn!("{}", line),
            EventLevel::Critical => error!("{}", line),
        }
    }
}

/// Forwards events to an async consumer
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<CycleEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: CycleEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

/// Bounded in-memory history
#[derive(Debug)]
pub struct MemorySink {
    history: Mutex<VecDeque<CycleEvent>>,
    capacity: usize,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn events(&self) -> Vec<CycleEvent> {
        match self.history.lock() {
            Ok(history) => history.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn count(&self, matches: impl Fn(&CycleEventKind) -> bool) -> usize {
        self.events().iter().filter(|e| matches(&e.kind)).count()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: CycleEvent) {
        let mut history = match self.history.lock() {
            Ok(history) => history,
            Err(poisoned) => poisoned.into_inner(),
        };
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(event);
    }
}

/// Fan out to several sinks
pub struct MultiSink {
    sinks: Vec<std::sync::Arc<dyn EventSink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<std::sync::Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for MultiSink {
    fn emit(&self, event: CycleEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_flat() {
        let event = CycleEvent::new(
            "XRPUSDT",
            "c1",
            CycleEventKind::TakeProfitFilled {
                order_id: "tp".into(),
                price: 0.478,
                quantity: 11.17,
                realized_pnl: 0.104,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "take_profit_filled");
        assert_eq!(json["symbol"], "XRPUSDT");
        assert_eq!(json["realized_pnl"], 0.104);
    }

    #[test]
    fn test_memory_sink_is_bounded() {
        let sink = MemorySink::new(2);
        for _ in 0..3 {
            sink.emit(CycleEvent::new("XRPUSDT", "c1", CycleEventKind::CycleRestarted));
        }
        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.count(|k| matches!(k, CycleEventKind::CycleRestarted)), 2);
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(CycleEvent::new(
            "XRPUSDT",
            "c1",
            CycleEventKind::CycleStopped { reason: "operator".into() },
        ));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.level(), EventLevel::Warning);
    }
}
