// Martingale Grid Bot Library
//
// Runs an independent buy-side martingale grid per symbol with an aggregate
// take-profit exit, restarting a fresh cycle after every exit

pub mod core;
pub mod clients;
pub mod config;
pub mod db;          // SQLite order and cycle history
pub mod error;       // Unified error handling
pub mod events;      // Cycle notifications
pub mod exchange;    // Venue trait, gateway and paper venue
pub mod scheduler;   // One task per symbol

// Re-export core cycle types
pub use core::{
    CycleCoordinator, CycleOutcome, CyclePhase, CycleState, Fill, GridConfig, GridLevel, GridPlan,
    GridPlanner, GridStatistics, MarginMode, Order, OrderKind, OrderLedger, OrderSide, OrderStatus,
    TakeProfitAction, TakeProfitEngine, TakeProfitOrder, TakeProfitTarget, VenuePrecision,
};

// Re-export error types
pub use error::{GridBotError, GridBotResult};

// Re-export client types
pub use clients::{RestTickerClient, DEFAULT_TICKER_URL};

// Re-export configuration
pub use config::{Config, DatabaseConfig, ExchangeConfig, LoggingConfig, StrategyConfig};

// Re-export database types
pub use db::{CycleRecord, CycleStatus, Database, OrderRepository, SqliteOrderRepository};

// Re-export venue and scheduling components
pub use events::{ChannelSink, CycleEvent, CycleEventKind, EventLevel, EventSink, LogSink, MemorySink, MultiSink};
pub use exchange::{
    CancelOutcome, Exchange, ExchangeGateway, GatewayStats, OrderRequest, OrderStatusReport, PaperExchange,
    RateLimiter, RetryPolicy, VenueError, VenueResult,
};
pub use scheduler::Scheduler;
