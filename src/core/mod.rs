// Core cycle logic modules

pub mod types;
pub mod grid_planner;
pub mod take_profit;
pub mod ledger;
pub mod coordinator;

// Re-export commonly used types
pub use types::{
    CyclePhase, CycleState, Fill, GridLevel, MarginMode, Order, OrderKind, OrderSide, OrderStatus,
    TakeProfitOrder, VenuePrecision,
};
pub use grid_planner::{GridConfig, GridPlan, GridPlanner, GridStatistics};
pub use take_profit::{TakeProfitAction, TakeProfitEngine, TakeProfitTarget};
pub use ledger::{FillUpdate, OrderLedger};
pub use coordinator::{CycleCoordinator, CycleOutcome};
