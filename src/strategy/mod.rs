//! Hedge strategy implementation.
//!
//! Contains the core logic for:
//! - Tracking resting maker orders and hedging their fills on the taker venue
//! - Opening and closing positions one maker order at a time
//! - Reconciling drift between the two venues
//! - The leverage-driven phase controller and its statistics

mod closing;
mod controller;
mod hedge;
mod opening;
mod orders;
mod reconciler;
mod retry;
mod stats;
mod tracker;

pub use closing::{select_closing, ClosingManager, UnwindReport};
pub use controller::{DynamicHedgeStrategy, Phase};
pub use hedge::{
    ExecutionContext, ExecutionStats, HedgeExecutor, HedgeRequest, LatencyHistogram,
};
pub use opening::{select_opening, OpeningManager};
pub use orders::{ActiveOrder, OrderKey, OrderRegistry, StatusUpdate};
pub use reconciler::{
    analyze, BalanceReconciler, HedgeBalanceStatus, PositionImbalance, ReconcileReport,
};
pub use retry::{Backoff, RetryPolicy};
pub use stats::{StatsAggregator, TradeKind, TradingStats};
pub use tracker::{OrderLifecycleTracker, TrackerTick};
