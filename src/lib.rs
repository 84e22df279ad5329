//! # Dynamic Hedge
//!
//! Cross-venue hedge engine. Resting limit orders are placed on a maker venue,
//! every fill is mirrored immediately on a taker venue, and a leverage-driven
//! controller decides whether to open, hold, close or unwind.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `error`: Engine error type
//! - `exchange`: Venue traits, paper venue and Binance futures connector
//! - `strategy`: Order tracking, hedge execution, reconciliation and the phase controller
//! - `risk`: Position ledger and leverage evaluation
//! - `persistence`: SQLite snapshots of statistics and positions
//! - `utils`: Clock abstraction and decimal arithmetic

pub mod config;
pub mod error;
pub mod exchange;
pub mod persistence;
pub mod risk;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use error::{HedgeError, HedgeResult};
pub use strategy::{DynamicHedgeStrategy, Phase};
