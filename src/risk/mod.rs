//! Position bookkeeping and leverage risk.
//!
//! - `ledger`: per-venue positions and the leverage proxy
//! - `evaluator`: pure mapping from a ledger snapshot to the next risk action

mod evaluator;
mod ledger;

pub use evaluator::{evaluate, RiskAction, RiskStatus, RiskThresholds};
pub use ledger::{
    EquitySource, ExchangePositions, FixedEquity, LedgerSnapshot, Position, PositionLedger,
    DUST_NOTIONAL,
};
