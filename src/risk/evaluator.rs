//! Leverage-based risk evaluation.
//!
//! [`evaluate`] is a pure function of a ledger snapshot, the thresholds, the
//! moment the engine first hit the leverage limit and the current time.
//! Checks run in priority order:
//! 1. emergency leverage reached → unwind everything
//! 2. max leverage reached → stop opening, escalate to closing after the stop duration
//! 3. everything flat → ready to reopen
//! 4. otherwise keep opening

use super::ledger::LedgerSnapshot;
use crate::config::RiskConfig;
use crate::exchange::VenueId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// What the control loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskAction {
    ContinueOpening,
    StopOpening,
    StartClosing,
    EmergencyClose,
}

impl fmt::Display for RiskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskAction::ContinueOpening => "CONTINUE_OPENING",
            RiskAction::StopOpening => "STOP_OPENING",
            RiskAction::StartClosing => "START_CLOSING",
            RiskAction::EmergencyClose => "EMERGENCY_CLOSE",
        };
        f.write_str(s)
    }
}

/// Thresholds the evaluator compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskThresholds {
    pub max_leverage: Decimal,
    pub emergency_leverage: Decimal,
    pub stop_duration: Duration,
}

impl From<&RiskConfig> for RiskThresholds {
    fn from(config: &RiskConfig) -> Self {
        Self {
            max_leverage: config.max_leverage,
            emergency_leverage: config.emergency_leverage,
            stop_duration: config.stop_duration(),
        }
    }
}

/// Outcome of one risk evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskStatus {
    pub action: RiskAction,
    pub leverage_by_venue: BTreeMap<VenueId, Decimal>,
    pub max_leverage: Decimal,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl RiskStatus {
    pub fn leverage(&self, venue: VenueId) -> Decimal {
        self.leverage_by_venue.get(&venue).copied().unwrap_or_default()
    }
}

/// Decide the next action from a snapshot.
///
/// `stopped_since` is when the engine first observed leverage at or above
/// the limit in the current streak.
pub fn evaluate(
    snapshot: &LedgerSnapshot,
    thresholds: &RiskThresholds,
    stopped_since: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> RiskStatus {
    let leverage_by_venue: BTreeMap<VenueId, Decimal> = VenueId::ALL
        .iter()
        .map(|venue| (*venue, snapshot.leverage(*venue)))
        .collect();
    let max_leverage = leverage_by_venue
        .values()
        .copied()
        .max()
        .unwrap_or_default();

    let (action, reason) = if max_leverage >= thresholds.emergency_leverage {
        (
            RiskAction::EmergencyClose,
            format!(
                "leverage {:.2} reached emergency threshold {}",
                max_leverage, thresholds.emergency_leverage
            ),
        )
    } else if max_leverage >= thresholds.max_leverage {
        let waited = stopped_since
            .and_then(|since| (now - since).to_std().ok())
            .unwrap_or_default();
        if stopped_since.is_some() && waited >= thresholds.stop_duration {
            (
                RiskAction::StartClosing,
                format!(
                    "leverage {:.2} held at limit {} for {}s",
                    max_leverage,
                    thresholds.max_leverage,
                    waited.as_secs()
                ),
            )
        } else {
            (
                RiskAction::StopOpening,
                format!(
                    "leverage {:.2} reached limit {}",
                    max_leverage, thresholds.max_leverage
                ),
            )
        }
    } else if snapshot.all_positions_zero() {
        (RiskAction::ContinueOpening, "ready to reopen".to_string())
    } else {
        (RiskAction::ContinueOpening, "normal".to_string())
    };

    RiskStatus {
        action,
        leverage_by_venue,
        max_leverage,
        reason,
        timestamp: now,
    }
}
