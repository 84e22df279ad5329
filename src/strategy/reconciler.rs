//! Cross-venue balance reconciliation.
//!
//! Per instrument the taker venue should hold the inverse of the maker venue
//! at roughly equal notional. Missed or partial hedges leave drift behind;
//! this module measures it and tops up the lighter side with immediate
//! orders.

use crate::config::{BalanceConfig, InstrumentConfig, TradingConfig};
use crate::error::HedgeResult;
use crate::exchange::{OrderSide, VenueId, Venues};
use crate::risk::PositionLedger;
use crate::utils::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Drift between the two venues for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionImbalance {
    pub symbol: String,
    pub taker_exposure: Decimal,
    pub maker_exposure: Decimal,
    /// Mean of both absolute exposures
    pub expected_balance: Decimal,
    /// |taker| - |maker|
    pub delta: Decimal,
    pub imbalance_percent: Decimal,
    pub needs_adjustment: bool,
    pub adjustment_venue: Option<VenueId>,
    pub adjustment_side: Option<OrderSide>,
    pub adjustment_amount: Decimal,
}

/// Measure drift for `instrument` and decide the corrective order.
pub fn analyze(
    instrument: &InstrumentConfig,
    taker_exposure: Decimal,
    maker_exposure: Decimal,
    config: &BalanceConfig,
) -> PositionImbalance {
    let taker_abs = taker_exposure.abs();
    let maker_abs = maker_exposure.abs();
    let expected_balance = (taker_abs + maker_abs) / Decimal::TWO;
    let delta = taker_abs - maker_abs;
    let imbalance_percent = if expected_balance > Decimal::ZERO {
        delta.abs() / expected_balance * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    };

    let needs_adjustment =
        imbalance_percent > config.tolerance_percent && delta.abs() > config.min_adjust_amount;

    let (adjustment_venue, adjustment_side, adjustment_amount) = if needs_adjustment {
        // The lighter venue grows in the direction it is supposed to hold.
        let (venue, direction) = if taker_abs > maker_abs {
            (VenueId::Maker, instrument.maker_direction)
        } else {
            (VenueId::Taker, instrument.taker_direction())
        };
        (
            Some(venue),
            Some(direction.open_side()),
            delta.abs() / Decimal::TWO,
        )
    } else {
        (None, None, Decimal::ZERO)
    };

    PositionImbalance {
        symbol: instrument.symbol.clone(),
        taker_exposure,
        maker_exposure,
        expected_balance,
        delta,
        imbalance_percent,
        needs_adjustment,
        adjustment_venue,
        adjustment_side,
        adjustment_amount,
    }
}

/// Read-only view of the current balance.
#[derive(Debug, Clone, Serialize)]
pub struct HedgeBalanceStatus {
    pub is_balanced: bool,
    pub imbalances: Vec<PositionImbalance>,
    /// Sum of |delta| over all instruments
    pub total_imbalance_value: Decimal,
    pub checked_at: DateTime<Utc>,
    pub recommendation: String,
}

fn recommend(imbalances: &[PositionImbalance]) -> String {
    let mut text = String::new();
    for imbalance in imbalances.iter().filter(|i| i.needs_adjustment) {
        if let (Some(venue), Some(side)) = (imbalance.adjustment_venue, imbalance.adjustment_side) {
            if !text.is_empty() {
                text.push_str("; ");
            }
            let _ = write!(
                text,
                "{}: {} {} {:.2} ({:.1}% off)",
                imbalance.symbol,
                side,
                venue,
                imbalance.adjustment_amount,
                imbalance.imbalance_percent
            );
        }
    }
    if text.is_empty() {
        "Positions balanced, no action needed".to_string()
    } else {
        text
    }
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Pass skipped because the check interval has not elapsed
    pub throttled: bool,
    pub adjustments: usize,
    pub failed: usize,
}

pub struct BalanceReconciler {
    venues: Venues,
    ledger: Arc<PositionLedger>,
    instruments: Vec<InstrumentConfig>,
    config: BalanceConfig,
    taker_leverage: u32,
    last_run: Mutex<Option<DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
    span: Span,
}

impl BalanceReconciler {
    pub fn new(
        venues: Venues,
        ledger: Arc<PositionLedger>,
        trading: &TradingConfig,
        config: &BalanceConfig,
        taker_leverage: u32,
        clock: Arc<dyn Clock>,
        parent: &Span,
    ) -> Self {
        Self {
            venues,
            ledger,
            instruments: trading.instruments.clone(),
            config: config.clone(),
            taker_leverage,
            last_run: Mutex::new(None),
            clock,
            span: info_span!(parent: parent, "reconciler"),
        }
    }

    fn imbalance(&self, instrument: &InstrumentConfig) -> PositionImbalance {
        let snapshot = self.ledger.snapshot();
        analyze(
            instrument,
            snapshot.taker.exposure(&instrument.symbol),
            snapshot.maker.exposure(&instrument.symbol),
            &self.config,
        )
    }

    /// Current balance without placing orders.
    pub fn check(&self) -> HedgeBalanceStatus {
        let imbalances: Vec<PositionImbalance> =
            self.instruments.iter().map(|i| self.imbalance(i)).collect();
        HedgeBalanceStatus {
            is_balanced: imbalances.iter().all(|i| !i.needs_adjustment),
            total_imbalance_value: imbalances.iter().map(|i| i.delta.abs()).sum(),
            recommendation: recommend(&imbalances),
            imbalances,
            checked_at: self.clock.now(),
        }
    }

    /// Whether a pass is due under the check interval.
    pub fn is_due(&self) -> bool {
        let interval = chrono::Duration::from_std(self.config.check_interval())
            .unwrap_or(chrono::Duration::MAX);
        match *self.last_run.lock() {
            Some(last) => self.clock.now() - last >= interval,
            None => true,
        }
    }

    /// Correct every instrument outside tolerance.
    ///
    /// Unless `force` is set the pass is skipped when the previous one ran
    /// less than the check interval ago.
    pub async fn reconcile(&self, force: bool) -> ReconcileReport {
        if !force && !self.is_due() {
            return ReconcileReport {
                throttled: true,
                ..ReconcileReport::default()
            };
        }
        *self.last_run.lock() = Some(self.clock.now());

        self.reconcile_all().instrument(self.span.clone()).await
    }

    async fn reconcile_all(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for instrument in &self.instruments {
            for round in 1..=self.config.max_rounds {
                let imbalance = self.imbalance(instrument);
                if !imbalance.needs_adjustment {
                    debug!(symbol = %instrument.symbol, pct = %imbalance.imbalance_percent.round_dp(2), "Within tolerance");
                    break;
                }

                match self.adjust(&imbalance).await {
                    Ok(()) => report.adjustments += 1,
                    Err(e) => {
                        report.failed += 1;
                        error!(symbol = %instrument.symbol, round, error = %e, "Balance adjustment failed");
                        break;
                    }
                }

                if round == self.config.max_rounds && self.imbalance(instrument).needs_adjustment {
                    warn!(symbol = %instrument.symbol, rounds = round, "Still imbalanced after max adjustment rounds");
                }
            }
        }

        if report.adjustments > 0 || report.failed > 0 {
            info!(
                adjustments = report.adjustments,
                failed = report.failed,
                "Balance reconciliation finished"
            );
        }
        report
    }

    async fn adjust(&self, imbalance: &PositionImbalance) -> HedgeResult<()> {
        let (Some(venue), Some(side)) = (imbalance.adjustment_venue, imbalance.adjustment_side)
        else {
            return Ok(());
        };
        let amount = imbalance.adjustment_amount;

        info!(
            symbol = %imbalance.symbol,
            taker = %imbalance.taker_exposure,
            maker = %imbalance.maker_exposure,
            imbalance_pct = %imbalance.imbalance_percent.round_dp(2),
            %venue,
            %side,
            %amount,
            "Adjusting imbalance"
        );

        let fill = self
            .venues
            .execute_now(venue, &imbalance.symbol, side, amount, self.taker_leverage)
            .await?;
        self.ledger
            .apply_fill(venue, &imbalance.symbol, side, amount, fill.price);
        Ok(())
    }
}
