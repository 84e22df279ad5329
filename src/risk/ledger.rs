//! Per-venue position ledger.
//!
//! Single source of truth for what the engine believes each venue holds.
//! Writers go through the ledger API; readers always receive copies, so a
//! snapshot never changes under the caller.

use crate::exchange::{OrderSide, VenueId};
use crate::utils::decimal::safe_div;
use crate::utils::Clock;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Positions worth less than this much quote are treated as closed.
pub const DUST_NOTIONAL: Decimal = dec!(0.01);

/// Position held on one venue for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub symbol: String,
    /// Base quantity; positive long, negative short
    pub signed_size: Decimal,
    /// Quote value with the same sign as `signed_size`
    pub notional_value: Decimal,
    /// |notional| / venue equity at the last recompute
    pub leverage: Decimal,
}

impl Position {
    pub fn flat(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            signed_size: Decimal::ZERO,
            notional_value: Decimal::ZERO,
            leverage: Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.signed_size.is_zero() || self.notional_value.abs() < DUST_NOTIONAL
    }
}

/// All positions on one venue.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangePositions {
    pub venue: VenueId,
    pub positions: BTreeMap<String, Position>,
    /// Aggregate leverage proxy for the venue
    pub leverage: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl ExchangePositions {
    fn new(venue: VenueId, now: DateTime<Utc>) -> Self {
        Self {
            venue,
            positions: BTreeMap::new(),
            leverage: Decimal::ZERO,
            updated_at: now,
        }
    }

    /// Signed notional held for `symbol`, zero when absent.
    pub fn exposure(&self, symbol: &str) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| p.notional_value)
            .unwrap_or_default()
    }

    pub fn gross_notional(&self) -> Decimal {
        self.positions.values().map(|p| p.notional_value.abs()).sum()
    }

    pub fn all_flat(&self) -> bool {
        self.positions.values().all(Position::is_flat)
    }
}

/// Consistent copy of both venues taken under one read lock.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    pub taker: ExchangePositions,
    pub maker: ExchangePositions,
}

impl LedgerSnapshot {
    pub fn venue(&self, venue: VenueId) -> &ExchangePositions {
        match venue {
            VenueId::Taker => &self.taker,
            VenueId::Maker => &self.maker,
        }
    }

    fn venue_mut(&mut self, venue: VenueId) -> &mut ExchangePositions {
        match venue {
            VenueId::Taker => &mut self.taker,
            VenueId::Maker => &mut self.maker,
        }
    }

    pub fn leverage(&self, venue: VenueId) -> Decimal {
        self.venue(venue).leverage
    }

    pub fn all_positions_zero(&self) -> bool {
        self.taker.all_flat() && self.maker.all_flat()
    }
}

impl fmt::Display for LedgerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, book) in [&self.taker, &self.maker].into_iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{} lev={:.2}", book.venue, book.leverage)?;
            for position in book.positions.values() {
                write!(f, " {}={:+.2}", position.symbol, position.notional_value)?;
            }
        }
        Ok(())
    }
}

/// Supplies the equity used as the leverage denominator.
pub trait EquitySource: Send + Sync {
    fn equity(&self, venue: VenueId) -> Decimal;
}

/// Same configured equity for every venue.
#[derive(Debug, Clone, Copy)]
pub struct FixedEquity(pub Decimal);

impl EquitySource for FixedEquity {
    fn equity(&self, _venue: VenueId) -> Decimal {
        self.0
    }
}

/// Concurrency-safe ledger of both venues.
pub struct PositionLedger {
    inner: RwLock<LedgerSnapshot>,
    clock: Arc<dyn Clock>,
}

impl PositionLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            inner: RwLock::new(LedgerSnapshot {
                taker: ExchangePositions::new(VenueId::Taker, now),
                maker: ExchangePositions::new(VenueId::Maker, now),
            }),
            clock,
        }
    }

    /// Copy of one venue's positions.
    pub fn positions(&self, venue: VenueId) -> ExchangePositions {
        self.inner.read().venue(venue).clone()
    }

    /// Copy of both venues from a single read.
    pub fn snapshot(&self) -> LedgerSnapshot {
        self.inner.read().clone()
    }

    pub fn exposure(&self, venue: VenueId, symbol: &str) -> Decimal {
        self.inner.read().venue(venue).exposure(symbol)
    }

    pub fn all_positions_zero(&self) -> bool {
        self.inner.read().all_positions_zero()
    }

    /// One-line description of both venues for logs.
    pub fn summary(&self) -> String {
        self.inner.read().to_string()
    }

    /// Replace one position.
    pub fn update_position(&self, venue: VenueId, symbol: &str, position: Position) {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let book = inner.venue_mut(venue);
        book.positions.insert(symbol.to_string(), position);
        book.updated_at = now;
    }

    /// Book a fill of `notional` quote at `price`.
    pub fn apply_fill(
        &self,
        venue: VenueId,
        symbol: &str,
        side: OrderSide,
        notional: Decimal,
        price: Decimal,
    ) {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let book = inner.venue_mut(venue);
        let position = book
            .positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position::flat(symbol));

        let held = position.notional_value.abs();
        let reducing = !held.is_zero() && position.notional_value.signum() != side.sign();

        if reducing && notional < held {
            // shrink base size by the closed fraction so size and value stay consistent
            let left = held - notional;
            position.signed_size = position.signed_size * left / held;
            position.notional_value = position.notional_value.signum() * left;
            if position.notional_value.abs() < DUST_NOTIONAL {
                *position = Position::flat(symbol);
            }
        } else if reducing {
            // closed in full; any excess opens the other way at the fill price
            let excess = notional - held;
            position.signed_size = side.sign() * safe_div(excess, price);
            position.notional_value = side.sign() * excess;
        } else {
            position.signed_size += side.sign() * safe_div(notional, price);
            position.notional_value += side.sign() * notional;
        }
        book.updated_at = now;

        debug!(
            %venue,
            %symbol,
            %side,
            %notional,
            %price,
            exposure = %position.notional_value,
            "Ledger fill applied"
        );
    }

    /// Zero a position after it was unwound.
    pub fn flatten(&self, venue: VenueId, symbol: &str) {
        self.update_position(venue, symbol, Position::flat(symbol));
    }

    /// Mark a position to `price`.
    pub fn revalue(&self, venue: VenueId, symbol: &str, price: Decimal) {
        if price <= Decimal::ZERO {
            return;
        }
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let book = inner.venue_mut(venue);
        if let Some(position) = book.positions.get_mut(symbol) {
            if !position.signed_size.is_zero() {
                position.notional_value = position.signed_size * price;
                book.updated_at = now;
            }
        }
    }

    /// Recompute per-position and per-venue leverage against `equity`.
    pub fn recompute_leverage(&self, equity: &dyn EquitySource) {
        let mut inner = self.inner.write();
        for venue in VenueId::ALL {
            let base = equity.equity(venue);
            let book = inner.venue_mut(venue);
            if base <= Decimal::ZERO {
                warn!(%venue, equity = %base, "Non-positive equity, leverage reported as zero");
                book.leverage = Decimal::ZERO;
                for position in book.positions.values_mut() {
                    position.leverage = Decimal::ZERO;
                }
                continue;
            }
            for position in book.positions.values_mut() {
                position.leverage = position.notional_value.abs() / base;
            }
            book.leverage = book.gross_notional() / base;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::SystemClock;
    use rust_decimal_macros::dec;

    fn create_ledger() -> PositionLedger {
        PositionLedger::new(Arc::new(SystemClock))
    }

    #[test]
    fn test_apply_fill_tracks_signed_exposure() {
        let ledger = create_ledger();
        ledger.apply_fill(VenueId::Maker, "BTC", OrderSide::Sell, dec!(1000), dec!(50000));
        ledger.apply_fill(VenueId::Taker, "BTC", OrderSide::Buy, dec!(1000), dec!(50000));

        assert_eq!(ledger.exposure(VenueId::Maker, "BTC"), dec!(-1000));
        assert_eq!(ledger.exposure(VenueId::Taker, "BTC"), dec!(1000));

        let maker = ledger.positions(VenueId::Maker);
        assert_eq!(maker.positions["BTC"].signed_size, dec!(-0.02));
    }

    #[test]
    fn test_closing_fill_at_other_price_leaves_no_residual() {
        let ledger = create_ledger();
        ledger.apply_fill(VenueId::Maker, "BTC", OrderSide::Sell, dec!(3500), dec!(60000));
        ledger.revalue(VenueId::Maker, "BTC", dec!(50000));
        let exposure = ledger.exposure(VenueId::Maker, "BTC");

        // closes booked at a limit price away from the mark
        ledger.apply_fill(VenueId::Maker, "BTC", OrderSide::Buy, dec!(1000), dec!(49950));
        ledger.apply_fill(VenueId::Maker, "BTC", OrderSide::Buy, exposure.abs() - dec!(1000), dec!(49950));

        assert!(ledger.all_positions_zero());
        ledger.revalue(VenueId::Maker, "BTC", dec!(50000));
        assert_eq!(ledger.exposure(VenueId::Maker, "BTC"), Decimal::ZERO);
    }

    #[test]
    fn test_partial_close_keeps_mark_price() {
        let ledger = create_ledger();
        ledger.apply_fill(VenueId::Taker, "ETH", OrderSide::Sell, dec!(1000), dec!(2500));
        ledger.apply_fill(VenueId::Taker, "ETH", OrderSide::Buy, dec!(250), dec!(2600));

        let position = &ledger.positions(VenueId::Taker).positions["ETH"];
        assert_eq!(position.notional_value, dec!(-750));
        assert_eq!(position.signed_size, dec!(-0.3));
    }

    #[test]
    fn test_overshooting_close_flips_position() {
        let ledger = create_ledger();
        ledger.apply_fill(VenueId::Taker, "BTC", OrderSide::Buy, dec!(1000), dec!(50000));
        ledger.apply_fill(VenueId::Taker, "BTC", OrderSide::Sell, dec!(1100), dec!(50000));

        let position = &ledger.positions(VenueId::Taker).positions["BTC"];
        assert_eq!(position.notional_value, dec!(-100));
        assert_eq!(position.signed_size, dec!(-0.002));
    }

    #[test]
    fn test_dust_counts_as_flat() {
        let ledger = create_ledger();
        ledger.apply_fill(VenueId::Taker, "BTC", OrderSide::Buy, dec!(1000), dec!(50000));
        ledger.apply_fill(VenueId::Taker, "BTC", OrderSide::Sell, dec!(999.995), dec!(50000));

        assert!(ledger.all_positions_zero());
        assert_eq!(ledger.exposure(VenueId::Taker, "BTC"), Decimal::ZERO);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let ledger = create_ledger();
        ledger.apply_fill(VenueId::Maker, "ETH", OrderSide::Buy, dec!(500), dec!(2500));
        let before = ledger.snapshot();

        ledger.apply_fill(VenueId::Maker, "ETH", OrderSide::Buy, dec!(500), dec!(2500));

        assert_eq!(before.maker.exposure("ETH"), dec!(500));
        assert_eq!(ledger.exposure(VenueId::Maker, "ETH"), dec!(1000));
    }

    #[test]
    fn test_leverage_proxy() {
        let ledger = create_ledger();
        ledger.apply_fill(VenueId::Taker, "BTC", OrderSide::Buy, dec!(1500), dec!(50000));
        ledger.apply_fill(VenueId::Taker, "ETH", OrderSide::Sell, dec!(1500), dec!(2500));

        ledger.recompute_leverage(&FixedEquity(dec!(1000)));

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.leverage(VenueId::Taker), dec!(3));
        assert_eq!(snapshot.taker.positions["ETH"].leverage, dec!(1.5));
        assert_eq!(snapshot.leverage(VenueId::Maker), Decimal::ZERO);
    }

    #[test]
    fn test_zero_equity_reports_zero_leverage() {
        let ledger = create_ledger();
        ledger.apply_fill(VenueId::Taker, "BTC", OrderSide::Buy, dec!(1500), dec!(50000));
        ledger.recompute_leverage(&FixedEquity(Decimal::ZERO));
        assert_eq!(ledger.snapshot().leverage(VenueId::Taker), Decimal::ZERO);
    }

    #[test]
    fn test_flatten_and_all_zero() {
        let ledger = create_ledger();
        assert!(ledger.all_positions_zero());

        ledger.apply_fill(VenueId::Maker, "BTC", OrderSide::Sell, dec!(100), dec!(50000));
        assert!(!ledger.all_positions_zero());

        ledger.flatten(VenueId::Maker, "BTC");
        assert!(ledger.all_positions_zero());
        assert!(ledger.summary().starts_with("taker lev=0.00 | maker"));
    }

    #[test]
    fn test_revalue_marks_to_price() {
        let ledger = create_ledger();
        ledger.apply_fill(VenueId::Maker, "BTC", OrderSide::Sell, dec!(1000), dec!(50000));

        ledger.revalue(VenueId::Maker, "BTC", dec!(55000));
        assert_eq!(ledger.exposure(VenueId::Maker, "BTC"), dec!(-1100));

        ledger.revalue(VenueId::Maker, "BTC", Decimal::ZERO);
        assert_eq!(ledger.exposure(VenueId::Maker, "BTC"), dec!(-1100));
    }

    #[test]
    fn test_summary_formatting() {
        let ledger = create_ledger();
        ledger.apply_fill(VenueId::Taker, "BTC", OrderSide::Buy, dec!(1000), dec!(50000));
        let text = ledger.snapshot().to_string();
        assert!(text.starts_with("taker lev=0.00 BTC=+1000.00"));
        assert!(text.contains("| maker"));
    }
}
