//! Closing side of the cycle and the emergency unwind.

use super::opening::place_maker_order;
use super::orders::{ActiveOrder, OrderRegistry};
use crate::config::{InstrumentConfig, TradingConfig};
use crate::error::HedgeResult;
use crate::exchange::{Direction, OrderSide, VenueId, Venues};
use crate::risk::{ExchangePositions, PositionLedger};
use crate::utils::Clock;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument, Span};

/// Instrument with the largest absolute maker exposure and that exposure.
///
/// Flat instruments are never selected; ties go to the first configured one.
pub fn select_closing<'a>(
    instruments: &'a [InstrumentConfig],
    maker: &ExchangePositions,
) -> Option<(&'a InstrumentConfig, Decimal)> {
    let mut best: Option<(&InstrumentConfig, Decimal)> = None;
    for instrument in instruments {
        let open = maker
            .positions
            .get(&instrument.symbol)
            .is_some_and(|p| !p.is_flat());
        if !open {
            continue;
        }
        let exposure = maker.exposure(&instrument.symbol);
        match best {
            Some((_, current)) if current.abs() >= exposure.abs() => {}
            _ => best = Some((instrument, exposure)),
        }
    }
    best
}

/// Result of a market close sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnwindReport {
    pub closed: usize,
    pub failed: usize,
}

pub struct ClosingManager {
    venues: Venues,
    registry: Arc<OrderRegistry>,
    ledger: Arc<PositionLedger>,
    trading: TradingConfig,
    spread_percent: Decimal,
    clock: Arc<dyn Clock>,
    span: Span,
}

impl ClosingManager {
    pub fn new(
        venues: Venues,
        registry: Arc<OrderRegistry>,
        ledger: Arc<PositionLedger>,
        trading: &TradingConfig,
        spread_percent: Decimal,
        clock: Arc<dyn Clock>,
        parent: &Span,
    ) -> Self {
        Self {
            venues,
            registry,
            ledger,
            trading: trading.clone(),
            spread_percent,
            clock,
            span: info_span!(parent: parent, "closing"),
        }
    }

    /// Place one maker order that shrinks the largest position.
    ///
    /// Once the maker venue is flat, hedge leftovers on the taker venue are
    /// closed at market and `None` is returned.
    pub async fn place_closing_order(&self) -> HedgeResult<Option<ActiveOrder>> {
        self.close().instrument(self.span.clone()).await
    }

    async fn close(&self) -> HedgeResult<Option<ActiveOrder>> {
        let maker = self.ledger.positions(VenueId::Maker);
        let Some((instrument, exposure)) = select_closing(&self.trading.instruments, &maker)
        else {
            let snapshot = self.ledger.snapshot();
            if !snapshot.taker.all_flat() {
                info!(positions = %snapshot, "Maker venue flat, closing taker leftovers");
                let report = self.close_at_market(&[VenueId::Taker]).await;
                if report.failed > 0 {
                    warn!(failed = report.failed, "Some taker leftovers could not be closed");
                }
            }
            return Ok(None);
        };

        let side = match Direction::of(exposure) {
            Some(direction) => direction.close_side(),
            None => return Ok(None),
        };
        let size = exposure.abs().min(self.trading.order_size);

        let order = place_maker_order(
            &self.venues,
            &self.registry,
            self.clock.as_ref(),
            &instrument.symbol,
            side,
            size,
            self.spread_percent,
        )
        .await?;

        info!(
            order_id = %order.id,
            symbol = %order.symbol,
            %side,
            %size,
            price = %order.price,
            %exposure,
            "Closing order placed"
        );

        Ok(Some(order))
    }

    /// Close every open position on both venues at market.
    ///
    /// Each position is handled on its own; a failed close is logged and the
    /// sweep moves on.
    pub async fn emergency_unwind(&self) -> UnwindReport {
        async {
            warn!(positions = %self.ledger.summary(), "Emergency unwind started");
            let report = self.close_at_market(&VenueId::ALL).await;
            warn!(
                closed = report.closed,
                failed = report.failed,
                positions = %self.ledger.summary(),
                "Emergency unwind finished"
            );
            report
        }
        .instrument(self.span.clone())
        .await
    }

    async fn close_at_market(&self, venues: &[VenueId]) -> UnwindReport {
        let snapshot = self.ledger.snapshot();
        let mut report = UnwindReport::default();

        for &venue in venues {
            for position in snapshot.venue(venue).positions.values() {
                if position.is_flat() {
                    continue;
                }
                let side = match Direction::of(position.notional_value) {
                    Some(direction) => direction.close_side(),
                    None => continue,
                };
                let notional = position.notional_value.abs();

                match self
                    .venues
                    .market_order(venue, &position.symbol, side, notional)
                    .await
                {
                    Ok(order_id) => {
                        self.ledger.flatten(venue, &position.symbol);
                        report.closed += 1;
                        info!(%venue, symbol = %position.symbol, %side, %notional, %order_id, "Position closed");
                    }
                    Err(e) => {
                        report.failed += 1;
                        error!(%venue, symbol = %position.symbol, %notional, error = %e, "Failed to close position");
                    }
                }
            }
        }

        report
    }
}
