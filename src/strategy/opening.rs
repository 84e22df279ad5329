//! Opening side of the cycle: grow the least exposed instrument.

use super::orders::{ActiveOrder, OrderRegistry};
use crate::config::{InstrumentConfig, TradingConfig};
use crate::error::HedgeResult;
use crate::exchange::{OrderSide, VenueId, Venues};
use crate::risk::{ExchangePositions, PositionLedger};
use crate::utils::Clock;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, info_span, Instrument, Span};

/// Instrument with the smallest absolute maker exposure; ties go to the
/// first configured instrument.
pub fn select_opening<'a>(
    instruments: &'a [InstrumentConfig],
    maker: &ExchangePositions,
) -> Option<&'a InstrumentConfig> {
    instruments
        .iter()
        .enumerate()
        .min_by(|(ia, a), (ib, b)| {
            maker
                .exposure(&a.symbol)
                .abs()
                .cmp(&maker.exposure(&b.symbol).abs())
                .then(ia.cmp(ib))
        })
        .map(|(_, instrument)| instrument)
}

/// Rest a maker limit order and register it for tracking.
pub(super) async fn place_maker_order(
    venues: &Venues,
    registry: &OrderRegistry,
    clock: &dyn Clock,
    symbol: &str,
    side: OrderSide,
    notional: Decimal,
    spread_percent: Decimal,
) -> HedgeResult<ActiveOrder> {
    let ack = venues
        .place_resting(symbol, side, notional, spread_percent)
        .await?;
    let order = ActiveOrder::new(
        ack.order_id,
        VenueId::Maker,
        symbol,
        side,
        notional,
        ack.price,
        clock.now(),
    );
    registry.add(order.clone())?;
    Ok(order)
}

pub struct OpeningManager {
    venues: Venues,
    registry: Arc<OrderRegistry>,
    ledger: Arc<PositionLedger>,
    trading: TradingConfig,
    spread_percent: Decimal,
    clock: Arc<dyn Clock>,
    span: Span,
}

impl OpeningManager {
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
            span: info_span!(parent: parent, "opening"),
        }
    }

    /// Place one opening order on the maker venue.
    ///
    /// The taker mirror is left to the order tracker.
    pub async fn place_opening_order(&self) -> HedgeResult<Option<ActiveOrder>> {
        self.open().instrument(self.span.clone()).await
    }

    async fn open(&self) -> HedgeResult<Option<ActiveOrder>> {
        let maker = self.ledger.positions(VenueId::Maker);
        let Some(instrument) = select_opening(&self.trading.instruments, &maker) else {
            return Ok(None);
        };

        let side = instrument.maker_direction.open_side();
        let size = self.trading.order_size;

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
            exposure = %maker.exposure(&instrument.symbol),
            "Opening order placed"
        );

        Ok(Some(order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{
        Direction, MakerOrderAck, MockMakerVenue, MockTakerVenue, OrderStatus,
    };
    use crate::utils::SystemClock;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn instruments() -> Vec<InstrumentConfig> {
        vec![
            InstrumentConfig::new("BTC", Direction::Short, 6),
            InstrumentConfig::new("ETH", Direction::Long, 5),
        ]
    }

    fn maker_book(entries: &[(&str, OrderSide, Decimal)]) -> ExchangePositions {
        let ledger = PositionLedger::new(Arc::new(SystemClock));
        for (symbol, side, notional) in entries {
            ledger.apply_fill(VenueId::Maker, symbol, *side, *notional, dec!(100));
        }
        ledger.positions(VenueId::Maker)
    }

    #[test]
    fn test_least_exposed_symbol_wins() {
        let instruments = instruments();
        let book = maker_book(&[("ETH", OrderSide::Buy, dec!(200))]);
        assert_eq!(select_opening(&instruments, &book).unwrap().symbol, "BTC");

        let book = maker_book(&[
            ("BTC", OrderSide::Sell, dec!(500)),
            ("ETH", OrderSide::Buy, dec!(200)),
        ]);
        assert_eq!(select_opening(&instruments, &book).unwrap().symbol, "ETH");
    }

    #[test]
    fn test_tie_goes_to_first_instrument() {
        let instruments = instruments();
        assert_eq!(
            select_opening(&instruments, &maker_book(&[])).unwrap().symbol,
            "BTC"
        );

        let book = maker_book(&[
            ("BTC", OrderSide::Sell, dec!(300)),
            ("ETH", OrderSide::Buy, dec!(300)),
        ]);
        assert_eq!(select_opening(&instruments, &book).unwrap().symbol, "BTC");
    }

    #[test]
    fn test_no_instruments_selects_nothing() {
        assert!(select_opening(&[], &maker_book(&[])).is_none());
    }

    #[tokio::test]
    async fn test_opening_order_uses_maker_direction() {
        let mut maker = MockMakerVenue::new();
        maker
            .expect_place_maker_short()
            .withf(|symbol, notional, spread| {
                symbol == "BTC" && *notional == dec!(1000) && *spread == dec!(0.1)
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(MakerOrderAck {
                    order_id: "m-7".to_string(),
                    price: dec!(60060),
                })
            });
        let venues = Venues::new(
            Arc::new(MockTakerVenue::new()),
            Arc::new(maker),
            Duration::from_secs(1),
        );
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let registry = Arc::new(OrderRegistry::new());
        let ledger = Arc::new(PositionLedger::new(clock.clone()));
        let manager = OpeningManager::new(
            venues,
            registry.clone(),
            ledger,
            &TradingConfig::default(),
            dec!(0.1),
            clock,
            &Span::none(),
        );

        let order = manager.place_opening_order().await.unwrap().unwrap();

        assert_eq!(order.side, OrderSide::Sell);
        assert_eq!(order.status, OrderStatus::Pending);
        let active = registry.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "m-7");
        assert_eq!(active[0].price, dec!(60060));
    }
}
