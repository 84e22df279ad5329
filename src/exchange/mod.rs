//! Venue integrations for the hedge engine.
//!
//! - `traits`: the taker/maker contracts the engine is written against
//! - `paper`: in-memory simulated venue for paper trading and tests
//! - `binance`: signed REST connector usable on either leg
//!
//! [`Venues`] bundles both legs and applies the per-call timeout so the
//! engine can address a venue by [`VenueId`].

mod binance;
pub mod paper;
mod traits;
mod types;

pub use binance::BinanceClient;
pub use paper::PaperVenue;
pub use traits::{MakerVenue, TakerVenue};
pub use types::*;

#[cfg(test)]
pub use traits::{MockMakerVenue, MockTakerVenue};

use crate::error::{HedgeError, HedgeResult};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Both legs of the hedge plus the per-call timeout.
#[derive(Clone)]
pub struct Venues {
    pub taker: Arc<dyn TakerVenue>,
    pub maker: Arc<dyn MakerVenue>,
    call_timeout: Duration,
}

impl Venues {
    pub fn new(
        taker: Arc<dyn TakerVenue>,
        maker: Arc<dyn MakerVenue>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            taker,
            maker,
            call_timeout,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub async fn order_status(&self, venue: VenueId, order_id: &str) -> HedgeResult<OrderState> {
        match venue {
            VenueId::Taker => {
                bounded(venue, self.call_timeout, self.taker.get_order_status(order_id)).await
            }
            VenueId::Maker => {
                bounded(venue, self.call_timeout, self.maker.get_order_status(order_id)).await
            }
        }
    }

    pub async fn current_price(&self, venue: VenueId, symbol: &str) -> HedgeResult<Decimal> {
        self.price_within(venue, symbol, self.call_timeout).await
    }

    /// Fetch a price that must arrive within `window` to be usable.
    pub async fn price_within(
        &self,
        venue: VenueId,
        symbol: &str,
        window: Duration,
    ) -> HedgeResult<Decimal> {
        match venue {
            VenueId::Taker => bounded(venue, window, self.taker.get_current_price(symbol)).await,
            VenueId::Maker => bounded(venue, window, self.maker.get_current_price(symbol)).await,
        }
    }

    pub async fn market_order(
        &self,
        venue: VenueId,
        symbol: &str,
        side: OrderSide,
        notional: Decimal,
    ) -> HedgeResult<String> {
        match venue {
            VenueId::Taker => {
                bounded(
                    venue,
                    self.call_timeout,
                    self.taker.place_market_order(symbol, side, notional),
                )
                .await
            }
            VenueId::Maker => {
                bounded(
                    venue,
                    self.call_timeout,
                    self.maker.place_market_order(symbol, side, notional),
                )
                .await
            }
        }
    }

    /// Execute immediately on `venue` and report the fill price.
    ///
    /// The taker leg uses its dedicated long/short entry points. The maker leg
    /// has no taker entry, so it is quoted first and filled with a market order.
    pub async fn execute_now(
        &self,
        venue: VenueId,
        symbol: &str,
        side: OrderSide,
        notional: Decimal,
        leverage: u32,
    ) -> HedgeResult<Fill> {
        match venue {
            VenueId::Taker => {
                let fut = async {
                    match side {
                        OrderSide::Buy => self.taker.place_taker_long(symbol, notional, leverage).await,
                        OrderSide::Sell => {
                            self.taker.place_taker_short(symbol, notional, leverage).await
                        }
                    }
                };
                bounded(venue, self.call_timeout, fut).await
            }
            VenueId::Maker => {
                let price = self.current_price(venue, symbol).await?;
                let order_id = self.market_order(venue, symbol, side, notional).await?;
                Ok(Fill { order_id, price })
            }
        }
    }

    /// Rest a limit order on the maker venue.
    pub async fn place_resting(
        &self,
        symbol: &str,
        side: OrderSide,
        notional: Decimal,
        spread_percent: Decimal,
    ) -> HedgeResult<MakerOrderAck> {
        let fut = async {
            match side {
                OrderSide::Buy => {
                    self.maker
                        .place_maker_long(symbol, notional, spread_percent)
                        .await
                }
                OrderSide::Sell => {
                    self.maker
                        .place_maker_short(symbol, notional, spread_percent)
                        .await
                }
            }
        };
        bounded(VenueId::Maker, self.call_timeout, fut).await
    }
}

async fn bounded<T, F>(venue: VenueId, timeout: Duration, fut: F) -> HedgeResult<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(HedgeError::venue(venue, e)),
        Err(_) => Err(HedgeError::Timeout { venue, timeout }),
    }
}
