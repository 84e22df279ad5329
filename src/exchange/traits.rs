//! Venue-agnostic traits the hedge engine drives.
//!
//! The engine never talks to an exchange API directly. It needs two
//! collaborators:
//! - a taker venue, where mirror orders execute immediately
//! - a maker venue, where resting limit orders are placed and polled
//!
//! Sizes are quote-currency notionals; connectors convert to base quantity.

use super::types::{Fill, MakerOrderAck, OrderSide, OrderState};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Venue that executes orders immediately.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TakerVenue: Send + Sync {
    /// Open or grow a long position.
    async fn place_taker_long(
        &self,
        symbol: &str,
        notional: Decimal,
        leverage: u32,
    ) -> anyhow::Result<Fill>;

    /// Open or grow a short position.
    async fn place_taker_short(
        &self,
        symbol: &str,
        notional: Decimal,
        leverage: u32,
    ) -> anyhow::Result<Fill>;

    async fn get_order_status(&self, order_id: &str) -> anyhow::Result<OrderState>;

    async fn get_current_price(&self, symbol: &str) -> anyhow::Result<Decimal>;

    /// Market order used for unwinds and reconciliation.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        notional: Decimal,
    ) -> anyhow::Result<String>;
}

/// Venue where the engine rests limit orders.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MakerVenue: Send + Sync {
    /// Rest a buy limit order `spread_percent` below the market.
    async fn place_maker_long(
        &self,
        symbol: &str,
        notional: Decimal,
        spread_percent: Decimal,
    ) -> anyhow::Result<MakerOrderAck>;

    /// Rest a sell limit order `spread_percent` above the market.
    async fn place_maker_short(
        &self,
        symbol: &str,
        notional: Decimal,
        spread_percent: Decimal,
    ) -> anyhow::Result<MakerOrderAck>;

    async fn get_order_status(&self, order_id: &str) -> anyhow::Result<OrderState>;

    async fn get_current_price(&self, symbol: &str) -> anyhow::Result<Decimal>;

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        notional: Decimal,
    ) -> anyhow::Result<String>;
}
