//! Simulated venue for paper trading and integration tests.
//!
//! Implements both [`TakerVenue`] and [`MakerVenue`]:
//! - taker and market orders fill immediately at the current price
//! - maker orders rest at market ± spread and fill after a number of polls
//! - optional half fill on the first poll to exercise partial hedging
//! - failure injection for retry paths

use super::traits::{MakerVenue, TakerVenue};
use super::types::*;
use crate::config::PaperConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Resting order on the paper book.
#[derive(Debug, Clone)]
pub struct PaperOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub notional: Decimal,
    pub price: Decimal,
    pub filled: Decimal,
    pub status: OrderStatus,
    polls: u32,
}

/// Simulated account state.
#[derive(Debug, Default)]
pub struct PaperState {
    /// Signed base quantity per symbol.
    pub positions: HashMap<String, Decimal>,
    pub orders: HashMap<String, PaperOrder>,
    pub total_fees: Decimal,
    pub total_volume: Decimal,
    pub order_count: u64,
}

/// Paper venue usable on either leg of the hedge.
pub struct PaperVenue {
    name: String,
    state: Arc<RwLock<PaperState>>,
    prices: Arc<RwLock<HashMap<String, Decimal>>>,
    order_id_counter: AtomicU64,
    fail_next: AtomicU32,
    fee_rate: Decimal,
    fill_after_polls: u32,
    partial_fills: bool,
}

impl PaperVenue {
    /// Create a paper venue. `name` prefixes generated order ids.
    pub fn new(name: &str, config: &PaperConfig) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(RwLock::new(PaperState::default())),
            prices: Arc::new(RwLock::new(config.prices.clone())),
            order_id_counter: AtomicU64::new(1),
            fail_next: AtomicU32::new(0),
            fee_rate: config.fee_rate,
            fill_after_polls: config.fill_after_polls.max(1),
            partial_fills: config.partial_fills,
        }
    }

    /// Move the market for `symbol`; affects orders placed afterwards.
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    /// Make the next `count` order placements fail.
    pub fn fail_next_orders(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Signed base quantity currently held.
    pub async fn position(&self, symbol: &str) -> Decimal {
        self.state
            .read()
            .await
            .positions
            .get(symbol)
            .copied()
            .unwrap_or_default()
    }

    /// Copy of a resting or completed order.
    pub async fn order(&self, order_id: &str) -> Option<PaperOrder> {
        self.state.read().await.orders.get(order_id).cloned()
    }

    /// Cancel a resting order, keeping whatever already filled.
    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| anyhow!("Unknown order {}", order_id))?;
        if !order.status.is_terminal() {
            order.status = OrderStatus::Cancelled;
        }
        Ok(())
    }

    pub async fn total_fees(&self) -> Decimal {
        self.state.read().await.total_fees
    }

    fn next_order_id(&self) -> String {
        format!(
            "{}-{}",
            self.name,
            self.order_id_counter.fetch_add(1, Ordering::SeqCst)
        )
    }

    fn check_injected_failure(&self) -> Result<()> {
        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(anyhow!("{}: simulated order rejection", self.name));
        }
        Ok(())
    }

    async fn price_of(&self, symbol: &str) -> Result<Decimal> {
        self.prices
            .read()
            .await
            .get(symbol)
            .copied()
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| anyhow!("{}: no price for {}", self.name, symbol))
    }

    /// Fill `notional` at `price` and book it against the account.
    fn book_fill(
        &self,
        state: &mut PaperState,
        symbol: &str,
        side: OrderSide,
        notional: Decimal,
        price: Decimal,
    ) {
        let qty = notional / price;
        *state.positions.entry(symbol.to_string()).or_default() += side.sign() * qty;
        let fee = notional * self.fee_rate;
        state.total_fees += fee;
        state.total_volume += notional;
    }

    async fn execute_immediately(
        &self,
        symbol: &str,
        side: OrderSide,
        notional: Decimal,
    ) -> Result<Fill> {
        self.check_injected_failure()?;
        anyhow::ensure!(notional > Decimal::ZERO, "order notional must be positive");
        let price = self.price_of(symbol).await?;
        let order_id = self.next_order_id();

        let mut state = self.state.write().await;
        self.book_fill(&mut state, symbol, side, notional, price);
        state.order_count += 1;

        info!(
            venue = %self.name,
            %order_id,
            %symbol,
            %side,
            %notional,
            %price,
            "Paper order executed"
        );

        Ok(Fill { order_id, price })
    }

    async fn rest_order(
        &self,
        symbol: &str,
        side: OrderSide,
        notional: Decimal,
        spread_percent: Decimal,
    ) -> Result<MakerOrderAck> {
        self.check_injected_failure()?;
        anyhow::ensure!(notional > Decimal::ZERO, "order notional must be positive");
        let market = self.price_of(symbol).await?;
        let offset = spread_percent / dec!(100);
        let price = match side {
            OrderSide::Buy => market * (Decimal::ONE - offset),
            OrderSide::Sell => market * (Decimal::ONE + offset),
        }
        .round_dp(2);

        let order_id = self.next_order_id();
        let mut state = self.state.write().await;
        state.orders.insert(
            order_id.clone(),
            PaperOrder {
                symbol: symbol.to_string(),
                side,
                notional,
                price,
                filled: Decimal::ZERO,
                status: OrderStatus::Pending,
                polls: 0,
            },
        );
        state.order_count += 1;

        debug!(venue = %self.name, %order_id, %symbol, %side, %notional, %price, "Paper limit order resting");

        Ok(MakerOrderAck { order_id, price })
    }

    async fn poll_order(&self, order_id: &str) -> Result<OrderState> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| anyhow!("{}: unknown order {}", self.name, order_id))?;

        if order.status.is_terminal() {
            return Ok(OrderState {
                status: order.status,
                filled_size: order.filled,
            });
        }

        order.polls += 1;
        let target = if order.polls >= self.fill_after_polls {
            order.notional
        } else if self.partial_fills && order.polls == 1 {
            order.notional / dec!(2)
        } else {
            order.filled
        };

        let newly_filled = target - order.filled;
        order.filled = target;
        order.status = if order.filled >= order.notional {
            OrderStatus::Filled
        } else if order.filled > Decimal::ZERO {
            OrderStatus::Partial
        } else {
            OrderStatus::Pending
        };

        let result = OrderState {
            status: order.status,
            filled_size: order.filled,
        };
        let (symbol, side, price) = (order.symbol.clone(), order.side, order.price);

        if newly_filled > Decimal::ZERO {
            self.book_fill(&mut state, &symbol, side, newly_filled, price);
        }

        Ok(result)
    }
}

#[async_trait]
impl TakerVenue for PaperVenue {
    async fn place_taker_long(&self, symbol: &str, notional: Decimal, leverage: u32) -> Result<Fill> {
        debug!(venue = %self.name, %symbol, leverage, "Paper taker long");
        self.execute_immediately(symbol, OrderSide::Buy, notional).await
    }

    async fn place_taker_short(&self, symbol: &str, notional: Decimal, leverage: u32) -> Result<Fill> {
        debug!(venue = %self.name, %symbol, leverage, "Paper taker short");
        self.execute_immediately(symbol, OrderSide::Sell, notional).await
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderState> {
        self.poll_order(order_id).await
    }

    async fn get_current_price(&self, symbol: &str) -> Result<Decimal> {
        self.price_of(symbol).await
    }

    async fn place_market_order(&self, symbol: &str, side: OrderSide, notional: Decimal) -> Result<String> {
        Ok(self.execute_immediately(symbol, side, notional).await?.order_id)
    }
}

#[async_trait]
impl MakerVenue for PaperVenue {
    async fn place_maker_long(
        &self,
        symbol: &str,
        notional: Decimal,
        spread_percent: Decimal,
    ) -> Result<MakerOrderAck> {
        self.rest_order(symbol, OrderSide::Buy, notional, spread_percent).await
    }

    async fn place_maker_short(
        &self,
        symbol: &str,
        notional: Decimal,
        spread_percent: Decimal,
    ) -> Result<MakerOrderAck> {
        self.rest_order(symbol, OrderSide::Sell, notional, spread_percent).await
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderState> {
        self.poll_order(order_id).await
    }

    async fn get_current_price(&self, symbol: &str) -> Result<Decimal> {
        self.price_of(symbol).await
    }

    async fn place_market_order(&self, symbol: &str, side: OrderSide, notional: Decimal) -> Result<String> {
        Ok(self.execute_immediately(symbol, side, notional).await?.order_id)
    }
}
