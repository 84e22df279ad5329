//! Registry of in-flight maker orders.

use crate::error::{HedgeError, HedgeResult};
use crate::exchange::{OrderSide, OrderStatus, VenueId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Registry key: order ids are only unique per venue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OrderKey {
    pub venue: VenueId,
    pub id: String,
}

impl OrderKey {
    pub fn new(venue: VenueId, id: impl Into<String>) -> Self {
        Self {
            venue,
            id: id.into(),
        }
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.venue, self.id)
    }
}

/// Order the engine placed and is waiting on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveOrder {
    pub id: String,
    pub venue: VenueId,
    pub symbol: String,
    pub side: OrderSide,
    /// Quote notional requested
    pub requested_size: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
    /// Cumulative filled notional
    pub filled_size: Decimal,
    /// Filled notional already mirrored on the other venue
    pub hedged_size: Decimal,
    /// Filled notional handed to a hedge, finished or in flight
    pub claimed_size: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActiveOrder {
    pub fn new(
        id: impl Into<String>,
        venue: VenueId,
        symbol: &str,
        side: OrderSide,
        requested_size: Decimal,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            venue,
            symbol: symbol.to_string(),
            side,
            requested_size,
            price,
            status: OrderStatus::Pending,
            filled_size: Decimal::ZERO,
            hedged_size: Decimal::ZERO,
            claimed_size: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> OrderKey {
        OrderKey::new(self.venue, self.id.clone())
    }

    /// Filled notional not yet mirrored.
    pub fn unhedged(&self) -> Decimal {
        (self.filled_size - self.hedged_size).max(Decimal::ZERO)
    }
}

/// Result of [`OrderRegistry::update_status`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    /// The order as it was before the update
    pub previous: ActiveOrder,
    /// Filled notional newly claimed for hedging by this update
    pub claimed: Decimal,
}

/// Concurrency-safe map of active orders.
#[derive(Default)]
pub struct OrderRegistry {
    orders: RwLock<HashMap<OrderKey, ActiveOrder>>,
}

impl OrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new order; ids must be unique per venue.
    pub fn add(&self, order: ActiveOrder) -> HedgeResult<()> {
        let key = order.key();
        let mut orders = self.orders.write();
        if orders.contains_key(&key) {
            return Err(HedgeError::DuplicateOrder(key.to_string()));
        }
        debug!(order = %key, symbol = %order.symbol, side = %order.side, size = %order.requested_size, "Order registered");
        orders.insert(key, order);
        Ok(())
    }

    pub fn get(&self, key: &OrderKey) -> Option<ActiveOrder> {
        self.orders.read().get(key).cloned()
    }

    /// Copies of all active orders, oldest first.
    pub fn list_active(&self) -> Vec<ActiveOrder> {
        let mut orders: Vec<ActiveOrder> = self.orders.read().values().cloned().collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        orders
    }

    /// Apply a venue status update.
    ///
    /// With `claim` set, the filled notional not yet claimed is claimed for
    /// hedging in the same critical section, so concurrent checks of one
    /// order never hedge the same fill twice. Terminal statuses remove the
    /// order under the same lock.
    pub fn update_status(
        &self,
        key: &OrderKey,
        status: OrderStatus,
        filled_size: Decimal,
        claim: bool,
        now: DateTime<Utc>,
    ) -> Option<StatusUpdate> {
        let mut orders = self.orders.write();
        let order = orders.get_mut(key)?;
        let previous = order.clone();

        let claimed = if claim {
            (filled_size - order.claimed_size).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        if status.is_terminal() {
            orders.remove(key);
            debug!(order = %key, %filled_size, ?status, "Order completed");
        } else {
            order.status = status;
            order.filled_size = order.filled_size.max(filled_size);
            order.claimed_size += claimed;
            order.updated_at = now;
        }

        Some(StatusUpdate { previous, claimed })
    }

    /// Give back a claim whose hedge failed so a later check retries it.
    pub fn release_claim(&self, key: &OrderKey, amount: Decimal) {
        if let Some(order) = self.orders.write().get_mut(key) {
            order.claimed_size = (order.claimed_size - amount).max(order.hedged_size);
        }
    }

    /// Add `amount` to the notional mirrored for an order.
    pub fn record_hedged(&self, key: &OrderKey, amount: Decimal) {
        if let Some(order) = self.orders.write().get_mut(key) {
            order.hedged_size += amount;
        }
    }

    pub fn remove(&self, key: &OrderKey) -> Option<ActiveOrder> {
        self.orders.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }
}
