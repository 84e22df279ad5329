//! Venue-neutral order and position types shared by the engine and connectors.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two venues the engine hedges across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueId {
    /// Venue where mirror orders are taken immediately.
    Taker,
    /// Venue where resting limit orders are placed.
    Maker,
}

impl VenueId {
    pub const ALL: [VenueId; 2] = [VenueId::Taker, VenueId::Maker];

    /// The venue on the other side of the hedge.
    pub fn other(self) -> Self {
        match self {
            VenueId::Taker => VenueId::Maker,
            VenueId::Maker => VenueId::Taker,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VenueId::Taker => "taker",
            VenueId::Maker => "maker",
        }
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a held position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// Side that grows a position in this direction.
    pub fn open_side(self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    /// Side that shrinks a position in this direction.
    pub fn close_side(self) -> OrderSide {
        self.open_side().opposite()
    }

    /// Direction of a signed quantity, `None` when flat.
    pub fn of(signed: Decimal) -> Option<Self> {
        if signed > Decimal::ZERO {
            Some(Direction::Long)
        } else if signed < Decimal::ZERO {
            Some(Direction::Short)
        } else {
            None
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Lifecycle status of a venue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Partial,
    Filled,
    Cancelled,
}

impl OrderStatus {
    /// Filled and cancelled orders never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

/// Status snapshot returned by a venue for one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderState {
    pub status: OrderStatus,
    /// Cumulative filled notional in quote currency.
    pub filled_size: Decimal,
}

/// Result of an immediately executed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    pub order_id: String,
    /// Average execution price.
    pub price: Decimal,
}

/// Acknowledgement of a resting maker order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakerOrderAck {
    pub order_id: String,
    /// Limit price the order rests at.
    pub price: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_direction_sides() {
        assert_eq!(Direction::Short.open_side(), OrderSide::Sell);
        assert_eq!(Direction::Short.close_side(), OrderSide::Buy);
        assert_eq!(Direction::Long.open_side(), OrderSide::Buy);
        assert_eq!(Direction::of(dec!(-3)), Some(Direction::Short));
        assert_eq!(Direction::of(Decimal::ZERO), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Partial.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
    }

    #[test]
    fn test_venue_display() {
        assert_eq!(VenueId::Taker.to_string(), "taker");
        assert_eq!(VenueId::Maker.other(), VenueId::Taker);
        assert_eq!(OrderSide::Sell.to_string(), "SELL");
    }
}
