//! Error types for the hedge engine.
//!
//! Venue connectors report failures as `anyhow::Error`; the engine wraps them
//! into [`HedgeError`] so callers can tell retryable venue trouble apart from
//! hard configuration errors such as an unsupported instrument.

use crate::exchange::{OrderSide, VenueId};
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HedgeError {
    #[error("{venue} venue call failed: {source}")]
    Venue {
        venue: VenueId,
        #[source]
        source: anyhow::Error,
    },

    #[error("{venue} venue call timed out after {timeout:?}")]
    Timeout { venue: VenueId, timeout: Duration },

    #[error("Unsupported instrument/side combination: {symbol} {side}")]
    UnsupportedPair { symbol: String, side: OrderSide },

    #[error(
        "Price rejected for {symbol}: original {original}, reference {reference}, slippage {slippage_percent}%"
    )]
    PriceRejected {
        symbol: String,
        original: Decimal,
        reference: Decimal,
        slippage_percent: Decimal,
    },

    #[error("Gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<HedgeError>,
    },

    #[error("Duplicate order id: {0}")]
    DuplicateOrder(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Strategy is already running")]
    AlreadyRunning,

    #[error("Strategy was stopped and cannot be restarted")]
    Stopped,
}

impl HedgeError {
    /// Wrap a connector error with the venue it came from.
    pub fn venue(venue: VenueId, source: anyhow::Error) -> Self {
        Self::Venue { venue, source }
    }

    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Venue { .. } | Self::Timeout { .. })
    }
}

pub type HedgeResult<T> = Result<T, HedgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let venue = HedgeError::venue(VenueId::Taker, anyhow::anyhow!("503"));
        assert!(venue.is_retryable());

        let timeout = HedgeError::Timeout {
            venue: VenueId::Maker,
            timeout: Duration::from_millis(500),
        };
        assert!(timeout.is_retryable());

        let pair = HedgeError::UnsupportedPair {
            symbol: "DOGE".to_string(),
            side: OrderSide::Buy,
        };
        assert!(!pair.is_retryable());
        assert!(!HedgeError::Cancelled.is_retryable());
    }

    #[test]
    fn test_error_messages_name_the_venue() {
        let err = HedgeError::venue(VenueId::Maker, anyhow::anyhow!("rate limited"));
        assert_eq!(err.to_string(), "maker venue call failed: rate limited");
    }
}
