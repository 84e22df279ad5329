//! Fast hedge execution.
//!
//! Mirrors a detected fill on the other venue:
//! - hedge side is the inverse of the filled side
//! - the fill price is checked against a fresh reference price
//! - placement goes through the retry policy
//! - every execution lands in a latency histogram

use super::retry::RetryPolicy;
use crate::config::{ExecutionConfig, TradingConfig};
use crate::error::{HedgeError, HedgeResult};
use crate::exchange::{Fill, OrderSide, VenueId, Venues};
use crate::utils::decimal::percentage_diff;
use crate::utils::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

const RECENT_EXECUTIONS: usize = 256;

/// A fill that needs mirroring.
#[derive(Debug, Clone)]
pub struct HedgeRequest {
    pub order_id: String,
    /// Venue where the fill happened
    pub venue: VenueId,
    pub symbol: String,
    pub original_side: OrderSide,
    /// Quote notional to mirror
    pub size: Decimal,
    pub original_price: Decimal,
    /// When the fill was observed, for latency accounting
    pub detected_at: Instant,
    pub detection_time: DateTime<Utc>,
}

/// Telemetry for one hedge execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub order_id: String,
    pub symbol: String,
    pub hedge_venue: VenueId,
    pub original_side: OrderSide,
    pub hedge_side: OrderSide,
    pub size: Decimal,
    pub original_price: Decimal,
    pub execution_price: Option<Decimal>,
    pub hedge_order_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub detection_time: DateTime<Utc>,
    pub execution_time: Option<DateTime<Utc>>,
    pub total_delay: Duration,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Execution counts per latency band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyHistogram {
    pub under_100ms: u64,
    pub from_100_to_200ms: u64,
    pub from_200_to_500ms: u64,
    pub over_500ms: u64,
}

impl LatencyHistogram {
    fn record(&mut self, delay: Duration) {
        let ms = delay.as_millis();
        if ms < 100 {
            self.under_100ms += 1;
        } else if ms < 200 {
            self.from_100_to_200ms += 1;
        } else if ms < 500 {
            self.from_200_to_500ms += 1;
        } else {
            self.over_500ms += 1;
        }
    }
}

/// Aggregate hedge execution statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub average_delay: Duration,
    pub min_delay: Option<Duration>,
    pub max_delay: Duration,
    pub last_execution_time: Option<DateTime<Utc>>,
    pub histogram: LatencyHistogram,
}

impl ExecutionStats {
    fn record(&mut self, delay: Duration, success: bool, at: DateTime<Utc>) {
        self.total_executions += 1;
        if success {
            self.successful_executions += 1;
        } else {
            self.failed_executions += 1;
        }

        // Incremental mean avoids keeping every sample.
        let n = self.total_executions as u128;
        let avg = self.average_delay.as_nanos();
        let next = (avg * (n - 1) + delay.as_nanos()) / n;
        self.average_delay = Duration::from_nanos(u64::try_from(next).unwrap_or(u64::MAX));

        self.min_delay = Some(self.min_delay.map_or(delay, |m| m.min(delay)));
        self.max_delay = self.max_delay.max(delay);
        self.last_execution_time = Some(at);
        self.histogram.record(delay);
    }

    /// Successful share of executions in percent.
    pub fn success_rate(&self) -> Decimal {
        if self.total_executions == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.successful_executions) * Decimal::ONE_HUNDRED
            / Decimal::from(self.total_executions)
    }
}

/// Places mirror orders for detected fills.
pub struct HedgeExecutor {
    venues: Venues,
    symbols: HashSet<String>,
    config: ExecutionConfig,
    taker_leverage: u32,
    policy: RetryPolicy,
    stats: Mutex<ExecutionStats>,
    recent: Mutex<VecDeque<ExecutionContext>>,
    clock: Arc<dyn Clock>,
    token: CancellationToken,
    span: Span,
}

impl HedgeExecutor {
    pub fn new(
        venues: Venues,
        trading: &TradingConfig,
        config: &ExecutionConfig,
        taker_leverage: u32,
        clock: Arc<dyn Clock>,
        token: CancellationToken,
        parent: &Span,
    ) -> Self {
        Self {
            venues,
            symbols: trading.instruments.iter().map(|i| i.symbol.clone()).collect(),
            config: config.clone(),
            taker_leverage,
            policy: RetryPolicy::from_config(config),
            stats: Mutex::new(ExecutionStats::default()),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_EXECUTIONS)),
            clock,
            token,
            span: info_span!(parent: parent, "hedge_executor"),
        }
    }

    /// Side that mirrors `side` for `symbol`.
    pub fn hedge_side(&self, symbol: &str, side: OrderSide) -> HedgeResult<OrderSide> {
        if !self.symbols.contains(symbol) {
            return Err(HedgeError::UnsupportedPair {
                symbol: symbol.to_string(),
                side,
            });
        }
        Ok(side.opposite())
    }

    pub fn is_delay_excessive(&self, delay: Duration) -> bool {
        delay > self.config.max_execution_delay()
    }

    pub fn stats(&self) -> ExecutionStats {
        self.stats.lock().clone()
    }

    /// Take the executions recorded since the last call.
    pub fn drain_recent(&self) -> Vec<ExecutionContext> {
        self.recent.lock().drain(..).collect()
    }

    /// Mirror a fill on the other venue.
    pub async fn execute_fast_hedge(&self, request: HedgeRequest) -> HedgeResult<ExecutionContext> {
        self.execute(request).instrument(self.span.clone()).await
    }

    async fn execute(&self, request: HedgeRequest) -> HedgeResult<ExecutionContext> {
        let start_time = self.clock.now();
        let hedge_venue = request.venue.other();

        let hedge_side = match self.hedge_side(&request.symbol, request.original_side) {
            Ok(side) => side,
            Err(e) => {
                error!(symbol = %request.symbol, side = %request.original_side, error = %e, "Cannot hedge fill");
                self.record(&request, hedge_venue, request.original_side, start_time, None, Some(&e));
                return Err(e);
            }
        };

        debug!(
            order_id = %request.order_id,
            symbol = %request.symbol,
            %hedge_venue,
            %hedge_side,
            size = %request.size,
            "Executing hedge"
        );

        let protect = self.config.fast_execution && self.config.price_protection;
        let req = &request;
        let result = self
            .policy
            .run(&self.token, "hedge", move |attempt| async move {
                if protect {
                    self.validate_price(hedge_venue, &req.symbol, req.original_price)
                        .await?;
                }
                debug!(attempt, "Placing hedge order");
                self.venues
                    .execute_now(hedge_venue, &req.symbol, hedge_side, req.size, self.taker_leverage)
                    .await
            })
            .await;

        match result {
            Ok(fill) => {
                let context =
                    self.record(&request, hedge_venue, hedge_side, start_time, Some(&fill), None);
                info!(
                    order_id = %request.order_id,
                    hedge_order_id = %fill.order_id,
                    symbol = %request.symbol,
                    %hedge_side,
                    size = %request.size,
                    price = %fill.price,
                    delay_ms = context.total_delay.as_millis() as u64,
                    "Hedge executed"
                );
                Ok(context)
            }
            Err(e) => {
                self.record(&request, hedge_venue, hedge_side, start_time, None, Some(&e));
                error!(
                    order_id = %request.order_id,
                    symbol = %request.symbol,
                    error = %e,
                    "Hedge failed"
                );
                Err(e)
            }
        }
    }

    async fn validate_price(
        &self,
        venue: VenueId,
        symbol: &str,
        original_price: Decimal,
    ) -> HedgeResult<()> {
        if original_price <= Decimal::ZERO {
            debug!(%symbol, "No original price, skipping price protection");
            return Ok(());
        }

        let reference = self
            .venues
            .price_within(venue, symbol, self.config.price_validity_window())
            .await?;
        let slippage = percentage_diff(original_price, reference);

        if slippage > self.config.max_slippage_percent {
            warn!(
                %symbol,
                original = %original_price,
                %reference,
                slippage_pct = %slippage.round_dp(4),
                max_pct = %self.config.max_slippage_percent,
                "Hedge price outside protection band"
            );
            return Err(HedgeError::PriceRejected {
                symbol: symbol.to_string(),
                original: original_price,
                reference,
                slippage_percent: slippage.round_dp(4),
            });
        }

        Ok(())
    }

    fn record(
        &self,
        request: &HedgeRequest,
        hedge_venue: VenueId,
        hedge_side: OrderSide,
        start_time: DateTime<Utc>,
        fill: Option<&Fill>,
        error: Option<&HedgeError>,
    ) -> ExecutionContext {
        let total_delay = request.detected_at.elapsed();
        let now = self.clock.now();
        let success = fill.is_some();

        self.stats.lock().record(total_delay, success, now);

        if self.is_delay_excessive(total_delay) {
            warn!(
                order_id = %request.order_id,
                delay_ms = total_delay.as_millis() as u64,
                max_ms = self.config.max_execution_delay_ms,
                "Hedge delay exceeded target"
            );
        }

        let context = ExecutionContext {
            order_id: request.order_id.clone(),
            symbol: request.symbol.clone(),
            hedge_venue,
            original_side: request.original_side,
            hedge_side,
            size: request.size,
            original_price: request.original_price,
            execution_price: fill.map(|f| f.price),
            hedge_order_id: fill.map(|f| f.order_id.clone()),
            start_time,
            detection_time: request.detection_time,
            execution_time: fill.map(|_| now),
            total_delay,
            success,
            error_message: error.map(|e| e.to_string()),
        };

        let mut recent = self.recent.lock();
        if recent.len() == RECENT_EXECUTIONS {
            recent.pop_front();
        }
        recent.push_back(context.clone());

        context
    }

    /// Log execution statistics.
    pub fn log_performance_metrics(&self) {
        let stats = self.stats();
        if stats.total_executions == 0 {
            return;
        }
        info!(
            total = stats.total_executions,
            successful = stats.successful_executions,
            failed = stats.failed_executions,
            success_rate = %stats.success_rate().round_dp(1),
            avg_delay_ms = stats.average_delay.as_millis() as u64,
            min_delay_ms = stats.min_delay.unwrap_or_default().as_millis() as u64,
            max_delay_ms = stats.max_delay.as_millis() as u64,
            under_100ms = stats.histogram.under_100ms,
            from_100_to_200ms = stats.histogram.from_100_to_200ms,
            from_200_to_500ms = stats.histogram.from_200_to_500ms,
            over_500ms = stats.histogram.over_500ms,
            "Hedge execution metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{MockMakerVenue, MockTakerVenue};
    use crate::utils::SystemClock;
    use rust_decimal_macros::dec;

    fn request(symbol: &str, side: OrderSide, price: Decimal) -> HedgeRequest {
        HedgeRequest {
            order_id: "m-1".to_string(),
            venue: VenueId::Maker,
            symbol: symbol.to_string(),
            original_side: side,
            size: dec!(1000),
            original_price: price,
            detected_at: Instant::now(),
            detection_time: Utc::now(),
        }
    }

    fn executor(taker: MockTakerVenue, config: ExecutionConfig) -> HedgeExecutor {
        let venues = Venues::new(
            Arc::new(taker),
            Arc::new(MockMakerVenue::new()),
            Duration::from_secs(5),
        );
        HedgeExecutor::new(
            venues,
            &TradingConfig::default(),
            &config,
            3,
            Arc::new(SystemClock),
            CancellationToken::new(),
            &Span::none(),
        )
    }

    fn filled(price: Decimal) -> Fill {
        Fill {
            order_id: "t-1".to_string(),
            price,
        }
    }

    #[test]
    fn test_stats_incremental_average_and_histogram() {
        let mut stats = ExecutionStats::default();
        let now = Utc::now();
        stats.record(Duration::from_millis(50), true, now);
        stats.record(Duration::from_millis(150), true, now);
        stats.record(Duration::from_millis(700), false, now);

        assert_eq!(stats.total_executions, 3);
        assert_eq!(stats.failed_executions, 1);
        assert_eq!(stats.average_delay, Duration::from_millis(300));
        assert_eq!(stats.min_delay, Some(Duration::from_millis(50)));
        assert_eq!(stats.max_delay, Duration::from_millis(700));
        assert_eq!(
            stats.histogram,
            LatencyHistogram {
                under_100ms: 1,
                from_100_to_200ms: 1,
                from_200_to_500ms: 0,
                over_500ms: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_maker_sell_mirrors_to_taker_buy() {
        let mut taker = MockTakerVenue::new();
        taker.expect_get_current_price().returning(|_| Ok(dec!(60000)));
        taker
            .expect_place_taker_long()
            .withf(|symbol, notional, leverage| symbol == "BTC" && *notional == dec!(1000) && *leverage == 3)
            .times(1)
            .returning(|_, _, _| Ok(filled(dec!(60010))));

        let executor = executor(taker, ExecutionConfig::default());
        let context = executor
            .execute_fast_hedge(request("BTC", OrderSide::Sell, dec!(60030)))
            .await
            .unwrap();

        assert!(context.success);
        assert_eq!(context.hedge_side, OrderSide::Buy);
        assert_eq!(context.hedge_venue, VenueId::Taker);
        assert_eq!(context.execution_price, Some(dec!(60010)));
        assert_eq!(executor.stats().successful_executions, 1);
    }

    #[tokio::test]
    async fn test_maker_buy_mirrors_to_taker_sell() {
        let mut taker = MockTakerVenue::new();
        taker.expect_get_current_price().returning(|_| Ok(dec!(3000)));
        taker
            .expect_place_taker_short()
            .times(1)
            .returning(|_, _, _| Ok(filled(dec!(3000))));

        let executor = executor(taker, ExecutionConfig::default());
        let context = executor
            .execute_fast_hedge(request("ETH", OrderSide::Buy, dec!(2999)))
            .await
            .unwrap();
        assert_eq!(context.hedge_side, OrderSide::Sell);
    }

    #[tokio::test]
    async fn test_unsupported_symbol_is_a_hard_error() {
        let executor = executor(MockTakerVenue::new(), ExecutionConfig::default());
        let err = executor
            .execute_fast_hedge(request("DOGE", OrderSide::Sell, dec!(0.1)))
            .await
            .unwrap_err();

        assert!(matches!(err, HedgeError::UnsupportedPair { .. }));
        assert_eq!(executor.stats().failed_executions, 1);
    }

    #[tokio::test]
    async fn test_price_protection_rejects_slippage() {
        let mut taker = MockTakerVenue::new();
        taker.expect_get_current_price().returning(|_| Ok(dec!(60000)));
        taker.expect_place_taker_long().never();

        let executor = executor(taker, ExecutionConfig::default());
        // 0.5% away from the reference, limit is 0.1%
        let err = executor
            .execute_fast_hedge(request("BTC", OrderSide::Sell, dec!(60300)))
            .await
            .unwrap_err();

        match err {
            HedgeError::PriceRejected {
                reference,
                slippage_percent,
                ..
            } => {
                assert_eq!(reference, dec!(60000));
                assert_eq!(slippage_percent, dec!(0.5));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let mut taker = MockTakerVenue::new();
        taker.expect_get_current_price().returning(|_| Ok(dec!(60000)));
        let mut seq = mockall::Sequence::new();
        taker
            .expect_place_taker_long()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(anyhow::anyhow!("gateway timeout")));
        taker
            .expect_place_taker_long()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(filled(dec!(60000))));

        let executor = executor(taker, ExecutionConfig::default());
        let context = executor
            .execute_fast_hedge(request("BTC", OrderSide::Sell, dec!(60000)))
            .await
            .unwrap();
        assert!(context.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_are_recorded_as_failure() {
        let mut taker = MockTakerVenue::new();
        taker.expect_get_current_price().returning(|_| Ok(dec!(60000)));
        taker
            .expect_place_taker_long()
            .times(3)
            .returning(|_, _, _| Err(anyhow::anyhow!("503")));

        let executor = executor(taker, ExecutionConfig::default());
        let err = executor
            .execute_fast_hedge(request("BTC", OrderSide::Sell, dec!(60000)))
            .await
            .unwrap_err();

        assert!(matches!(err, HedgeError::RetriesExhausted { attempts: 3, .. }));
        let recent = executor.drain_recent();
        assert_eq!(recent.len(), 1);
        assert!(!recent[0].success);
        assert!(recent[0].error_message.is_some());
        assert!(executor.drain_recent().is_empty());
    }

    #[tokio::test]
    async fn test_plain_mode_skips_price_check_and_retries() {
        let mut taker = MockTakerVenue::new();
        taker.expect_get_current_price().never();
        taker
            .expect_place_taker_long()
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("rejected")));

        let config = ExecutionConfig {
            fast_execution: false,
            ..ExecutionConfig::default()
        };
        let executor = executor(taker, config);
        let err = executor
            .execute_fast_hedge(request("BTC", OrderSide::Sell, dec!(99999)))
            .await
            .unwrap_err();
        assert!(matches!(err, HedgeError::RetriesExhausted { attempts: 1, .. }));
    }

    #[test]
    fn test_delay_threshold() {
        let executor = executor(MockTakerVenue::new(), ExecutionConfig::default());
        assert!(!executor.is_delay_excessive(Duration::from_millis(500)));
        assert!(executor.is_delay_excessive(Duration::from_millis(501)));
    }
}
