//! Order lifecycle tracking.
//!
//! Polls the venue of every active order on its own timer, books newly filled
//! notional into the ledger and hands fills to the hedge executor.

use super::hedge::{HedgeExecutor, HedgeRequest};
use super::orders::{ActiveOrder, OrderRegistry};
use crate::config::ExecutionConfig;
use crate::error::HedgeResult;
use crate::exchange::{OrderStatus, Venues};
use crate::risk::PositionLedger;
use crate::utils::Clock;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Outcome of one polling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerTick {
    pub checked: usize,
    pub hedged: usize,
    pub failed: usize,
}

pub struct OrderLifecycleTracker {
    venues: Venues,
    registry: Arc<OrderRegistry>,
    ledger: Arc<PositionLedger>,
    executor: Arc<HedgeExecutor>,
    config: ExecutionConfig,
    clock: Arc<dyn Clock>,
    span: Span,
}

impl OrderLifecycleTracker {
    pub fn new(
        venues: Venues,
        registry: Arc<OrderRegistry>,
        ledger: Arc<PositionLedger>,
        executor: Arc<HedgeExecutor>,
        config: &ExecutionConfig,
        clock: Arc<dyn Clock>,
        parent: &Span,
    ) -> Self {
        Self {
            venues,
            registry,
            ledger,
            executor,
            config: config.clone(),
            clock,
            span: info_span!(parent: parent, "order_tracker"),
        }
    }

    /// Poll until `token` is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        let span = self.span.clone();
        async {
            let mut interval = tokio::time::interval(self.config.check_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = self.config.check_interval_ms, "Order tracker started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        self.check_orders().await;
                    }
                }
            }

            info!("Order tracker stopped");
        }
        .instrument(span)
        .await
    }

    /// Check every active order once.
    pub async fn check_orders(&self) -> TrackerTick {
        let orders = self.registry.list_active();
        let mut tick = TrackerTick {
            checked: orders.len(),
            ..TrackerTick::default()
        };

        for order in orders {
            match self.check_order(&order).await {
                Ok(true) => tick.hedged += 1,
                Ok(false) => {}
                Err(e) => {
                    tick.failed += 1;
                    error!(order = %order.key(), symbol = %order.symbol, error = %e, "Order check failed");
                }
            }
        }

        tick
    }

    /// Returns whether a hedge was executed for `order`.
    async fn check_order(&self, order: &ActiveOrder) -> HedgeResult<bool> {
        let state = self.venues.order_status(order.venue, &order.id).await?;
        let unchanged = state.status == order.status && state.filled_size == order.filled_size;
        if unchanged && order.claimed_size >= order.filled_size {
            return Ok(false);
        }

        let key = order.key();
        let filled = if state.status == OrderStatus::Filled && state.filled_size.is_zero() {
            order.requested_size
        } else {
            state.filled_size
        };

        // claim under the registry lock so overlapping checks hedge a fill once
        let claim = match state.status {
            OrderStatus::Filled => true,
            OrderStatus::Partial => self.should_pre_execute(order, filled),
            OrderStatus::Cancelled | OrderStatus::Pending => false,
        };
        let Some(update) =
            self.registry
                .update_status(&key, state.status, filled, claim, self.clock.now())
        else {
            // Removed while the status call was in flight.
            return Ok(false);
        };
        let previous = update.previous;

        let delta = filled - previous.filled_size;
        if delta > Decimal::ZERO {
            self.ledger
                .apply_fill(order.venue, &order.symbol, order.side, delta, order.price);
        }

        debug!(order = %key, status = ?state.status, %filled, claimed = %update.claimed, "Order status changed");

        match state.status {
            OrderStatus::Filled | OrderStatus::Partial => {
                self.hedge(&previous, update.claimed).await
            }
            OrderStatus::Cancelled => {
                let unhedged = filled - previous.claimed_size;
                if unhedged > Decimal::ZERO {
                    warn!(
                        order = %key,
                        symbol = %order.symbol,
                        %unhedged,
                        "Order cancelled with unhedged fill, leaving it to the reconciler"
                    );
                } else {
                    info!(order = %key, symbol = %order.symbol, "Order cancelled");
                }
                Ok(false)
            }
            OrderStatus::Pending => Ok(false),
        }
    }

    /// Whether a partial fill is hedged now or batched until more fills.
    fn should_pre_execute(&self, order: &ActiveOrder, filled: Decimal) -> bool {
        if !self.config.pre_execution {
            return false;
        }
        let threshold = self.config.partial_fill_threshold;
        threshold.is_zero()
            || (order.requested_size > Decimal::ZERO && filled / order.requested_size >= threshold)
    }

    /// Mirror `amount` of `order`'s fill, releasing the claim on failure.
    async fn hedge(&self, order: &ActiveOrder, amount: Decimal) -> HedgeResult<bool> {
        if amount <= Decimal::ZERO {
            return Ok(false);
        }

        let key = order.key();
        let request = HedgeRequest {
            order_id: order.id.clone(),
            venue: order.venue,
            symbol: order.symbol.clone(),
            original_side: order.side,
            size: amount,
            original_price: order.price,
            detected_at: Instant::now(),
            detection_time: self.clock.now(),
        };

        let context = match self.executor.execute_fast_hedge(request).await {
            Ok(context) => context,
            Err(e) => {
                self.registry.release_claim(&key, amount);
                return Err(e);
            }
        };
        let price = context.execution_price.unwrap_or(order.price);
        self.ledger.apply_fill(
            context.hedge_venue,
            &order.symbol,
            context.hedge_side,
            amount,
            price,
        );
        self.registry.record_hedged(&key, amount);

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PaperConfig, TradingConfig};
    use crate::exchange::{
        Fill, MockMakerVenue, MockTakerVenue, OrderSide, OrderState, PaperVenue, TakerVenue,
        VenueId,
    };
    use crate::utils::SystemClock;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Harness {
        tracker: OrderLifecycleTracker,
        registry: Arc<OrderRegistry>,
        ledger: Arc<PositionLedger>,
    }

    fn harness(taker: MockTakerVenue, maker: MockMakerVenue, config: ExecutionConfig) -> Harness {
        let venues = Venues::new(Arc::new(taker), Arc::new(maker), Duration::from_secs(5));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let registry = Arc::new(OrderRegistry::new());
        let ledger = Arc::new(PositionLedger::new(clock.clone()));
        let executor = Arc::new(HedgeExecutor::new(
            venues.clone(),
            &TradingConfig::default(),
            &config,
            3,
            clock.clone(),
            CancellationToken::new(),
            &Span::none(),
        ));
        let tracker = OrderLifecycleTracker::new(
            venues,
            registry.clone(),
            ledger.clone(),
            executor,
            &config,
            clock,
            &Span::none(),
        );
        Harness {
            tracker,
            registry,
            ledger,
        }
    }

    fn maker_short(registry: &OrderRegistry, id: &str) {
        registry
            .add(ActiveOrder::new(
                id,
                VenueId::Maker,
                "BTC",
                OrderSide::Sell,
                dec!(1000),
                dec!(60000),
                chrono::Utc::now(),
            ))
            .unwrap();
    }

    fn taker_fill(price: Decimal) -> Fill {
        Fill {
            order_id: "t-1".to_string(),
            price,
        }
    }

    #[tokio::test]
    async fn test_filled_order_is_hedged_and_removed() {
        let mut maker = MockMakerVenue::new();
        maker.expect_get_order_status().returning(|_| {
            Ok(OrderState {
                status: OrderStatus::Filled,
                filled_size: dec!(1000),
            })
        });
        let mut taker = MockTakerVenue::new();
        taker.expect_get_current_price().returning(|_| Ok(dec!(60000)));
        taker
            .expect_place_taker_long()
            .withf(|_, notional, _| *notional == dec!(1000))
            .times(1)
            .returning(|_, _, _| Ok(taker_fill(dec!(60000))));

        let h = harness(taker, maker, ExecutionConfig::default());
        maker_short(&h.registry, "m-1");

        let tick = h.tracker.check_orders().await;

        assert_eq!(tick, TrackerTick { checked: 1, hedged: 1, failed: 0 });
        assert!(h.registry.is_empty());
        assert_eq!(h.ledger.exposure(VenueId::Maker, "BTC"), dec!(-1000));
        assert_eq!(h.ledger.exposure(VenueId::Taker, "BTC"), dec!(1000));
    }

    #[tokio::test]
    async fn test_filled_with_zero_reported_uses_requested_size() {
        let mut maker = MockMakerVenue::new();
        maker.expect_get_order_status().returning(|_| {
            Ok(OrderState {
                status: OrderStatus::Filled,
                filled_size: Decimal::ZERO,
            })
        });
        let mut taker = MockTakerVenue::new();
        taker.expect_get_current_price().returning(|_| Ok(dec!(60000)));
        taker
            .expect_place_taker_long()
            .withf(|_, notional, _| *notional == dec!(1000))
            .times(1)
            .returning(|_, _, _| Ok(taker_fill(dec!(60000))));

        let h = harness(taker, maker, ExecutionConfig::default());
        maker_short(&h.registry, "m-1");
        h.tracker.check_orders().await;

        assert_eq!(h.ledger.exposure(VenueId::Taker, "BTC"), dec!(1000));
    }

    #[tokio::test]
    async fn test_partial_fill_hedges_delta() {
        let mut maker = MockMakerVenue::new();
        maker.expect_get_order_status().returning(|_| {
            Ok(OrderState {
                status: OrderStatus::Partial,
                filled_size: dec!(300),
            })
        });
        let mut taker = MockTakerVenue::new();
        taker.expect_get_current_price().returning(|_| Ok(dec!(60000)));
        taker
            .expect_place_taker_long()
            .withf(|_, notional, _| *notional == dec!(300))
            .times(1)
            .returning(|_, _, _| Ok(taker_fill(dec!(60000))));

        let h = harness(taker, maker, ExecutionConfig::default());
        maker_short(&h.registry, "m-1");

        assert_eq!(h.tracker.check_orders().await.hedged, 1);
        // unchanged status on the next poll hedges nothing more
        assert_eq!(h.tracker.check_orders().await.hedged, 0);

        let order = h.registry.list_active().remove(0);
        assert_eq!(order.status, OrderStatus::Partial);
        assert_eq!(order.hedged_size, dec!(300));
        assert_eq!(h.ledger.exposure(VenueId::Maker, "BTC"), dec!(-300));
        assert_eq!(h.ledger.exposure(VenueId::Taker, "BTC"), dec!(300));
    }

    #[tokio::test]
    async fn test_partial_then_cancel_keeps_legs_matched() {
        let mut maker = MockMakerVenue::new();
        let mut seq = mockall::Sequence::new();
        maker
            .expect_get_order_status()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(OrderState {
                    status: OrderStatus::Partial,
                    filled_size: dec!(300),
                })
            });
        maker
            .expect_get_order_status()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(OrderState {
                    status: OrderStatus::Cancelled,
                    filled_size: dec!(300),
                })
            });
        let mut taker = MockTakerVenue::new();
        taker.expect_get_current_price().returning(|_| Ok(dec!(60000)));
        taker
            .expect_place_taker_long()
            .withf(|_, notional, _| *notional == dec!(300))
            .times(1)
            .returning(|_, _, _| Ok(taker_fill(dec!(60000))));

        let h = harness(taker, maker, ExecutionConfig::default());
        maker_short(&h.registry, "m-1");

        assert_eq!(h.tracker.check_orders().await.hedged, 1);
        assert_eq!(h.tracker.check_orders().await.hedged, 0);

        assert!(h.registry.is_empty());
        assert_eq!(h.ledger.exposure(VenueId::Maker, "BTC"), dec!(-300));
        assert_eq!(h.ledger.exposure(VenueId::Taker, "BTC"), dec!(300));
    }

    #[tokio::test]
    async fn test_threshold_batches_partials() {
        let mut maker = MockMakerVenue::new();
        let mut seq = mockall::Sequence::new();
        maker
            .expect_get_order_status()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(OrderState {
                    status: OrderStatus::Partial,
                    filled_size: dec!(300),
                })
            });
        maker
            .expect_get_order_status()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(OrderState {
                    status: OrderStatus::Partial,
                    filled_size: dec!(600),
                })
            });
        let mut taker = MockTakerVenue::new();
        taker.expect_get_current_price().returning(|_| Ok(dec!(60000)));
        taker
            .expect_place_taker_long()
            .withf(|_, notional, _| *notional == dec!(600))
            .times(1)
            .returning(|_, _, _| Ok(taker_fill(dec!(60000))));

        let config = ExecutionConfig {
            partial_fill_threshold: dec!(0.5),
            ..ExecutionConfig::default()
        };
        let h = harness(taker, maker, config);
        maker_short(&h.registry, "m-1");

        // 30% filled is below the opt-in threshold
        assert_eq!(h.tracker.check_orders().await.hedged, 0);
        assert_eq!(h.ledger.exposure(VenueId::Taker, "BTC"), Decimal::ZERO);

        // 60% releases the whole batch
        assert_eq!(h.tracker.check_orders().await.hedged, 1);
        assert_eq!(h.ledger.exposure(VenueId::Taker, "BTC"), dec!(600));
        assert_eq!(h.ledger.exposure(VenueId::Maker, "BTC"), dec!(-600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_partial_hedge_is_retried_next_poll() {
        let mut maker = MockMakerVenue::new();
        maker.expect_get_order_status().returning(|_| {
            Ok(OrderState {
                status: OrderStatus::Partial,
                filled_size: dec!(300),
            })
        });
        let mut taker = MockTakerVenue::new();
        taker.expect_get_current_price().returning(|_| Ok(dec!(60000)));
        let mut seq = mockall::Sequence::new();
        taker
            .expect_place_taker_long()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(anyhow::anyhow!("venue down")));
        taker
            .expect_place_taker_long()
            .withf(|_, notional, _| *notional == dec!(300))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(taker_fill(dec!(60000))));

        let config = ExecutionConfig {
            max_retry_attempts: 1,
            ..ExecutionConfig::default()
        };
        let h = harness(taker, maker, config);
        maker_short(&h.registry, "m-1");

        assert_eq!(h.tracker.check_orders().await.failed, 1);
        assert_eq!(h.registry.list_active()[0].claimed_size, Decimal::ZERO);

        assert_eq!(h.tracker.check_orders().await.hedged, 1);
        assert_eq!(h.ledger.exposure(VenueId::Taker, "BTC"), dec!(300));
    }

    /// Taker whose fills take a while, so two checks of one order overlap.
    #[derive(Default)]
    struct SlowTaker {
        longs: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TakerVenue for SlowTaker {
        async fn place_taker_long(
            &self,
            _symbol: &str,
            _notional: Decimal,
            _leverage: u32,
        ) -> anyhow::Result<Fill> {
            self.longs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(taker_fill(dec!(60000)))
        }

        async fn place_taker_short(
            &self,
            _symbol: &str,
            _notional: Decimal,
            _leverage: u32,
        ) -> anyhow::Result<Fill> {
            anyhow::bail!("unexpected short")
        }

        async fn get_order_status(&self, _order_id: &str) -> anyhow::Result<OrderState> {
            anyhow::bail!("taker orders are not tracked")
        }

        async fn get_current_price(&self, _symbol: &str) -> anyhow::Result<Decimal> {
            Ok(dec!(60000))
        }

        async fn place_market_order(
            &self,
            _symbol: &str,
            _side: OrderSide,
            _notional: Decimal,
        ) -> anyhow::Result<String> {
            anyhow::bail!("unexpected market order")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_checks_hedge_fill_once() {
        let mut maker = MockMakerVenue::new();
        maker.expect_get_order_status().returning(|_| {
            Ok(OrderState {
                status: OrderStatus::Partial,
                filled_size: dec!(600),
            })
        });
        let taker = Arc::new(SlowTaker::default());
        let venues = Venues::new(taker.clone(), Arc::new(maker), Duration::from_secs(5));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let registry = Arc::new(OrderRegistry::new());
        let ledger = Arc::new(PositionLedger::new(clock.clone()));
        let config = ExecutionConfig::default();
        let executor = Arc::new(HedgeExecutor::new(
            venues.clone(),
            &TradingConfig::default(),
            &config,
            3,
            clock.clone(),
            CancellationToken::new(),
            &Span::none(),
        ));
        let tracker = OrderLifecycleTracker::new(
            venues,
            registry.clone(),
            ledger.clone(),
            executor,
            &config,
            clock,
            &Span::none(),
        );
        maker_short(&registry, "m-1");

        // both checks start from the same pre-fill snapshot
        let snapshot = registry.list_active().remove(0);
        let (first, second) =
            tokio::join!(tracker.check_order(&snapshot), tracker.check_order(&snapshot));

        assert_eq!(first.unwrap() as u8 + second.unwrap() as u8, 1);
        assert_eq!(taker.longs.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.exposure(VenueId::Maker, "BTC"), dec!(-600));
        assert_eq!(ledger.exposure(VenueId::Taker, "BTC"), dec!(600));
        assert_eq!(registry.list_active()[0].hedged_size, dec!(600));
    }

    #[tokio::test]
    async fn test_partial_then_fill_hedges_only_remainder() {
        let mut maker = MockMakerVenue::new();
        let mut seq = mockall::Sequence::new();
        maker
            .expect_get_order_status()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(OrderState {
                    status: OrderStatus::Partial,
                    filled_size: dec!(600),
                })
            });
        maker
            .expect_get_order_status()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(OrderState {
                    status: OrderStatus::Filled,
                    filled_size: dec!(1000),
                })
            });

        let mut taker = MockTakerVenue::new();
        taker.expect_get_current_price().returning(|_| Ok(dec!(60000)));
        let mut hedges = mockall::Sequence::new();
        taker
            .expect_place_taker_long()
            .withf(|_, notional, _| *notional == dec!(600))
            .times(1)
            .in_sequence(&mut hedges)
            .returning(|_, _, _| Ok(taker_fill(dec!(60000))));
        taker
            .expect_place_taker_long()
            .withf(|_, notional, _| *notional == dec!(400))
            .times(1)
            .in_sequence(&mut hedges)
            .returning(|_, _, _| Ok(taker_fill(dec!(60000))));

        let h = harness(taker, maker, ExecutionConfig::default());
        maker_short(&h.registry, "m-1");

        assert_eq!(h.tracker.check_orders().await.hedged, 1);
        assert_eq!(h.registry.list_active()[0].hedged_size, dec!(600));

        assert_eq!(h.tracker.check_orders().await.hedged, 1);
        assert_eq!(h.ledger.exposure(VenueId::Taker, "BTC"), dec!(1000));
        assert_eq!(h.ledger.exposure(VenueId::Maker, "BTC"), dec!(-1000));
    }

    #[tokio::test]
    async fn test_partial_without_pre_execution_waits() {
        let mut maker = MockMakerVenue::new();
        maker.expect_get_order_status().returning(|_| {
            Ok(OrderState {
                status: OrderStatus::Partial,
                filled_size: dec!(900),
            })
        });
        let mut taker = MockTakerVenue::new();
        taker.expect_place_taker_long().never();

        let config = ExecutionConfig {
            pre_execution: false,
            ..ExecutionConfig::default()
        };
        let h = harness(taker, maker, config);
        maker_short(&h.registry, "m-1");
        assert_eq!(h.tracker.check_orders().await.hedged, 0);
    }

    #[tokio::test]
    async fn test_cancelled_order_is_not_hedged() {
        let mut maker = MockMakerVenue::new();
        maker.expect_get_order_status().returning(|_| {
            Ok(OrderState {
                status: OrderStatus::Cancelled,
                filled_size: dec!(200),
            })
        });
        let mut taker = MockTakerVenue::new();
        taker.expect_place_taker_long().never();

        let h = harness(taker, maker, ExecutionConfig::default());
        maker_short(&h.registry, "m-1");
        h.tracker.check_orders().await;

        assert!(h.registry.is_empty());
        // the fill nobody saw as partial is left to the reconciler
        assert_eq!(h.ledger.exposure(VenueId::Maker, "BTC"), dec!(-200));
        assert_eq!(h.ledger.exposure(VenueId::Taker, "BTC"), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unfilled_cancel_is_not_hedged() {
        let mut maker = MockMakerVenue::new();
        maker.expect_get_order_status().returning(|_| {
            Ok(OrderState {
                status: OrderStatus::Cancelled,
                filled_size: Decimal::ZERO,
            })
        });
        let mut taker = MockTakerVenue::new();
        taker.expect_place_taker_long().never();

        let h = harness(taker, maker, ExecutionConfig::default());
        maker_short(&h.registry, "m-1");
        assert_eq!(h.tracker.check_orders().await.hedged, 0);
        assert!(h.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_hedge_leaves_ledger_unmirrored() {
        let mut maker = MockMakerVenue::new();
        maker.expect_get_order_status().returning(|_| {
            Ok(OrderState {
                status: OrderStatus::Filled,
                filled_size: dec!(1000),
            })
        });
        let mut taker = MockTakerVenue::new();
        taker.expect_get_current_price().returning(|_| Ok(dec!(60000)));
        taker
            .expect_place_taker_long()
            .returning(|_, _, _| Err(anyhow::anyhow!("venue down")));

        let h = harness(taker, maker, ExecutionConfig::default());
        maker_short(&h.registry, "m-1");
        let tick = h.tracker.check_orders().await;

        assert_eq!(tick.failed, 1);
        assert_eq!(h.ledger.exposure(VenueId::Maker, "BTC"), dec!(-1000));
        assert_eq!(h.ledger.exposure(VenueId::Taker, "BTC"), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_status_error_does_not_stop_other_orders() {
        let mut maker = MockMakerVenue::new();
        maker
            .expect_get_order_status()
            .withf(|id| id == "m-1")
            .returning(|_| Err(anyhow::anyhow!("unknown order")));
        maker
            .expect_get_order_status()
            .withf(|id| id == "m-2")
            .returning(|_| {
                Ok(OrderState {
                    status: OrderStatus::Pending,
                    filled_size: Decimal::ZERO,
                })
            });

        let h = harness(MockTakerVenue::new(), maker, ExecutionConfig::default());
        maker_short(&h.registry, "m-1");
        maker_short(&h.registry, "m-2");

        let tick = h.tracker.check_orders().await;
        assert_eq!(tick, TrackerTick { checked: 2, hedged: 0, failed: 1 });
        assert_eq!(h.registry.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_hedges_paper_fill() {
        let paper = PaperConfig {
            fill_after_polls: 2,
            partial_fills: false,
            ..PaperConfig::default()
        };
        let taker = Arc::new(PaperVenue::new("taker", &paper));
        let maker = Arc::new(PaperVenue::new("maker", &paper));
        let venues = Venues::new(taker.clone(), maker.clone(), Duration::from_secs(5));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let registry = Arc::new(OrderRegistry::new());
        let ledger = Arc::new(PositionLedger::new(clock.clone()));
        let config = ExecutionConfig {
            // paper maker quotes sit exactly one spread away from the taker
            max_slippage_percent: dec!(1),
            ..ExecutionConfig::default()
        };
        let token = CancellationToken::new();
        let executor = Arc::new(HedgeExecutor::new(
            venues.clone(),
            &TradingConfig::default(),
            &config,
            3,
            clock.clone(),
            token.clone(),
            &Span::none(),
        ));
        let tracker = Arc::new(OrderLifecycleTracker::new(
            venues.clone(),
            registry.clone(),
            ledger.clone(),
            executor,
            &config,
            clock,
            &Span::none(),
        ));

        let ack = venues
            .place_resting("BTC", OrderSide::Sell, dec!(1200), dec!(0.1))
            .await
            .unwrap();
        registry
            .add(ActiveOrder::new(
                ack.order_id,
                VenueId::Maker,
                "BTC",
                OrderSide::Sell,
                dec!(1200),
                ack.price,
                chrono::Utc::now(),
            ))
            .unwrap();

        let handle = tokio::spawn({
            let tracker = tracker.clone();
            let token = token.clone();
            async move { tracker.run(token).await }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        handle.await.unwrap();

        assert!(registry.is_empty());
        assert_eq!(ledger.exposure(VenueId::Taker, "BTC"), dec!(1200));
        assert!(taker.position("BTC").await > Decimal::ZERO);
        assert!(maker.position("BTC").await < Decimal::ZERO);
    }
}
