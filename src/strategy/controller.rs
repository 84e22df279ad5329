//! Phase controller for the dynamic hedge strategy.
//!
//! Two tasks share one cancellation token:
//! - the control loop: refresh stats, enforce the daily cap, revalue the
//!   ledger, reconcile, evaluate risk and dispatch one opening or closing order
//! - the order tracker: poll resting orders and hedge fills
//!
//! Closing is latched: once entered, the controller keeps closing until every
//! position is flat, even if leverage drops back below the limit.

use super::closing::ClosingManager;
use super::hedge::{ExecutionContext, ExecutionStats, HedgeExecutor};
use super::opening::OpeningManager;
use super::orders::{ActiveOrder, OrderRegistry};
use super::reconciler::{BalanceReconciler, HedgeBalanceStatus, ReconcileReport};
use super::stats::{StatsAggregator, TradeKind, TradingStats};
use super::tracker::{OrderLifecycleTracker, TrackerTick};
use crate::config::Config;
use crate::error::{HedgeError, HedgeResult};
use crate::exchange::{VenueId, Venues};
use crate::risk::{evaluate, EquitySource, LedgerSnapshot, PositionLedger, RiskAction, RiskThresholds};
use crate::utils::Clock;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Strategy phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    #[default]
    Initialized,
    Opening,
    /// Leverage limit reached, waiting before closing
    StopLeverage,
    Closing,
    EmergencyClosing,
    BalanceAdjusting,
    /// Daily trade cap hit; trading resumes after the UTC rollover
    DailyLimitReached,
    Stopped,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initialized => "INITIALIZED",
            Phase::Opening => "OPENING",
            Phase::StopLeverage => "STOP_LEVERAGE",
            Phase::Closing => "CLOSING",
            Phase::EmergencyClosing => "EMERGENCY_CLOSING",
            Phase::BalanceAdjusting => "BALANCE_ADJUSTING",
            Phase::DailyLimitReached => "DAILY_LIMIT_REACHED",
            Phase::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Engine {
    config: Config,
    venues: Venues,
    ledger: Arc<PositionLedger>,
    registry: Arc<OrderRegistry>,
    stats: StatsAggregator,
    executor: Arc<HedgeExecutor>,
    tracker: OrderLifecycleTracker,
    opening: OpeningManager,
    closing: ClosingManager,
    reconciler: BalanceReconciler,
    equity: Arc<dyn EquitySource>,
    thresholds: RiskThresholds,
    clock: Arc<dyn Clock>,
    phase: RwLock<Phase>,
    stopped_since: Mutex<Option<DateTime<Utc>>>,
    closing_latched: AtomicBool,
    span: Span,
}

impl Engine {
    fn phase(&self) -> Phase {
        *self.phase.read()
    }

    fn set_phase(&self, next: Phase) {
        let previous = std::mem::replace(&mut *self.phase.write(), next);
        if previous != next {
            info!(from = %previous, to = %next, "Phase transition");
        }
    }

    async fn run_controller(&self, token: CancellationToken) {
        let monitor = self.config.strategy.monitor_interval();
        let stats_period = Duration::from_secs(self.config.strategy.stats_log_interval_secs.max(1));

        let mut interval = tokio::time::interval(monitor);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats_interval = tokio::time::interval_at(Instant::now() + stats_period, stats_period);

        info!(interval_ms = monitor.as_millis() as u64, "Control loop started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    self.run_cycle().await;
                }
                _ = stats_interval.tick() => {
                    self.stats.refresh(self.phase(), self.registry.len());
                    self.stats.log_stats();
                    self.executor.log_performance_metrics();
                }
            }
        }

        info!("Control loop stopped");
    }

    async fn run_cycle(&self) -> Phase {
        let current = self.phase();
        self.stats.refresh(current, self.registry.len());
        let paused = self.stats.should_pause_for_day();

        self.refresh_ledger().await;

        if self.config.balance.enabled && self.reconciler.is_due() {
            if !self.reconciler.check().is_balanced {
                self.set_phase(Phase::BalanceAdjusting);
            }
            let report = self.reconciler.reconcile(false).await;
            if report.adjustments > 0 {
                self.ledger.recompute_leverage(self.equity.as_ref());
            }
        }

        let now = self.clock.now();
        let snapshot = self.ledger.snapshot();
        let stopped_since = *self.stopped_since.lock();
        let status = evaluate(&snapshot, &self.thresholds, stopped_since, now);

        match status.action {
            RiskAction::StopOpening | RiskAction::StartClosing => {
                self.stopped_since.lock().get_or_insert(now);
            }
            RiskAction::ContinueOpening => *self.stopped_since.lock() = None,
            RiskAction::EmergencyClose => {}
        }

        debug!(
            action = %status.action,
            max_leverage = %status.max_leverage.round_dp(3),
            reason = %status.reason,
            positions = %snapshot,
            "Risk evaluated"
        );

        if status.action == RiskAction::EmergencyClose {
            error!(reason = %status.reason, "Emergency leverage reached, unwinding every position");
            self.set_phase(Phase::EmergencyClosing);
            self.closing.emergency_unwind().await;
            self.ledger.recompute_leverage(self.equity.as_ref());

            let next = if self.ledger.all_positions_zero() {
                *self.stopped_since.lock() = None;
                self.closing_latched.store(false, Ordering::SeqCst);
                Phase::Opening
            } else {
                self.closing_latched.store(true, Ordering::SeqCst);
                Phase::Closing
            };
            self.set_phase(next);
            return next;
        }

        if paused {
            if current != Phase::DailyLimitReached {
                let stats = self.stats.snapshot();
                info!(
                    daily_trades = stats.daily_trades,
                    max_daily_trades = self.config.strategy.max_daily_trades,
                    "Daily trade limit reached, pausing until UTC rollover"
                );
            }
            self.set_phase(Phase::DailyLimitReached);
            return Phase::DailyLimitReached;
        }

        let all_zero = snapshot.all_positions_zero();
        if all_zero {
            self.closing_latched.store(false, Ordering::SeqCst);
        }
        let latched = self.closing_latched.load(Ordering::SeqCst);

        let next = if status.action == RiskAction::StartClosing || latched {
            Phase::Closing
        } else if status.action == RiskAction::StopOpening {
            Phase::StopLeverage
        } else {
            Phase::Opening
        };

        if next == Phase::Closing && !latched {
            warn!(reason = %status.reason, "Leverage held at limit, closing positions");
            self.closing_latched.store(true, Ordering::SeqCst);
        }
        if next == Phase::StopLeverage && current != Phase::StopLeverage {
            warn!(reason = %status.reason, "Leverage limit reached, opening stopped");
        }
        self.set_phase(next);

        if self.can_trade(now) {
            self.dispatch(next).await;
        }

        next
    }

    fn can_trade(&self, now: DateTime<Utc>) -> bool {
        if !self.registry.is_empty() || self.stats.daily_cap_reached() {
            return false;
        }
        let interval = chrono::Duration::from_std(self.config.strategy.trading_interval())
            .unwrap_or(chrono::Duration::MAX);
        self.stats
            .last_trade_time()
            .map_or(true, |last| now - last >= interval)
    }

    async fn dispatch(&self, phase: Phase) {
        let (result, kind) = match phase {
            Phase::Opening => (self.opening.place_opening_order().await, TradeKind::Open),
            Phase::Closing => (self.closing.place_closing_order().await, TradeKind::Close),
            _ => return,
        };

        match result {
            Ok(Some(order)) => self.stats.record_trade(kind, order.requested_size),
            Ok(None) => debug!(%phase, "Nothing to trade"),
            Err(e) => error!(%phase, error = %e, "Order placement failed"),
        }
    }

    /// Mark open positions to current prices and recompute leverage.
    async fn refresh_ledger(&self) {
        let snapshot = self.ledger.snapshot();
        for venue in VenueId::ALL {
            for position in snapshot.venue(venue).positions.values() {
                if position.signed_size.is_zero() {
                    continue;
                }
                match self.venues.current_price(venue, &position.symbol).await {
                    Ok(price) => self.ledger.revalue(venue, &position.symbol, price),
                    Err(e) => warn!(
                        %venue,
                        symbol = %position.symbol,
                        error = %e,
                        "Price refresh failed, keeping last valuation"
                    ),
                }
            }
        }
        self.ledger.recompute_leverage(self.equity.as_ref());
    }
}

/// Cross-venue hedge strategy driven by leverage.
pub struct DynamicHedgeStrategy {
    engine: Arc<Engine>,
    shutdown: CancellationToken,
    tasks: Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl DynamicHedgeStrategy {
    pub fn new(
        venues: Venues,
        config: &Config,
        equity: Arc<dyn EquitySource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let span = info_span!("dynamic_hedge");
        let shutdown = CancellationToken::new();
        let ledger = Arc::new(PositionLedger::new(clock.clone()));
        let registry = Arc::new(OrderRegistry::new());

        let executor = Arc::new(HedgeExecutor::new(
            venues.clone(),
            &config.trading,
            &config.execution,
            config.taker.leverage,
            clock.clone(),
            shutdown.clone(),
            &span,
        ));
        let tracker = OrderLifecycleTracker::new(
            venues.clone(),
            registry.clone(),
            ledger.clone(),
            executor.clone(),
            &config.execution,
            clock.clone(),
            &span,
        );
        let opening = OpeningManager::new(
            venues.clone(),
            registry.clone(),
            ledger.clone(),
            &config.trading,
            config.maker.spread_percent,
            clock.clone(),
            &span,
        );
        let closing = ClosingManager::new(
            venues.clone(),
            registry.clone(),
            ledger.clone(),
            &config.trading,
            config.maker.spread_percent,
            clock.clone(),
            &span,
        );
        let reconciler = BalanceReconciler::new(
            venues.clone(),
            ledger.clone(),
            &config.trading,
            &config.balance,
            config.taker.leverage,
            clock.clone(),
            &span,
        );

        let engine = Engine {
            config: config.clone(),
            venues,
            ledger,
            registry,
            stats: StatsAggregator::new(&config.strategy, clock.clone()),
            executor,
            tracker,
            opening,
            closing,
            reconciler,
            equity,
            thresholds: RiskThresholds::from(&config.risk),
            clock,
            phase: RwLock::new(Phase::Initialized),
            stopped_since: Mutex::new(None),
            closing_latched: AtomicBool::new(false),
            span,
        };

        Self {
            engine: Arc::new(engine),
            shutdown,
            tasks: Mutex::new(None),
        }
    }

    /// Spawn the control loop and the order tracker.
    pub fn start(&self) -> HedgeResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(HedgeError::Stopped);
        }
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            return Err(HedgeError::AlreadyRunning);
        }

        let config = &self.engine.config;
        info!(
            parent: &self.engine.span,
            instruments = config.trading.instruments.len(),
            order_size = %config.trading.order_size,
            max_leverage = %config.risk.max_leverage,
            emergency_leverage = %config.risk.emergency_leverage,
            fast_execution = config.execution.fast_execution,
            "Starting dynamic hedge strategy"
        );

        let controller = tokio::spawn({
            let engine = self.engine.clone();
            let token = self.shutdown.clone();
            let span = engine.span.clone();
            async move { engine.run_controller(token).await }.instrument(span)
        });
        let tracker = tokio::spawn({
            let engine = self.engine.clone();
            let token = self.shutdown.clone();
            async move { engine.tracker.run(token).await }
        });

        *tasks = Some(vec![controller, tracker]);
        Ok(())
    }

    /// Cancel both tasks and wait for them to finish.
    pub async fn stop(&self) {
        let tasks = self.tasks.lock().take();
        self.shutdown.cancel();

        for handle in tasks.into_iter().flatten() {
            if let Err(e) = handle.await {
                error!(parent: &self.engine.span, error = %e, "Strategy task ended abnormally");
            }
        }

        self.engine.set_phase(Phase::Stopped);
        self.engine.stats.refresh(Phase::Stopped, self.engine.registry.len());
        self.engine.stats.log_stats();
        self.engine.executor.log_performance_metrics();
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }

    pub fn phase(&self) -> Phase {
        self.engine.phase()
    }

    pub fn position_summary(&self) -> LedgerSnapshot {
        self.engine.ledger.snapshot()
    }

    pub fn order_summary(&self) -> Vec<ActiveOrder> {
        self.engine.registry.list_active()
    }

    pub fn stats(&self) -> TradingStats {
        self.engine
            .stats
            .refresh(self.engine.phase(), self.engine.registry.len());
        self.engine.stats.snapshot()
    }

    pub fn execution_stats(&self) -> ExecutionStats {
        self.engine.executor.stats()
    }

    /// Hedge executions recorded since the last call.
    pub fn recent_executions(&self) -> Vec<ExecutionContext> {
        self.engine.executor.drain_recent()
    }

    pub fn hedge_balance_status(&self) -> HedgeBalanceStatus {
        self.engine.reconciler.check()
    }

    /// Reconcile now, ignoring the check interval.
    pub async fn force_balance_adjustment(&self) -> ReconcileReport {
        let engine = &self.engine;
        let report = engine.reconciler.reconcile(true).await;
        if report.adjustments > 0 {
            engine.ledger.recompute_leverage(engine.equity.as_ref());
        }
        report
    }

    /// Run one control cycle outside the timer.
    pub async fn run_cycle(&self) -> Phase {
        self.engine
            .run_cycle()
            .instrument(self.engine.span.clone())
            .await
    }

    /// Poll active orders once outside the timer.
    pub async fn check_orders(&self) -> TrackerTick {
        self.engine.tracker.check_orders().await
    }
}
