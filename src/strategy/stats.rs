//! Trading statistics with UTC day rollover.

use super::controller::Phase;
use crate::config::StrategyConfig;
use crate::utils::Clock;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// What a recorded trade did to the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradingStats {
    pub daily_volume: Decimal,
    pub daily_trades: u64,
    /// Midnight UTC of the current trading day
    pub daily_start: DateTime<Utc>,
    pub total_volume: Decimal,
    pub total_trades: u64,
    pub opening_trades: u64,
    pub closing_trades: u64,
    pub started_at: DateTime<Utc>,
    pub last_trade_time: Option<DateTime<Utc>>,
    pub current_phase: Phase,
    pub active_orders: usize,
    pub avg_trade_size: Decimal,
    /// Trades per hour since start
    pub trade_frequency: Decimal,
    /// Daily volume in percent of the target, capped at 100
    pub volume_progress: Decimal,
}

fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&at.date_naive().and_time(NaiveTime::MIN))
}

impl TradingStats {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            daily_volume: Decimal::ZERO,
            daily_trades: 0,
            daily_start: start_of_day(now),
            total_volume: Decimal::ZERO,
            total_trades: 0,
            opening_trades: 0,
            closing_trades: 0,
            started_at: now,
            last_trade_time: None,
            current_phase: Phase::Initialized,
            active_orders: 0,
            avg_trade_size: Decimal::ZERO,
            trade_frequency: Decimal::ZERO,
            volume_progress: Decimal::ZERO,
        }
    }
}

pub struct StatsAggregator {
    stats: RwLock<TradingStats>,
    volume_target: Decimal,
    max_daily_trades: u32,
    continuous_mode: bool,
    clock: Arc<dyn Clock>,
}

impl StatsAggregator {
    pub fn new(config: &StrategyConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            stats: RwLock::new(TradingStats::new(clock.now())),
            volume_target: config.volume_target,
            max_daily_trades: config.max_daily_trades,
            continuous_mode: config.continuous_mode,
            clock,
        }
    }

    pub fn snapshot(&self) -> TradingStats {
        self.stats.read().clone()
    }

    /// Roll the day if needed and refresh derived figures.
    pub fn refresh(&self, phase: Phase, active_orders: usize) {
        let now = self.clock.now();
        let mut stats = self.stats.write();
        Self::rollover(&mut stats, now);

        stats.current_phase = phase;
        stats.active_orders = active_orders;
        stats.avg_trade_size = if stats.total_trades > 0 {
            stats.total_volume / Decimal::from(stats.total_trades)
        } else {
            Decimal::ZERO
        };

        let elapsed = (now - stats.started_at).num_seconds();
        stats.trade_frequency = if elapsed > 0 {
            Decimal::from(stats.total_trades) * Decimal::from(3600) / Decimal::from(elapsed)
        } else {
            Decimal::ZERO
        };

        stats.volume_progress = if self.volume_target > Decimal::ZERO {
            (stats.daily_volume / self.volume_target * Decimal::ONE_HUNDRED)
                .min(Decimal::ONE_HUNDRED)
        } else {
            Decimal::ZERO
        };
    }

    pub fn record_trade(&self, kind: TradeKind, notional: Decimal) {
        let now = self.clock.now();
        let mut stats = self.stats.write();
        Self::rollover(&mut stats, now);

        stats.daily_volume += notional;
        stats.daily_trades += 1;
        stats.total_volume += notional;
        stats.total_trades += 1;
        match kind {
            TradeKind::Open => stats.opening_trades += 1,
            TradeKind::Close => stats.closing_trades += 1,
        }
        stats.last_trade_time = Some(now);
    }

    /// Daily trade cap reached in continuous mode.
    pub fn should_pause_for_day(&self) -> bool {
        if !self.continuous_mode || self.max_daily_trades == 0 {
            return false;
        }
        let now = self.clock.now();
        let mut stats = self.stats.write();
        Self::rollover(&mut stats, now);
        stats.daily_trades >= u64::from(self.max_daily_trades)
    }

    pub fn daily_cap_reached(&self) -> bool {
        self.max_daily_trades > 0
            && self.stats.read().daily_trades >= u64::from(self.max_daily_trades)
    }

    pub fn last_trade_time(&self) -> Option<DateTime<Utc>> {
        self.stats.read().last_trade_time
    }

    fn rollover(stats: &mut TradingStats, now: DateTime<Utc>) {
        let today = start_of_day(now);
        if today > stats.daily_start {
            info!(
                previous_day = %stats.daily_start.date_naive(),
                trades = stats.daily_trades,
                volume = %stats.daily_volume.round_dp(2),
                "UTC day rolled over, resetting daily statistics"
            );
            stats.daily_volume = Decimal::ZERO;
            stats.daily_trades = 0;
            stats.daily_start = today;
        }
    }

    pub fn log_stats(&self) {
        let stats = self.snapshot();
        info!(
            phase = %stats.current_phase,
            daily_trades = stats.daily_trades,
            daily_volume = %stats.daily_volume.round_dp(2),
            volume_progress_pct = %stats.volume_progress.round_dp(1),
            total_trades = stats.total_trades,
            total_volume = %stats.total_volume.round_dp(2),
            avg_trade_size = %stats.avg_trade_size.round_dp(2),
            trades_per_hour = %stats.trade_frequency.round_dp(2),
            active_orders = stats.active_orders,
            "Trading statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use rust_decimal_macros::dec;

    fn create_aggregator(max_daily_trades: u32) -> (StatsAggregator, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 10, 22, 0, 0).unwrap());
        let config = StrategyConfig {
            max_daily_trades,
            volume_target: dec!(10000),
            ..StrategyConfig::default()
        };
        (StatsAggregator::new(&config, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_daily_cap_pauses_until_rollover() {
        let (stats, clock) = create_aggregator(10);
        for _ in 0..9 {
            stats.record_trade(TradeKind::Open, dec!(1000));
        }
        assert!(!stats.should_pause_for_day());

        stats.record_trade(TradeKind::Close, dec!(1000));
        assert!(stats.should_pause_for_day());

        clock.advance(chrono::Duration::hours(3));
        assert!(!stats.should_pause_for_day());

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.daily_trades, 0);
        assert_eq!(snapshot.daily_volume, Decimal::ZERO);
        assert_eq!(snapshot.total_trades, 10);
        assert_eq!(
            snapshot.daily_start,
            Utc.with_ymd_and_hms(2024, 5, 11, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_cap_ignored_outside_continuous_mode() {
        let clock = ManualClock::new(Utc::now());
        let config = StrategyConfig {
            continuous_mode: false,
            max_daily_trades: 1,
            ..StrategyConfig::default()
        };
        let stats = StatsAggregator::new(&config, Arc::new(clock));
        stats.record_trade(TradeKind::Open, dec!(10));
        assert!(!stats.should_pause_for_day());
        assert!(stats.daily_cap_reached());
    }

    #[test]
    fn test_zero_cap_means_unlimited() {
        let (stats, _) = create_aggregator(0);
        for _ in 0..50 {
            stats.record_trade(TradeKind::Open, dec!(1));
        }
        assert!(!stats.should_pause_for_day());
        assert!(!stats.daily_cap_reached());
    }

    #[test]
    fn test_derived_figures() {
        let (stats, clock) = create_aggregator(0);
        stats.record_trade(TradeKind::Open, dec!(1000));
        stats.record_trade(TradeKind::Open, dec!(3000));
        stats.record_trade(TradeKind::Close, dec!(2000));
        clock.advance(chrono::Duration::minutes(30));

        stats.refresh(Phase::Opening, 2);
        let snapshot = stats.snapshot();

        assert_eq!(snapshot.avg_trade_size, dec!(2000));
        assert_eq!(snapshot.trade_frequency, dec!(6));
        assert_eq!(snapshot.volume_progress, dec!(60));
        assert_eq!(snapshot.opening_trades, 2);
        assert_eq!(snapshot.closing_trades, 1);
        assert_eq!(snapshot.current_phase, Phase::Opening);
        assert_eq!(snapshot.active_orders, 2);
    }

    #[test]
    fn test_volume_progress_is_capped() {
        let (stats, _) = create_aggregator(0);
        stats.record_trade(TradeKind::Open, dec!(25000));
        stats.refresh(Phase::Opening, 0);
        assert_eq!(stats.snapshot().volume_progress, dec!(100));
    }
}
