//! Configuration management for the hedge engine.
//!
//! Loads settings from an optional `config.{toml,yaml,json}` file and
//! `HEDGE__*` environment variables (`.env` is honoured).

use crate::exchange::Direction;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Venue where mirror orders execute immediately
    #[serde(default)]
    pub taker: VenueConfig,
    /// Venue where resting limit orders are placed
    #[serde(default)]
    pub maker: VenueConfig,
    /// Order sizing and the hedged instruments
    #[serde(default)]
    pub trading: TradingConfig,
    /// Leverage limits
    #[serde(default)]
    pub risk: RiskConfig,
    /// Control loop cadence and daily targets
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Cross-venue balance reconciliation
    #[serde(default)]
    pub balance: BalanceConfig,
    /// Fast hedge execution
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Paper venue simulation
    #[serde(default)]
    pub paper: PaperConfig,
    /// SQLite snapshots
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Which connector backs a venue leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VenueKind {
    #[default]
    Paper,
    Binance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    #[serde(default)]
    pub kind: VenueKind,
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret_key: String,
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
    /// Override the REST base URL
    #[serde(default)]
    pub base_url: Option<String>,
    /// Leverage requested for taker orders
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Limit price offset from market for maker orders, in percent
    #[serde(default = "default_spread_percent")]
    pub spread_percent: Decimal,
}

/// One hedged instrument and its direction on the maker venue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstrumentConfig {
    pub symbol: String,
    /// Direction held on the maker venue; the taker venue holds the opposite
    pub maker_direction: Direction,
    /// Base quantity decimals accepted by live venues
    #[serde(default = "default_quantity_precision")]
    pub quantity_precision: u32,
}

impl InstrumentConfig {
    pub fn new(symbol: &str, maker_direction: Direction, quantity_precision: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            maker_direction,
            quantity_precision,
        }
    }

    pub fn taker_direction(&self) -> Direction {
        self.maker_direction.opposite()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Notional per opening/closing order in quote currency
    #[serde(default = "default_order_size")]
    pub order_size: Decimal,
    /// Hedged instruments in priority order (first wins ties)
    #[serde(default = "default_instruments")]
    pub instruments: Vec<InstrumentConfig>,
    /// Quote asset appended to symbols by live connectors
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Price decimals accepted by live venues
    #[serde(default = "default_price_precision")]
    pub price_precision: u32,
}

impl TradingConfig {
    pub fn instrument(&self, symbol: &str) -> Option<&InstrumentConfig> {
        self.instruments.iter().find(|i| i.symbol == symbol)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Leverage at which opening stops
    #[serde(default = "default_max_leverage")]
    pub max_leverage: Decimal,
    /// Leverage at which every position is unwound at market
    #[serde(default = "default_emergency_leverage")]
    pub emergency_leverage: Decimal,
    /// Seconds spent at the leverage limit before closing starts
    #[serde(default = "default_stop_duration")]
    pub stop_duration_secs: u64,
    /// Equity assumed per venue for the leverage proxy
    #[serde(default = "default_reference_equity")]
    pub reference_equity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Control loop interval
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_ms: u64,
    /// Pause for the rest of the UTC day once the trade cap is hit
    #[serde(default = "default_true")]
    pub continuous_mode: bool,
    /// Minimum seconds between new trades
    #[serde(default = "default_trading_interval")]
    pub trading_interval_secs: u64,
    /// Daily traded notional target
    #[serde(default = "default_volume_target")]
    pub volume_target: Decimal,
    /// Daily trade cap (0 = unlimited)
    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,
    /// How often trading statistics are logged
    #[serde(default = "default_stats_log_interval")]
    pub stats_log_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum seconds between reconciliation passes
    #[serde(default = "default_balance_check_interval")]
    pub check_interval_secs: u64,
    /// Allowed imbalance in percent of the expected balance
    #[serde(default = "default_balance_tolerance")]
    pub tolerance_percent: Decimal,
    /// Imbalances at or below this notional are ignored
    #[serde(default = "default_min_adjust_amount")]
    pub min_adjust_amount: Decimal,
    /// Maximum corrective orders per symbol in one pass
    #[serde(default = "default_max_adjust_rounds")]
    pub max_rounds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Retries and price protection on hedges; off = single plain attempt
    #[serde(default = "default_true")]
    pub fast_execution: bool,
    /// Order status polling interval
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,
    /// Hedge delays above this are logged as excessive
    #[serde(default = "default_max_execution_delay")]
    pub max_execution_delay_ms: u64,
    /// Hedge partial fills before the order completes
    #[serde(default = "default_true")]
    pub pre_execution: bool,
    /// Batch partial fills until this fraction is filled (0 = hedge every partial)
    #[serde(default = "default_partial_fill_threshold")]
    pub partial_fill_threshold: Decimal,
    #[serde(default = "default_true")]
    pub price_protection: bool,
    /// Maximum deviation between fill price and hedge reference, in percent
    #[serde(default = "default_max_slippage_percent")]
    pub max_slippage_percent: Decimal,
    /// A reference price older than this is unusable
    #[serde(default = "default_price_validity_window")]
    pub price_validity_window_ms: u64,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Linear backoff base (attempt × base)
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    /// Upper bound on any single venue call
    #[serde(default = "default_venue_call_timeout")]
    pub venue_call_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Starting prices per symbol
    #[serde(default = "default_paper_prices")]
    pub prices: HashMap<String, Decimal>,
    /// Status polls before a resting order is completely filled
    #[serde(default = "default_fill_after_polls")]
    pub fill_after_polls: u32,
    /// Fill half of a resting order on its first poll
    #[serde(default = "default_true")]
    pub partial_fills: bool,
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_leverage() -> u32 {
    3
}

fn default_spread_percent() -> Decimal {
    Decimal::new(1, 1) // 0.1%
}

fn default_quantity_precision() -> u32 {
    5
}

fn default_order_size() -> Decimal {
    Decimal::new(1000, 0) // 1000 USDC per order
}

fn default_instruments() -> Vec<InstrumentConfig> {
    vec![
        InstrumentConfig::new("BTC", Direction::Short, 6),
        InstrumentConfig::new("ETH", Direction::Long, 5),
    ]
}

fn default_quote_asset() -> String {
    "USDC".to_string()
}

fn default_price_precision() -> u32 {
    2
}

fn default_max_leverage() -> Decimal {
    Decimal::new(3, 0) // 3.0x
}

fn default_emergency_leverage() -> Decimal {
    Decimal::new(5, 0) // 5.0x
}

fn default_stop_duration() -> u64 {
    600 // 10 minutes at the limit before closing
}

fn default_reference_equity() -> Decimal {
    Decimal::new(1000, 0)
}

fn default_monitor_interval() -> u64 {
    5_000
}

fn default_trading_interval() -> u64 {
    30
}

fn default_volume_target() -> Decimal {
    Decimal::new(100_000, 0)
}

fn default_max_daily_trades() -> u32 {
    1000
}

fn default_stats_log_interval() -> u64 {
    60
}

fn default_balance_check_interval() -> u64 {
    60
}

fn default_balance_tolerance() -> Decimal {
    Decimal::new(5, 0) // 5%
}

fn default_min_adjust_amount() -> Decimal {
    Decimal::new(50, 0) // 50 USDC
}

fn default_max_adjust_rounds() -> u32 {
    8
}

fn default_check_interval() -> u64 {
    200
}

fn default_max_execution_delay() -> u64 {
    500
}

fn default_partial_fill_threshold() -> Decimal {
    Decimal::ZERO
}

fn default_max_slippage_percent() -> Decimal {
    Decimal::new(1, 1) // 0.1%
}

fn default_price_validity_window() -> u64 {
    1_000
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    100
}

fn default_venue_call_timeout() -> u64 {
    5_000
}

fn default_paper_prices() -> HashMap<String, Decimal> {
    HashMap::from([
        ("BTC".to_string(), Decimal::new(60_000, 0)),
        ("ETH".to_string(), Decimal::new(3_000, 0)),
    ])
}

fn default_fill_after_polls() -> u32 {
    3
}

fn default_fee_rate() -> Decimal {
    Decimal::new(4, 4) // 0.04%
}

fn default_db_path() -> String {
    "data/hedge_state.db".to_string()
}

fn default_snapshot_interval() -> u64 {
    60
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("HEDGE"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.trading.order_size > Decimal::ZERO,
            "order_size must be positive"
        );

        anyhow::ensure!(
            !self.trading.instruments.is_empty(),
            "at least one instrument must be configured"
        );

        let mut seen = HashSet::new();
        for instrument in &self.trading.instruments {
            anyhow::ensure!(
                seen.insert(instrument.symbol.as_str()),
                "instrument {} is configured twice",
                instrument.symbol
            );
        }

        anyhow::ensure!(
            self.risk.max_leverage > Decimal::ZERO
                && self.risk.emergency_leverage > self.risk.max_leverage,
            "leverage limits must satisfy 0 < max_leverage < emergency_leverage"
        );

        anyhow::ensure!(
            self.risk.reference_equity > Decimal::ZERO,
            "reference_equity must be positive"
        );

        anyhow::ensure!(
            self.strategy.monitor_interval_ms > 0 && self.execution.check_interval_ms > 0,
            "loop intervals must be non-zero"
        );

        anyhow::ensure!(
            self.balance.tolerance_percent > Decimal::ZERO
                && self.balance.min_adjust_amount >= Decimal::ZERO,
            "balance tolerance must be positive and min_adjust_amount non-negative"
        );

        anyhow::ensure!(
            self.execution.partial_fill_threshold >= Decimal::ZERO
                && self.execution.partial_fill_threshold <= Decimal::ONE,
            "partial_fill_threshold must be between 0 and 1"
        );

        anyhow::ensure!(
            self.execution.max_retry_attempts >= 1,
            "max_retry_attempts must be at least 1"
        );

        anyhow::ensure!(
            self.taker.leverage >= 1,
            "taker leverage must be at least 1"
        );

        for (leg, venue) in [("taker", &self.taker), ("maker", &self.maker)] {
            if venue.kind == VenueKind::Binance {
                anyhow::ensure!(
                    !venue.api_key.is_empty() && !venue.secret_key.is_empty(),
                    "{} venue requires api_key and secret_key",
                    leg
                );
            }
        }

        Ok(())
    }
}

impl StrategyConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn trading_interval(&self) -> Duration {
        Duration::from_secs(self.trading_interval_secs)
    }
}

impl RiskConfig {
    pub fn stop_duration(&self) -> Duration {
        Duration::from_secs(self.stop_duration_secs)
    }
}

impl BalanceConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

impl ExecutionConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn max_execution_delay(&self) -> Duration {
        Duration::from_millis(self.max_execution_delay_ms)
    }

    pub fn price_validity_window(&self) -> Duration {
        Duration::from_millis(self.price_validity_window_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn venue_call_timeout(&self) -> Duration {
        Duration::from_millis(self.venue_call_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            taker: VenueConfig::default(),
            maker: VenueConfig::default(),
            trading: TradingConfig::default(),
            risk: RiskConfig::default(),
            strategy: StrategyConfig::default(),
            balance: BalanceConfig::default(),
            execution: ExecutionConfig::default(),
            paper: PaperConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            kind: VenueKind::Paper,
            api_key: String::new(),
            secret_key: String::new(),
            testnet: false,
            base_url: None,
            leverage: default_leverage(),
            spread_percent: default_spread_percent(),
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            order_size: default_order_size(),
            instruments: default_instruments(),
            quote_asset: default_quote_asset(),
            price_precision: default_price_precision(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_leverage: default_max_leverage(),
            emergency_leverage: default_emergency_leverage(),
            stop_duration_secs: default_stop_duration(),
            reference_equity: default_reference_equity(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            monitor_interval_ms: default_monitor_interval(),
            continuous_mode: true,
            trading_interval_secs: default_trading_interval(),
            volume_target: default_volume_target(),
            max_daily_trades: default_max_daily_trades(),
            stats_log_interval_secs: default_stats_log_interval(),
        }
    }
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: default_balance_check_interval(),
            tolerance_percent: default_balance_tolerance(),
            min_adjust_amount: default_min_adjust_amount(),
            max_rounds: default_max_adjust_rounds(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            fast_execution: true,
            check_interval_ms: default_check_interval(),
            max_execution_delay_ms: default_max_execution_delay(),
            pre_execution: true,
            partial_fill_threshold: default_partial_fill_threshold(),
            price_protection: true,
            max_slippage_percent: default_max_slippage_percent(),
            price_validity_window_ms: default_price_validity_window(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_backoff_ms: default_retry_backoff(),
            venue_call_timeout_ms: default_venue_call_timeout(),
        }
    }
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            prices: default_paper_prices(),
            fill_after_polls: default_fill_after_polls(),
            partial_fills: true,
            fee_rate: default_fee_rate(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_db_path(),
            snapshot_interval_secs: default_snapshot_interval(),
        }
    }
}
