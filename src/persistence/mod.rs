//! SQLite snapshots of the hedge engine.
//!
//! Persists what an operator needs after a restart or from another shell:
//! - Trading statistics and the current phase
//! - Hedge execution statistics and latency histogram
//! - Ledger positions on both venues
//! - Hedge execution history
//!
//! Snapshots are informational; the engine does not restore from them.

use crate::risk::LedgerSnapshot;
use crate::strategy::{ExecutionContext, ExecutionStats, TradingStats};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Persisted ledger position.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedPosition {
    pub venue: String,
    pub symbol: String,
    pub signed_size: Decimal,
    pub notional_value: Decimal,
    pub leverage: Decimal,
}

/// Persisted execution statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedExecutionStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub avg_delay_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub under_100ms: u64,
    pub from_100_to_200ms: u64,
    pub from_200_to_500ms: u64,
    pub over_500ms: u64,
}

impl From<&ExecutionStats> for PersistedExecutionStats {
    fn from(stats: &ExecutionStats) -> Self {
        let ms = |d: std::time::Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self {
            total: stats.total_executions,
            successful: stats.successful_executions,
            failed: stats.failed_executions,
            avg_delay_ms: ms(stats.average_delay),
            min_delay_ms: ms(stats.min_delay.unwrap_or_default()),
            max_delay_ms: ms(stats.max_delay),
            under_100ms: stats.histogram.under_100ms,
            from_100_to_200ms: stats.histogram.from_100_to_200ms,
            from_200_to_500ms: stats.histogram.from_200_to_500ms,
            over_500ms: stats.histogram.over_500ms,
        }
    }
}

/// Persisted engine state.
#[derive(Debug, Clone)]
pub struct PersistedState {
    pub phase: String,
    pub daily_volume: Decimal,
    pub daily_trades: u64,
    pub total_volume: Decimal,
    pub total_trades: u64,
    pub opening_trades: u64,
    pub closing_trades: u64,
    pub volume_progress: Decimal,
    pub started_at: DateTime<Utc>,
    pub last_trade_time: Option<DateTime<Utc>>,
    pub taker_leverage: Decimal,
    pub maker_leverage: Decimal,
    pub execution: PersistedExecutionStats,
    pub positions: Vec<PersistedPosition>,
    pub last_saved: DateTime<Utc>,
}

impl PersistedState {
    /// Assemble a snapshot from the strategy's read-only views.
    pub fn capture(
        stats: &TradingStats,
        execution: &ExecutionStats,
        ledger: &LedgerSnapshot,
        saved_at: DateTime<Utc>,
    ) -> Self {
        let positions = [&ledger.taker, &ledger.maker]
            .into_iter()
            .flat_map(|book| {
                book.positions.values().map(|p| PersistedPosition {
                    venue: book.venue.to_string(),
                    symbol: p.symbol.clone(),
                    signed_size: p.signed_size,
                    notional_value: p.notional_value,
                    leverage: p.leverage,
                })
            })
            .collect();

        Self {
            phase: stats.current_phase.to_string(),
            daily_volume: stats.daily_volume,
            daily_trades: stats.daily_trades,
            total_volume: stats.total_volume,
            total_trades: stats.total_trades,
            opening_trades: stats.opening_trades,
            closing_trades: stats.closing_trades,
            volume_progress: stats.volume_progress,
            started_at: stats.started_at,
            last_trade_time: stats.last_trade_time,
            taker_leverage: ledger.taker.leverage,
            maker_leverage: ledger.maker.leverage,
            execution: PersistedExecutionStats::from(execution),
            positions,
            last_saved: saved_at,
        }
    }
}

/// One row of hedge execution history.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedExecution {
    pub timestamp: DateTime<Utc>,
    pub order_id: String,
    pub symbol: String,
    pub hedge_venue: String,
    pub hedge_side: String,
    pub size: Decimal,
    pub original_price: Decimal,
    pub execution_price: Option<Decimal>,
    pub delay_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

fn parse_decimal(text: &str) -> Decimal {
    Decimal::from_str(text).unwrap_or_default()
}

fn parse_time(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// SQLite-based persistence manager.
pub struct PersistenceManager {
    conn: Connection,
}

impl PersistenceManager {
    /// Open the database at `db_path`, creating the schema if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {:?}", parent)
                })?;
            }
        }

        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let manager = Self { conn };
        manager.init_schema()?;

        info!("Persistence manager initialized at {:?}", db_path.as_ref());
        Ok(manager)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Engine state (singleton row)
            CREATE TABLE IF NOT EXISTS engine_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                phase TEXT NOT NULL,
                daily_volume TEXT NOT NULL,
                daily_trades INTEGER NOT NULL,
                total_volume TEXT NOT NULL,
                total_trades INTEGER NOT NULL,
                opening_trades INTEGER NOT NULL,
                closing_trades INTEGER NOT NULL,
                volume_progress TEXT NOT NULL,
                started_at TEXT NOT NULL,
                last_trade_time TEXT,
                taker_leverage TEXT NOT NULL,
                maker_leverage TEXT NOT NULL,
                last_saved TEXT NOT NULL
            );

            -- Hedge execution statistics (singleton row)
            CREATE TABLE IF NOT EXISTS execution_stats (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                total INTEGER NOT NULL,
                successful INTEGER NOT NULL,
                failed INTEGER NOT NULL,
                avg_delay_ms INTEGER NOT NULL,
                min_delay_ms INTEGER NOT NULL,
                max_delay_ms INTEGER NOT NULL,
                under_100ms INTEGER NOT NULL,
                from_100_to_200ms INTEGER NOT NULL,
                from_200_to_500ms INTEGER NOT NULL,
                over_500ms INTEGER NOT NULL
            );

            -- Ledger positions
            CREATE TABLE IF NOT EXISTS positions (
                venue TEXT NOT NULL,
                symbol TEXT NOT NULL,
                signed_size TEXT NOT NULL,
                notional_value TEXT NOT NULL,
                leverage TEXT NOT NULL,
                PRIMARY KEY (venue, symbol)
            );

            -- Hedge execution history
            CREATE TABLE IF NOT EXISTS hedge_executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                order_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                hedge_venue TEXT NOT NULL,
                hedge_side TEXT NOT NULL,
                size TEXT NOT NULL,
                original_price TEXT NOT NULL,
                execution_price TEXT,
                delay_ms INTEGER NOT NULL,
                success INTEGER NOT NULL,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_executions_timestamp ON hedge_executions(timestamp);
            CREATE INDEX IF NOT EXISTS idx_executions_symbol ON hedge_executions(symbol);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Save the complete engine state.
    pub fn save_state(&self, state: &PersistedState) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO engine_state (id, phase, daily_volume, daily_trades, total_volume,
                                      total_trades, opening_trades, closing_trades, volume_progress,
                                      started_at, last_trade_time, taker_leverage, maker_leverage,
                                      last_saved)
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(id) DO UPDATE SET
                phase = ?1,
                daily_volume = ?2,
                daily_trades = ?3,
                total_volume = ?4,
                total_trades = ?5,
                opening_trades = ?6,
                closing_trades = ?7,
                volume_progress = ?8,
                started_at = ?9,
                last_trade_time = ?10,
                taker_leverage = ?11,
                maker_leverage = ?12,
                last_saved = ?13
            "#,
            params![
                state.phase,
                state.daily_volume.to_string(),
                state.daily_trades,
                state.total_volume.to_string(),
                state.total_trades,
                state.opening_trades,
                state.closing_trades,
                state.volume_progress.to_string(),
                state.started_at.to_rfc3339(),
                state.last_trade_time.map(|t| t.to_rfc3339()),
                state.taker_leverage.to_string(),
                state.maker_leverage.to_string(),
                state.last_saved.to_rfc3339(),
            ],
        )?;

        let exec = &state.execution;
        tx.execute(
            r#"
            INSERT INTO execution_stats (id, total, successful, failed, avg_delay_ms, min_delay_ms,
                                         max_delay_ms, under_100ms, from_100_to_200ms,
                                         from_200_to_500ms, over_500ms)
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                total = ?1,
                successful = ?2,
                failed = ?3,
                avg_delay_ms = ?4,
                min_delay_ms = ?5,
                max_delay_ms = ?6,
                under_100ms = ?7,
                from_100_to_200ms = ?8,
                from_200_to_500ms = ?9,
                over_500ms = ?10
            "#,
            params![
                exec.total,
                exec.successful,
                exec.failed,
                exec.avg_delay_ms,
                exec.min_delay_ms,
                exec.max_delay_ms,
                exec.under_100ms,
                exec.from_100_to_200ms,
                exec.from_200_to_500ms,
                exec.over_500ms,
            ],
        )?;

        // Clear and reinsert positions
        tx.execute("DELETE FROM positions", [])?;

        for pos in &state.positions {
            tx.execute(
                r#"
                INSERT INTO positions (venue, symbol, signed_size, notional_value, leverage)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    pos.venue,
                    pos.symbol,
                    pos.signed_size.to_string(),
                    pos.notional_value.to_string(),
                    pos.leverage.to_string(),
                ],
            )?;
        }

        tx.commit()?;

        debug!(
            phase = %state.phase,
            total_trades = state.total_trades,
            positions = state.positions.len(),
            "State saved to database"
        );
        Ok(())
    }

    /// Load the last saved engine state.
    pub fn load_state(&self) -> Result<Option<PersistedState>> {
        type StateRow = (
            String,
            String,
            u64,
            String,
            u64,
            u64,
            u64,
            String,
            String,
            Option<String>,
            String,
            String,
            String,
        );

        let state_row: Option<StateRow> = self
            .conn
            .query_row(
                r#"
                SELECT phase, daily_volume, daily_trades, total_volume, total_trades,
                       opening_trades, closing_trades, volume_progress, started_at,
                       last_trade_time, taker_leverage, maker_leverage, last_saved
                FROM engine_state WHERE id = 1
                "#,
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                        row.get(10)?,
                        row.get(11)?,
                        row.get(12)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            phase,
            daily_volume,
            daily_trades,
            total_volume,
            total_trades,
            opening_trades,
            closing_trades,
            volume_progress,
            started_at,
            last_trade_time,
            taker_leverage,
            maker_leverage,
            last_saved,
        )) = state_row
        else {
            return Ok(None);
        };

        let execution = self
            .conn
            .query_row(
                r#"
                SELECT total, successful, failed, avg_delay_ms, min_delay_ms, max_delay_ms,
                       under_100ms, from_100_to_200ms, from_200_to_500ms, over_500ms
                FROM execution_stats WHERE id = 1
                "#,
                [],
                |row| {
                    Ok(PersistedExecutionStats {
                        total: row.get(0)?,
                        successful: row.get(1)?,
                        failed: row.get(2)?,
                        avg_delay_ms: row.get(3)?,
                        min_delay_ms: row.get(4)?,
                        max_delay_ms: row.get(5)?,
                        under_100ms: row.get(6)?,
                        from_100_to_200ms: row.get(7)?,
                        from_200_to_500ms: row.get(8)?,
                        over_500ms: row.get(9)?,
                    })
                },
            )
            .optional()?
            .unwrap_or_default();

        let mut stmt = self.conn.prepare(
            r#"
            SELECT venue, symbol, signed_size, notional_value, leverage
            FROM positions
            ORDER BY venue DESC, symbol
            "#,
        )?;

        let positions: Vec<PersistedPosition> = stmt
            .query_map([], |row| {
                Ok(PersistedPosition {
                    venue: row.get(0)?,
                    symbol: row.get(1)?,
                    signed_size: parse_decimal(&row.get::<_, String>(2)?),
                    notional_value: parse_decimal(&row.get::<_, String>(3)?),
                    leverage: parse_decimal(&row.get::<_, String>(4)?),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        let state = PersistedState {
            phase,
            daily_volume: parse_decimal(&daily_volume),
            daily_trades,
            total_volume: parse_decimal(&total_volume),
            total_trades,
            opening_trades,
            closing_trades,
            volume_progress: parse_decimal(&volume_progress),
            started_at: parse_time(&started_at),
            last_trade_time: last_trade_time.as_deref().map(parse_time),
            taker_leverage: parse_decimal(&taker_leverage),
            maker_leverage: parse_decimal(&maker_leverage),
            execution,
            positions,
            last_saved: parse_time(&last_saved),
        };

        info!(
            phase = %state.phase,
            total_trades = state.total_trades,
            positions = state.positions.len(),
            last_saved = %state.last_saved,
            "Loaded state from database"
        );

        Ok(Some(state))
    }

    /// Append hedge executions to the history table.
    pub fn record_executions(&self, executions: &[ExecutionContext]) -> Result<usize> {
        if executions.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        for ctx in executions {
            tx.execute(
                r#"
                INSERT INTO hedge_executions (timestamp, order_id, symbol, hedge_venue, hedge_side,
                                              size, original_price, execution_price, delay_ms,
                                              success, error)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
                params![
                    ctx.execution_time.unwrap_or(ctx.start_time).to_rfc3339(),
                    ctx.order_id,
                    ctx.symbol,
                    ctx.hedge_venue.to_string(),
                    ctx.hedge_side.to_string(),
                    ctx.size.to_string(),
                    ctx.original_price.to_string(),
                    ctx.execution_price.map(|p| p.to_string()),
                    u64::try_from(ctx.total_delay.as_millis()).unwrap_or(u64::MAX),
                    ctx.success as i32,
                    ctx.error_message,
                ],
            )?;
        }
        tx.commit()?;

        debug!(count = executions.len(), "Hedge executions recorded");
        Ok(executions.len())
    }

    /// Most recent hedge executions, newest first.
    pub fn get_recent_executions(&self, limit: usize) -> Result<Vec<PersistedExecution>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, order_id, symbol, hedge_venue, hedge_side, size, original_price,
                   execution_price, delay_ms, success, error
            FROM hedge_executions
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let executions: Vec<PersistedExecution> = stmt
            .query_map([limit], |row| {
                Ok(PersistedExecution {
                    timestamp: parse_time(&row.get::<_, String>(0)?),
                    order_id: row.get(1)?,
                    symbol: row.get(2)?,
                    hedge_venue: row.get(3)?,
                    hedge_side: row.get(4)?,
                    size: parse_decimal(&row.get::<_, String>(5)?),
                    original_price: parse_decimal(&row.get::<_, String>(6)?),
                    execution_price: row
                        .get::<_, Option<String>>(7)?
                        .as_deref()
                        .map(parse_decimal),
                    delay_ms: row.get(8)?,
                    success: row.get::<_, i32>(9)? != 0,
                    error: row.get(10)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(executions)
    }
}
