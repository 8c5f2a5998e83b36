// State store for trailing-stop controllers
// SQLite-based persistence so an interrupted process can resume trailing
// from the last applied stop instead of the initial one.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::replay::ReplayReport;
use crate::trailing::{CloseReason, TrailingSnapshot};
use crate::types::Direction;

// =============================================================================
// Data Models
// =============================================================================

/// Audit record of a position that left its controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub id: Option<i64>,
    pub symbol: String,
    pub direction: Direction,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub initial_stop: f64,
    pub final_stop: f64,
    pub pnl: f64,
    pub r_multiple: f64,
    pub reason: CloseReason,
    pub exit_time: DateTime<Utc>,
}

impl ClosedTrade {
    pub fn from_report(report: &ReplayReport, final_stop: f64) -> Self {
        Self {
            id: None,
            symbol: report.symbol.to_string(),
            direction: report.direction,
            quantity: report.quantity,
            entry_price: report.entry_price,
            exit_price: report.exit_price,
            initial_stop: report.initial_stop,
            final_stop,
            pnl: report.pnl,
            r_multiple: report.r_multiple,
            reason: report.reason,
            exit_time: report.exit_time,
        }
    }
}

// =============================================================================
// State Store Implementation
// =============================================================================

pub struct SqliteStateStore {
    conn: Connection,
}

impl SqliteStateStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let store = Self { conn };
        store.create_tables()?;
        info!("SQLite state store initialized at {}", db_path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self { conn };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS trailing_snapshots (
                symbol TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                current_stop REAL NOT NULL,
                snapshot TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS closed_trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                quantity REAL NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL NOT NULL,
                initial_stop REAL NOT NULL,
                final_stop REAL NOT NULL,
                pnl REAL NOT NULL,
                r_multiple REAL NOT NULL,
                reason TEXT NOT NULL,
                exit_time TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_closed_trades_symbol ON closed_trades(symbol)",
            [],
        )?;

        debug!("Database schema created/verified");
        Ok(())
    }

    /// Insert or replace the snapshot for its symbol
    pub fn save_snapshot(&self, snapshot: &TrailingSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO trailing_snapshots
             (symbol, state, current_stop, snapshot, updated_at)
             VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)",
            params![
                snapshot.position.symbol().as_str(),
                snapshot.state.to_string(),
                snapshot.position.current_stop_price(),
                json,
            ],
        )?;

        debug!(
            "Snapshot saved: {} [{}] stop={:.4}",
            snapshot.position.symbol(),
            snapshot.state,
            snapshot.position.current_stop_price()
        );
        Ok(())
    }

    pub fn load_snapshot(&self, symbol: &str) -> Result<Option<TrailingSnapshot>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT snapshot FROM trailing_snapshots WHERE symbol = ?1",
                params![symbol],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| serde_json::from_str(&j).context("Corrupt trailing snapshot"))
            .transpose()
    }

    pub fn load_snapshots(&self) -> Result<Vec<TrailingSnapshot>> {
        let mut stmt = self
            .conn
            .prepare("SELECT snapshot FROM trailing_snapshots ORDER BY symbol")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let snapshots = rows
            .iter()
            .map(|j| serde_json::from_str(j).context("Corrupt trailing snapshot"))
            .collect::<Result<Vec<TrailingSnapshot>>>()?;

        debug!("Loaded {} trailing snapshots", snapshots.len());
        Ok(snapshots)
    }

    /// Returns true when a snapshot existed
    pub fn remove_snapshot(&self, symbol: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM trailing_snapshots WHERE symbol = ?1",
            params![symbol],
        )?;
        Ok(removed > 0)
    }

    pub fn record_trade(&self, trade: &ClosedTrade) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO closed_trades
             (symbol, direction, quantity, entry_price, exit_price, initial_stop,
              final_stop, pnl, r_multiple, reason, exit_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                trade.symbol,
                trade.direction.to_string(),
                trade.quantity,
                trade.entry_price,
                trade.exit_price,
                trade.initial_stop,
                trade.final_stop,
                trade.pnl,
                trade.r_multiple,
                trade.reason.as_str(),
                trade.exit_time.to_rfc3339(),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        let result = if trade.pnl > 0.0 { "WIN" } else { "LOSS" };
        info!(
            "Trade recorded: {} {} {:.6} @ {:.4} -> {:.4} | PnL {:.4} ({:+.2}R) | {} | {}",
            trade.direction,
            trade.symbol,
            trade.quantity,
            trade.entry_price,
            trade.exit_price,
            trade.pnl,
            trade.r_multiple,
            trade.reason,
            result
        );
        Ok(id)
    }

    pub fn load_trades(&self, symbol_filter: Option<&str>) -> Result<Vec<ClosedTrade>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, symbol, direction, quantity, entry_price, exit_price, initial_stop,
                    final_stop, pnl, r_multiple, reason, exit_time
             FROM closed_trades
             WHERE ?1 IS NULL OR symbol = ?1
             ORDER BY id",
        )?;

        let rows = stmt
            .query_map(params![symbol_filter], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, f64>(7)?,
                    row.get::<_, f64>(8)?,
                    row.get::<_, f64>(9)?,
                    row.get::<_, String>(10)?,
                    row.get::<_, String>(11)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(id, symbol, direction, quantity, entry, exit, initial, fin, pnl, r, reason, time)|
                 -> Result<ClosedTrade> {
                    Ok(ClosedTrade {
                        id: Some(id),
                        symbol,
                        direction: direction.parse().map_err(anyhow::Error::msg)?,
                        quantity,
                        entry_price: entry,
                        exit_price: exit,
                        initial_stop: initial,
                        final_stop: fin,
                        pnl,
                        r_multiple: r,
                        reason: reason.parse().map_err(anyhow::Error::msg)?,
                        exit_time: DateTime::parse_from_rfc3339(&time)?.with_timezone(&Utc),
                    })
                },
            )
            .collect()
    }

    /// Write all snapshots and trades to a JSON file
    pub fn export_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let state = serde_json::json!({
            "exported_at": Utc::now().to_rfc3339(),
            "snapshots": self.load_snapshots()?,
            "trades": self.load_trades(None)?,
        });

        std::fs::write(path.as_ref(), serde_json::to_string_pretty(&state)?)?;
        debug!("State exported to: {}", path.as_ref().display());
        Ok(())
    }
}
