//! Postgres persistence for `RunSummary` rows.
//!
//! One `runs` table, written through short-lived transactions so the
//! connection pool is never held across anything but the insert itself —
//! "the persistence session is scoped to bulk insertion and released even
//! under failure".

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::fmt;

/// Errors surfaced by the persistence collaborator. Always fatal to the run.
#[derive(Debug)]
pub enum PersistError {
    ConnectFailed(String),
    QueryFailed(String),
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::ConnectFailed(msg) => write!(f, "failed to connect to database: {msg}"),
            PersistError::QueryFailed(msg) => write!(f, "query failed: {msg}"),
        }
    }
}

impl std::error::Error for PersistError {}

/// One row of the `runs` table, matching the schema exactly.
#[derive(Clone, Debug, PartialEq)]
pub struct RunRecord {
    pub created_at: DateTime<Utc>,
    pub run_name: String,
    pub symbols: Value,
    pub short_window: i64,
    pub long_window: i64,
    pub initial_cash: f64,
    pub final_equity: f64,
    pub total_return: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub total_commission: f64,
    pub total_slippage_cost: f64,
    pub halted: bool,
    pub halt_reason: Option<String>,
    pub extra: Value,
}

/// Chunk size for bulk inserts (§4.H).
pub const BULK_CHUNK_SIZE: usize = 500;

const CREATE_TABLE_SQL: &str = r#"
create table if not exists runs (
    id bigserial primary key,
    created_at timestamptz not null,
    run_name text not null,
    symbols jsonb not null,
    short_window bigint not null,
    long_window bigint not null,
    initial_cash double precision not null,
    final_equity double precision not null,
    total_return double precision not null,
    sharpe double precision not null,
    max_drawdown double precision not null,
    total_commission double precision not null,
    total_slippage_cost double precision not null,
    halted boolean not null,
    halt_reason text,
    extra jsonb not null
)
"#;

const INSERT_SQL: &str = r#"
insert into runs (
    created_at, run_name, symbols, short_window, long_window, initial_cash,
    final_equity, total_return, sharpe, max_drawdown, total_commission,
    total_slippage_cost, halted, halt_reason, extra
) values (
    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15
)
"#;

/// Owns the connection pool and writes `runs` rows.
pub struct RunWriter {
    pool: PgPool,
}

impl RunWriter {
    pub async fn connect(database_url: &str) -> Result<Self, PersistError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| PersistError::ConnectFailed(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Creates the `runs` table if it does not already exist.
    pub async fn ensure_schema(&self) -> Result<(), PersistError> {
        sqlx::query(CREATE_TABLE_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| PersistError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    pub async fn insert_one(&self, run: &RunRecord) -> Result<(), PersistError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PersistError::QueryFailed(e.to_string()))?;
        bind_insert(sqlx::query(INSERT_SQL), run)
            .execute(&mut *tx)
            .await
            .map_err(|e| PersistError::QueryFailed(e.to_string()))?;
        tx.commit().await.map_err(|e| PersistError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    /// Insert many rows in chunks of [`BULK_CHUNK_SIZE`], each chunk its own
    /// short-lived transaction.
    pub async fn insert_bulk(&self, runs: &[RunRecord]) -> Result<(), PersistError> {
        for chunk in runs.chunks(BULK_CHUNK_SIZE) {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| PersistError::QueryFailed(e.to_string()))?;
            for run in chunk {
                bind_insert(sqlx::query(INSERT_SQL), run)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| PersistError::QueryFailed(e.to_string()))?;
            }
            tx.commit().await.map_err(|e| PersistError::QueryFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Reads every row back out, for round-trip testing (universal invariant 7).
    pub async fn fetch_all(&self) -> Result<Vec<RunRecord>, PersistError> {
        let rows = sqlx::query(
            "select created_at, run_name, symbols, short_window, long_window, initial_cash, \
             final_equity, total_return, sharpe, max_drawdown, total_commission, \
             total_slippage_cost, halted, halt_reason, extra from runs order by id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PersistError::QueryFailed(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                Ok(RunRecord {
                    created_at: row.try_get("created_at").map_err(|e| PersistError::QueryFailed(e.to_string()))?,
                    run_name: row.try_get("run_name").map_err(|e| PersistError::QueryFailed(e.to_string()))?,
                    symbols: row.try_get("symbols").map_err(|e| PersistError::QueryFailed(e.to_string()))?,
                    short_window: row.try_get("short_window").map_err(|e| PersistError::QueryFailed(e.to_string()))?,
                    long_window: row.try_get("long_window").map_err(|e| PersistError::QueryFailed(e.to_string()))?,
                    initial_cash: row.try_get("initial_cash").map_err(|e| PersistError::QueryFailed(e.to_string()))?,
                    final_equity: row.try_get("final_equity").map_err(|e| PersistError::QueryFailed(e.to_string()))?,
                    total_return: row.try_get("total_return").map_err(|e| PersistError::QueryFailed(e.to_string()))?,
                    sharpe: row.try_get("sharpe").map_err(|e| PersistError::QueryFailed(e.to_string()))?,
                    max_drawdown: row.try_get("max_drawdown").map_err(|e| PersistError::QueryFailed(e.to_string()))?,
                    total_commission: row.try_get("total_commission").map_err(|e| PersistError::QueryFailed(e.to_string()))?,
                    total_slippage_cost: row.try_get("total_slippage_cost").map_err(|e| PersistError::QueryFailed(e.to_string()))?,
                    halted: row.try_get("halted").map_err(|e| PersistError::QueryFailed(e.to_string()))?,
                    halt_reason: row.try_get("halt_reason").map_err(|e| PersistError::QueryFailed(e.to_string()))?,
                    extra: row.try_get("extra").map_err(|e| PersistError::QueryFailed(e.to_string()))?,
                })
            })
            .collect()
    }
}

fn bind_insert<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    run: &'q RunRecord,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(run.created_at)
        .bind(&run.run_name)
        .bind(&run.symbols)
        .bind(run.short_window)
        .bind(run.long_window)
        .bind(run.initial_cash)
        .bind(run.final_equity)
        .bind(run.total_return)
        .bind(run.sharpe)
        .bind(run.max_drawdown)
        .bind(run.total_commission)
        .bind(run.total_slippage_cost)
        .bind(run.halted)
        .bind(&run.halt_reason)
        .bind(&run.extra)
}

#[cfg(test)]
mod tests {
    use super::*;

    // These exercise only the pure chunking/query-building logic; they do
    // not require a live Postgres instance (scenario tests under tests/
    // do, and are marked accordingly).
    #[test]
    fn bulk_chunk_size_matches_spec() {
        assert_eq!(BULK_CHUNK_SIZE, 500);
    }

    #[test]
    fn chunks_respect_bulk_chunk_size() {
        let runs: Vec<usize> = (0..1201).collect();
        let chunks: Vec<_> = runs.chunks(BULK_CHUNK_SIZE).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 500);
        assert_eq!(chunks[2].len(), 201);
    }
}
