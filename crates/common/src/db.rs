use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection};

use crate::numeric;
use crate::types::{RawGmp, RawTransfer};

/// Canonical timestamp text stored in the local mirror (UTC).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Async database wrapper around `tokio_rusqlite::Connection`.
///
/// Runs all SQLite operations on a dedicated background thread via
/// `tokio_rusqlite`, keeping the Tokio runtime cooperative. Clone is
/// cheap (shared mpsc sender to the background thread).
#[derive(Clone)]
pub struct AsyncDb {
    conn: tokio_rusqlite::Connection,
}

impl AsyncDb {
    /// Open a database at `path`, register SQL functions, set PRAGMAs and
    /// create the mirror schema, all on the background thread.
    pub async fn open(path: &str) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .with_context(|| format!("AsyncDb::open: {path}"))?;

        conn.call(|conn| -> std::result::Result<(), rusqlite::Error> {
            conn.busy_timeout(std::time::Duration::from_secs(30))?;
            register_functions(conn)?;
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow::anyhow!("AsyncDb::open: schema setup failed: {e}"))?;

        Ok(Self { conn })
    }

    /// Run a closure on the background SQLite thread and return the result.
    ///
    /// The closure receives `&mut rusqlite::Connection` and can perform
    /// arbitrary sync SQLite operations. The result is sent back via oneshot
    /// channel.
    pub async fn call<F, R>(&self, function: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.conn.call(move |conn| function(conn)).await.map_err(
            |e: tokio_rusqlite::Error<anyhow::Error>| match e {
                tokio_rusqlite::Error::ConnectionClosed => {
                    anyhow::anyhow!("database connection closed")
                }
                tokio_rusqlite::Error::Close((_, err)) => {
                    anyhow::anyhow!("database close error: {err}")
                }
                tokio_rusqlite::Error::Error(err) => err,
                other => anyhow::anyhow!("database error: {other}"),
            },
        )
    }

    /// Like [`Self::call`], but records Prometheus metrics for DB latency and errors.
    ///
    /// This measures the full wall-clock time of the operation, including queueing
    /// on the dedicated SQLite thread and execution of all SQL in the closure.
    pub async fn call_named<F, R>(&self, op: &'static str, function: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let start = std::time::Instant::now();
        let res = self.call(function).await;
        let ms = start.elapsed().as_secs_f64() * 1000.0;

        let status = if res.is_ok() { "ok" } else { "err" };
        metrics::histogram!(
            "transfers_db_query_latency_ms",
            "op" => op,
            "status" => status
        )
        .record(ms);
        if res.is_err() {
            metrics::counter!("transfers_db_query_errors_total", "op" => op).increment(1);
        }

        res
    }
}

/// Scalar functions the transfer queries rely on. Must run on every
/// connection before those queries are prepared.
///
/// `try_to_double(x)` mirrors the warehouse's `TRY_TO_DOUBLE`: numeric
/// input or numeric text yields a REAL, anything else yields NULL.
fn register_functions(conn: &Connection) -> std::result::Result<(), rusqlite::Error> {
    conn.create_scalar_function(
        "try_to_double",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| Ok(numeric::sql_number(ctx.get_raw(0))),
    )
}

/// Normalize an exported timestamp to UTC `YYYY-MM-DD HH:MM:SS`.
///
/// Accepts RFC 3339, naive `YYYY-MM-DD[ T]HH:MM:SS[.f]` (taken as UTC),
/// bare dates, and unix epoch seconds or milliseconds.
pub fn normalize_timestamp(raw: &str) -> Result<String> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc).format(TIMESTAMP_FORMAT).to_string());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.format(TIMESTAMP_FORMAT).to_string());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(format!("{d} 00:00:00"));
    }
    if let Ok(n) = s.parse::<i64>() {
        // Heuristic: anything past year 2286 in seconds is milliseconds.
        let dt = if n > 9_999_999_999 {
            DateTime::from_timestamp_millis(n)
        } else {
            DateTime::from_timestamp(n, 0)
        };
        if let Some(dt) = dt {
            return Ok(dt.format(TIMESTAMP_FORMAT).to_string());
        }
    }
    anyhow::bail!("unrecognized timestamp: {raw:?}")
}

/// Insert a raw token-transfer record; ignore if the id already exists.
/// Returns the number of inserted rows (0 or 1).
pub fn insert_raw_transfer(conn: &Connection, rec: &RawTransfer) -> Result<usize> {
    let created_at = normalize_timestamp(&rec.created_at)
        .with_context(|| format!("transfer {}", rec.id))?;
    let n = conn.execute(
        "INSERT OR IGNORE INTO fact_transfers
         (id, created_at, status, simplified_status, sender_address, recipient_address, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            rec.id,
            created_at,
            rec.status,
            rec.simplified_status,
            rec.sender_address,
            rec.recipient_address,
            raw_json(&rec.data),
        ],
    )?;
    Ok(n)
}

/// Insert a raw GMP record; ignore if the id already exists.
pub fn insert_raw_gmp(conn: &Connection, rec: &RawGmp) -> Result<usize> {
    let created_at =
        normalize_timestamp(&rec.created_at).with_context(|| format!("gmp {}", rec.id))?;
    let n = conn.execute(
        "INSERT OR IGNORE INTO fact_gmp (id, created_at, status, simplified_status, data)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            rec.id,
            created_at,
            rec.status,
            rec.simplified_status,
            raw_json(&rec.data),
        ],
    )?;
    Ok(n)
}

fn raw_json(value: &serde_json::Value) -> Option<String> {
    if value.is_null() {
        None
    } else {
        Some(value.to_string())
    }
}

const SCHEMA: &str = r"
-- Local mirror of the bridge explorer's raw fact tables. `data` holds the
-- original nested payload as JSON text; the transfer queries read it with
-- the JSON1 functions.
CREATE TABLE IF NOT EXISTS fact_transfers (
    id TEXT PRIMARY KEY,               -- explorer row id
    created_at TEXT NOT NULL,          -- UTC, YYYY-MM-DD HH:MM:SS
    status TEXT,                       -- executed, ...
    simplified_status TEXT,            -- received, ...
    sender_address TEXT,
    recipient_address TEXT,
    data TEXT,                         -- JSON: send, link, ...
    loaded_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS fact_gmp (
    id TEXT PRIMARY KEY,               -- composite: <tx hash>_<log index>
    created_at TEXT NOT NULL,
    status TEXT,
    simplified_status TEXT,
    data TEXT,                         -- JSON: call, approved, gas, fees, ...
    loaded_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_fact_transfers_created_at ON fact_transfers(created_at);
CREATE INDEX IF NOT EXISTS idx_fact_gmp_created_at ON fact_gmp(created_at);
";
