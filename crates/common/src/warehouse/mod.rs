//! The warehouse seam: parameterized read-only SQL in, a named-column table out.
//!
//! Query builders never talk to a connection directly. They produce a
//! [`Query`] and hand it to anything implementing [`Warehouse`]: the local
//! SQLite mirror, a Snowflake session, or the [`Cached`] decorator wrapping
//! either.

mod auth;
mod cache;
mod sqlite;
mod snowflake;

pub use auth::{keypair_jwt, public_key_fingerprint};
pub use cache::Cached;
pub use snowflake::SnowflakeWarehouse;
pub use sqlite::SqliteWarehouse;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::future::Future;
use std::str::FromStr;

use crate::config::{BackendKind, WarehouseConfig};

/// SQL flavor a backend speaks. Query builders render per backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Sqlite,
    Snowflake,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Snowflake => "snowflake",
        }
    }
}

/// A bound parameter. Positional, in the order its `?` appears in the SQL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Param {
    Text(String),
    Int(i64),
    Date(NaiveDate),
}

impl Param {
    /// Canonical text form; dates are `YYYY-MM-DD`.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    pub sql: String,
    pub params: Vec<Param>,
}

impl Query {
    pub fn new(sql: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text form of any non-null cell.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Int(i) => Some(i.to_string()),
            Self::Real(r) => Some(r.to_string()),
            Self::Text(s) => Some(s.clone()),
        }
    }

    /// Integer value; numeric text (as warehouse JSON rowsets return) is accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            #[allow(clippy::cast_possible_truncation)]
            Self::Real(r) if r.fract() == 0.0 => Some(*r as i64),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Int(i) => Some(Decimal::from(*i)),
            Self::Real(r) => Decimal::try_from(*r).ok(),
            Self::Text(s) => {
                let t = s.trim();
                Decimal::from_str(t)
                    .or_else(|_| Decimal::from_scientific(t))
                    .ok()
            }
            Self::Null => None,
        }
    }
}

/// Tabular result addressed by column label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the column with exactly this label.
    pub fn column(&self, label: &str) -> Result<usize, WarehouseError> {
        self.columns
            .iter()
            .position(|c| c == label)
            .ok_or_else(|| {
                WarehouseError::Query(format!(
                    "result has no column {label:?} (columns: {:?})",
                    self.columns
                ))
            })
    }
}

/// What can go wrong talking to the warehouse. Display is the whole story:
/// callers show the message and carry on with empty data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WarehouseError {
    /// Authentication or network failure establishing the session.
    #[error("warehouse connection failed: {0}")]
    Connection(String),
    /// Malformed SQL, permission denial, or execution error.
    #[error("query failed: {0}")]
    Query(String),
}

impl WarehouseError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Query(_) => "query",
        }
    }

    /// Short notice for the dashboard.
    pub fn user_message(&self) -> String {
        match self {
            Self::Connection(msg) => format!("Warehouse connection failed: {msg}"),
            Self::Query(msg) => format!("Query failed: {msg}"),
        }
    }
}

/// Something that can run a read-only parameterized query.
pub trait Warehouse {
    fn backend(&self) -> Backend;

    fn execute(
        &self,
        query: &Query,
    ) -> impl Future<Output = Result<Table, WarehouseError>> + Send;
}

/// The concrete backend chosen by configuration.
pub enum WarehouseClient {
    Sqlite(SqliteWarehouse),
    Snowflake(SnowflakeWarehouse),
}

impl WarehouseClient {
    pub fn as_sqlite(&self) -> Option<&SqliteWarehouse> {
        match self {
            Self::Sqlite(w) => Some(w),
            Self::Snowflake(_) => None,
        }
    }
}

impl Warehouse for WarehouseClient {
    fn backend(&self) -> Backend {
        match self {
            Self::Sqlite(w) => w.backend(),
            Self::Snowflake(w) => w.backend(),
        }
    }

    async fn execute(&self, query: &Query) -> Result<Table, WarehouseError> {
        let backend = self.backend().as_str();
        let start = std::time::Instant::now();
        let res = match self {
            Self::Sqlite(w) => w.execute(query).await,
            Self::Snowflake(w) => w.execute(query).await,
        };
        let ms = start.elapsed().as_secs_f64() * 1000.0;

        match &res {
            Ok(table) => {
                metrics::histogram!(
                    "transfers_warehouse_query_latency_ms",
                    "backend" => backend,
                    "status" => "ok"
                )
                .record(ms);
                tracing::debug!(backend, rows = table.rows.len(), ms, "warehouse query");
            }
            Err(e) => {
                metrics::histogram!(
                    "transfers_warehouse_query_latency_ms",
                    "backend" => backend,
                    "status" => "err"
                )
                .record(ms);
                metrics::counter!(
                    "transfers_warehouse_errors_total",
                    "backend" => backend,
                    "kind" => e.kind()
                )
                .increment(1);
            }
        }
        res
    }
}

/// Connection factory: one place that turns configuration into a client.
///
/// SQLite opens (and creates) the mirror immediately. Snowflake only
/// validates that the selected auth mode has its credentials; the session is
/// established on first query.
pub async fn connect(config: &WarehouseConfig) -> Result<WarehouseClient, WarehouseError> {
    match config.backend {
        BackendKind::Sqlite => {
            let sqlite = config.sqlite.as_ref().ok_or_else(|| {
                WarehouseError::Connection("backend = \"sqlite\" needs [warehouse.sqlite]".into())
            })?;
            if let Some(parent) = std::path::Path::new(&sqlite.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| WarehouseError::Connection(format!("{}: {e}", sqlite.path)))?;
                }
            }
            Ok(WarehouseClient::Sqlite(
                SqliteWarehouse::open(&sqlite.path).await?,
            ))
        }
        BackendKind::Snowflake => {
            let sf = config.snowflake.as_ref().ok_or_else(|| {
                WarehouseError::Connection(
                    "backend = \"snowflake\" needs [warehouse.snowflake]".into(),
                )
            })?;
            tracing::info!(
                account = %sf.account,
                user = %sf.user,
                auth_mode = sf.auth_mode.as_str(),
                "configuring snowflake warehouse"
            );
            Ok(WarehouseClient::Snowflake(SnowflakeWarehouse::new(
                sf.clone(),
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SqliteConfig;

    #[test]
    fn test_param_text_forms() {
        let d = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        assert_eq!(Param::Date(d).to_text(), "2025-01-31");
        assert_eq!(Param::Int(7).to_text(), "7");
        assert_eq!(Param::Text("x".into()).to_text(), "x");
    }

    #[test]
    fn test_cell_lenient_accessors() {
        assert_eq!(Cell::Text("3".into()).as_i64(), Some(3));
        assert_eq!(Cell::Real(4.0).as_i64(), Some(4));
        assert_eq!(Cell::Real(4.5).as_i64(), None);
        assert_eq!(Cell::Null.as_i64(), None);
        assert_eq!(
            Cell::Text("150.25".into()).as_decimal(),
            Some(Decimal::new(15025, 2))
        );
        assert_eq!(
            Cell::Text("1.5e2".into()).as_decimal(),
            Some(Decimal::from(150))
        );
        assert_eq!(Cell::Real(150.0).as_decimal(), Some(Decimal::from(150)));
        assert_eq!(Cell::Text("n/a".into()).as_decimal(), None);
    }

    #[test]
    fn test_table_column_lookup_is_exact() {
        let t = Table {
            columns: vec!["Volume (USD)".into()],
            rows: vec![],
        };
        assert_eq!(t.column("Volume (USD)").unwrap(), 0);
        let err = t.column("volume (usd)").unwrap_err();
        assert_eq!(err.kind(), "query");
    }

    #[test]
    fn test_error_messages() {
        let e = WarehouseError::Connection("bad password".into());
        assert_eq!(e.to_string(), "warehouse connection failed: bad password");
        assert_eq!(e.user_message(), "Warehouse connection failed: bad password");
        assert_eq!(
            WarehouseError::Query("no table".into()).user_message(),
            "Query failed: no table"
        );
    }

    #[tokio::test]
    async fn test_connect_sqlite_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mirror.db");
        let config = WarehouseConfig {
            backend: BackendKind::Sqlite,
            sqlite: Some(SqliteConfig {
                path: path.to_str().unwrap().to_string(),
            }),
            snowflake: None,
        };
        let client = connect(&config).await.unwrap();
        assert_eq!(client.backend(), Backend::Sqlite);
        assert!(client.as_sqlite().is_some());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_connect_missing_section_is_connection_error() {
        let config = WarehouseConfig {
            backend: BackendKind::Snowflake,
            sqlite: None,
            snowflake: None,
        };
        let err = connect(&config).await.err().unwrap();
        assert_eq!(err.kind(), "connection");
    }
}
