use rusqlite::types::ValueRef;

use super::{Backend, Cell, Param, Query, Table, Warehouse, WarehouseError};
use crate::db::AsyncDb;

/// Local SQLite mirror of the raw fact tables.
#[derive(Clone)]
pub struct SqliteWarehouse {
    db: AsyncDb,
}

impl SqliteWarehouse {
    pub async fn open(path: &str) -> Result<Self, WarehouseError> {
        let db = AsyncDb::open(path)
            .await
            .map_err(|e| WarehouseError::Connection(format!("{e:#}")))?;
        Ok(Self { db })
    }

    /// Underlying handle, for loading fixtures into the mirror.
    pub fn db(&self) -> &AsyncDb {
        &self.db
    }
}

impl Warehouse for SqliteWarehouse {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    async fn execute(&self, query: &Query) -> Result<Table, WarehouseError> {
        let sql = query.sql.clone();
        let params = query.params.clone();
        self.db
            .call_named("warehouse.query", move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let columns: Vec<String> =
                    stmt.column_names().into_iter().map(String::from).collect();
                let width = columns.len();
                let bound = params.iter().map(to_sql_value);
                let mut rows = stmt.query(rusqlite::params_from_iter(bound))?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let mut cells = Vec::with_capacity(width);
                    for i in 0..width {
                        cells.push(to_cell(row.get_ref(i)?));
                    }
                    out.push(cells);
                }
                Ok(Table { columns, rows: out })
            })
            .await
            .map_err(|e| WarehouseError::Query(format!("{e:#}")))
    }
}

fn to_sql_value(param: &Param) -> rusqlite::types::Value {
    match param {
        Param::Int(i) => rusqlite::types::Value::Integer(*i),
        Param::Text(_) | Param::Date(_) => rusqlite::types::Value::Text(param.to_text()),
    }
}

fn to_cell(value: ValueRef<'_>) -> Cell {
    match value {
        ValueRef::Null => Cell::Null,
        ValueRef::Integer(i) => Cell::Int(i),
        ValueRef::Real(r) => Cell::Real(r),
        ValueRef::Text(t) => Cell::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Cell::Text(String::from_utf8_lossy(b).into_owned()),
    }
}
