use chrono::{NaiveDate, NaiveDateTime};
use common::db::TIMESTAMP_FORMAT;
use common::types::ServiceKind;
use common::warehouse::{Cell, Table, WarehouseError};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::labels;

/// KPI scalars for a window. `volume_usd` is `None` when no event in the
/// window had a resolvable USD amount; that is "no priced data", not zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub transfer_count: i64,
    pub user_count: i64,
    pub volume_usd: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesPoint {
    pub bucket_start: NaiveDate,
    pub transfer_count: i64,
    pub user_count: i64,
    pub volume_usd: Option<Decimal>,
}

/// One (source, destination) pair. Unresolvable chains are `None` and form
/// their own group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteRow {
    pub source_chain: Option<String>,
    pub destination_chain: Option<String>,
    pub volume_usd: Option<Decimal>,
    pub transfer_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceRow {
    pub service: ServiceKind,
    pub transfer_count: i64,
    pub user_count: i64,
    pub volume_usd: Option<Decimal>,
    pub fees_usd: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetRow {
    pub asset: Option<String>,
    pub transfer_count: i64,
    pub volume_usd: Option<Decimal>,
}

/// A normalized event as read back from the view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferEvent {
    pub created_at: NaiveDateTime,
    pub event_id: String,
    pub service_kind: ServiceKind,
    pub source_chain: Option<String>,
    pub destination_chain: Option<String>,
    pub user_address: Option<String>,
    pub amount_native: Option<Decimal>,
    pub amount_usd: Option<Decimal>,
    pub fee_usd: Option<Decimal>,
    pub asset: Option<String>,
}

static NULL: Cell = Cell::Null;

fn cell(row: &[Cell], idx: usize) -> &Cell {
    row.get(idx).unwrap_or(&NULL)
}

fn count(row: &[Cell], idx: usize, label: &str) -> Result<i64, WarehouseError> {
    let c = cell(row, idx);
    if c.is_null() {
        return Ok(0);
    }
    c.as_i64()
        .ok_or_else(|| WarehouseError::Query(format!("{label}: expected an integer, got {c:?}")))
}

/// Money and amount fields degrade on their own: a value that doesn't fit
/// a `Decimal` (beyond roughly 7.9e28) reads as unavailable instead of
/// failing the whole result.
fn decimal(row: &[Cell], idx: usize, label: &str) -> Option<Decimal> {
    let c = cell(row, idx);
    if c.is_null() {
        return None;
    }
    let value = c.as_decimal();
    if value.is_none() {
        tracing::warn!(column = label, value = ?c, "numeric value not representable as a decimal");
    }
    value
}

fn text(row: &[Cell], idx: usize) -> Option<String> {
    cell(row, idx).to_text()
}

fn date(row: &[Cell], idx: usize, label: &str) -> Result<NaiveDate, WarehouseError> {
    let raw = text(row, idx).unwrap_or_default();
    raw.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .ok_or_else(|| WarehouseError::Query(format!("{label}: expected a date, got {raw:?}")))
}

fn timestamp(row: &[Cell], idx: usize, label: &str) -> Result<NaiveDateTime, WarehouseError> {
    let raw = text(row, idx).unwrap_or_default();
    raw.get(..19)
        .and_then(|t| NaiveDateTime::parse_from_str(t, TIMESTAMP_FORMAT).ok())
        .ok_or_else(|| {
            WarehouseError::Query(format!("{label}: expected a timestamp, got {raw:?}"))
        })
}

fn service(row: &[Cell], idx: usize) -> Result<ServiceKind, WarehouseError> {
    let raw = text(row, idx).unwrap_or_default();
    ServiceKind::from_str_loose(&raw).ok_or_else(|| {
        WarehouseError::Query(format!("{}: unknown service {raw:?}", labels::SERVICE))
    })
}

/// An aggregate without GROUP BY always yields one row; none at all is
/// treated as an empty window.
pub fn decode_totals(table: &Table) -> Result<Totals, WarehouseError> {
    let txns = table.column(labels::TXNS)?;
    let users = table.column(labels::USERS)?;
    let volume = table.column(labels::VOLUME)?;
    let Some(row) = table.rows.first() else {
        return Ok(Totals::default());
    };
    Ok(Totals {
        transfer_count: count(row, txns, labels::TXNS)?,
        user_count: count(row, users, labels::USERS)?,
        volume_usd: decimal(row, volume, labels::VOLUME),
    })
}

pub fn decode_series(table: &Table) -> Result<Vec<SeriesPoint>, WarehouseError> {
    let bucket = table.column(labels::DATE)?;
    let txns = table.column(labels::TXNS)?;
    let users = table.column(labels::USERS)?;
    let volume = table.column(labels::VOLUME)?;
    table
        .rows
        .iter()
        .map(|row| {
            Ok(SeriesPoint {
                bucket_start: date(row, bucket, labels::DATE)?,
                transfer_count: count(row, txns, labels::TXNS)?,
                user_count: count(row, users, labels::USERS)?,
                volume_usd: decimal(row, volume, labels::VOLUME),
            })
        })
        .collect()
}

pub fn decode_routes(table: &Table) -> Result<Vec<RouteRow>, WarehouseError> {
    let source = table.column(labels::SOURCE_CHAIN)?;
    let destination = table.column(labels::DESTINATION_CHAIN)?;
    let volume = table.column(labels::VOLUME)?;
    let txns = table.column(labels::TXNS)?;
    table
        .rows
        .iter()
        .map(|row| {
            Ok(RouteRow {
                source_chain: text(row, source),
                destination_chain: text(row, destination),
                volume_usd: decimal(row, volume, labels::VOLUME),
                transfer_count: count(row, txns, labels::TXNS)?,
            })
        })
        .collect()
}

pub fn decode_services(table: &Table) -> Result<Vec<ServiceRow>, WarehouseError> {
    let kind = table.column(labels::SERVICE)?;
    let txns = table.column(labels::TXNS)?;
    let users = table.column(labels::USERS)?;
    let volume = table.column(labels::VOLUME)?;
    let fees = table.column(labels::FEES)?;
    table
        .rows
        .iter()
        .map(|row| {
            Ok(ServiceRow {
                service: service(row, kind)?,
                transfer_count: count(row, txns, labels::TXNS)?,
                user_count: count(row, users, labels::USERS)?,
                volume_usd: decimal(row, volume, labels::VOLUME),
                fees_usd: decimal(row, fees, labels::FEES),
            })
        })
        .collect()
}

pub fn decode_assets(table: &Table) -> Result<Vec<AssetRow>, WarehouseError> {
    let asset = table.column(labels::ASSET)?;
    let txns = table.column(labels::TXNS)?;
    let volume = table.column(labels::VOLUME)?;
    table
        .rows
        .iter()
        .map(|row| {
            Ok(AssetRow {
                asset: text(row, asset),
                transfer_count: count(row, txns, labels::TXNS)?,
                volume_usd: decimal(row, volume, labels::VOLUME),
            })
        })
        .collect()
}

pub fn decode_events(table: &Table) -> Result<Vec<TransferEvent>, WarehouseError> {
    let created_at = table.column(labels::CREATED_AT)?;
    let event_id = table.column(labels::EVENT_ID)?;
    let kind = table.column(labels::SERVICE)?;
    let source = table.column(labels::SOURCE_CHAIN)?;
    let destination = table.column(labels::DESTINATION_CHAIN)?;
    let user = table.column(labels::USER)?;
    let asset = table.column(labels::ASSET)?;
    let amount = table.column(labels::AMOUNT)?;
    let amount_usd = table.column(labels::AMOUNT_USD)?;
    let fee_usd = table.column(labels::FEE_USD)?;
    table
        .rows
        .iter()
        .map(|row| {
            Ok(TransferEvent {
                created_at: timestamp(row, created_at, labels::CREATED_AT)?,
                event_id: text(row, event_id).unwrap_or_default(),
                service_kind: service(row, kind)?,
                source_chain: text(row, source),
                destination_chain: text(row, destination),
                user_address: text(row, user),
                amount_native: decimal(row, amount, labels::AMOUNT),
                amount_usd: decimal(row, amount_usd, labels::AMOUNT_USD),
                fee_usd: decimal(row, fee_usd, labels::FEE_USD),
                asset: text(row, asset),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: Vec<Vec<Cell>>) -> Table {
        Table {
            columns: columns.iter().map(ToString::to_string).collect(),
            rows,
        }
    }

    #[test]
    fn test_totals_decoded_by_label_not_position() {
        let t = table(
            &[labels::VOLUME, labels::USERS, labels::TXNS],
            vec![vec![
                Cell::Text("150.5".into()),
                Cell::Int(2),
                Cell::Text("3".into()),
            ]],
        );
        assert_eq!(
            decode_totals(&t).unwrap(),
            Totals {
                transfer_count: 3,
                user_count: 2,
                volume_usd: Some(Decimal::new(1505, 1)),
            }
        );
    }

    #[test]
    fn test_null_volume_stays_none() {
        let t = table(
            &[labels::TXNS, labels::USERS, labels::VOLUME],
            vec![vec![Cell::Int(0), Cell::Int(0), Cell::Null]],
        );
        let totals = decode_totals(&t).unwrap();
        assert_eq!(totals.volume_usd, None);
        assert_eq!(totals.transfer_count, 0);
    }

    #[test]
    fn test_volume_beyond_decimal_range_degrades_to_none() {
        let t = table(
            &[labels::TXNS, labels::USERS, labels::VOLUME],
            vec![vec![Cell::Int(2), Cell::Int(1), Cell::Real(1e29)]],
        );
        let totals = decode_totals(&t).unwrap();
        assert_eq!(totals.transfer_count, 2);
        assert_eq!(totals.volume_usd, None);

        let t = table(
            &[labels::TXNS, labels::USERS, labels::VOLUME],
            vec![vec![Cell::Int(1), Cell::Int(1), Cell::Text("1e29".into())]],
        );
        assert_eq!(decode_totals(&t).unwrap().volume_usd, None);
    }

    #[test]
    fn test_missing_label_is_query_error() {
        let t = table(&[labels::TXNS, labels::USERS], vec![]);
        let err = decode_totals(&t).unwrap_err();
        assert_eq!(err.kind(), "query");
        assert!(err.to_string().contains("Volume (USD)"));
    }

    #[test]
    fn test_series_rejects_unparseable_bucket() {
        let t = table(
            &[labels::DATE, labels::TXNS, labels::USERS, labels::VOLUME],
            vec![vec![
                Cell::Text("last week".into()),
                Cell::Int(1),
                Cell::Int(1),
                Cell::Null,
            ]],
        );
        assert!(decode_series(&t).is_err());
    }

    #[test]
    fn test_events_accept_fractional_timestamps() {
        let t = table(
            &[
                labels::CREATED_AT,
                labels::EVENT_ID,
                labels::SERVICE,
                labels::SOURCE_CHAIN,
                labels::DESTINATION_CHAIN,
                labels::USER,
                labels::ASSET,
                labels::AMOUNT,
                labels::AMOUNT_USD,
                labels::FEE_USD,
            ],
            vec![vec![
                Cell::Text("2025-01-05 10:00:00.123".into()),
                Cell::Text("0xtx_1".into()),
                Cell::Text("message_passing".into()),
                Cell::Text("ethereum".into()),
                Cell::Null,
                Cell::Text("0xuser".into()),
                Cell::Text("USDC".into()),
                Cell::Real(10.0),
                Cell::Null,
                Cell::Real(0.25),
            ]],
        );
        let events = decode_events(&t).unwrap();
        assert_eq!(events[0].service_kind, ServiceKind::MessagePassing);
        assert_eq!(events[0].created_at.to_string(), "2025-01-05 10:00:00");
        assert_eq!(events[0].destination_chain, None);
        assert_eq!(events[0].fee_usd, Some(Decimal::new(25, 2)));
    }
}
