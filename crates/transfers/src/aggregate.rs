//! Aggregations over the normalized view.
//!
//! Each operation comes as a pure `*_query` builder and an async executor
//! that runs the query through any [`Warehouse`] and decodes the result by
//! label. Window bounds are bound as dates; the view's own parameters come
//! first because the view is rendered first (`WITH events AS (...)`).

use common::types::{DateWindow, Granularity};
use common::warehouse::{Param, Query, Warehouse, WarehouseError};

use crate::labels;
use crate::models::{
    decode_assets, decode_events, decode_routes, decode_series, decode_services, decode_totals,
    AssetRow, RouteRow, SeriesPoint, ServiceRow, Totals, TransferEvent,
};
use crate::view::QueryFragment;

/// Distinct events. Ids are only unique within a service kind.
const DISTINCT_EVENTS: &str = "COUNT(DISTINCT service_kind || ':' || event_id)";
const DISTINCT_USERS: &str = "COUNT(DISTINCT user_address)";

/// `WITH events AS (<view>) SELECT <select> FROM events WHERE <in window> <tail>`.
fn windowed(view: &QueryFragment, window: &DateWindow, select: &str, tail: &str) -> Query {
    let mut params = view.params.clone();
    params.push(Param::Date(window.start()));
    params.push(Param::Date(window.end()));
    let sql = format!(
        "WITH events AS (\n{view_sql}\n)\nSELECT\n{select}\nFROM events\nWHERE {filter}{tail}",
        view_sql = view.sql,
        filter = view.dialect.date_between_params("created_at"),
    );
    Query::new(sql, params)
}

pub fn totals_query(view: &QueryFragment, window: &DateWindow) -> Query {
    let select = format!(
        "    {DISTINCT_EVENTS} AS \"{}\",\n    {DISTINCT_USERS} AS \"{}\",\n    SUM(amount_usd) AS \"{}\"",
        labels::TXNS,
        labels::USERS,
        labels::VOLUME,
    );
    windowed(view, window, &select, "")
}

pub fn time_series_query(
    view: &QueryFragment,
    window: &DateWindow,
    granularity: Granularity,
) -> Query {
    let select = format!(
        "    {bucket} AS \"{}\",\n    {DISTINCT_EVENTS} AS \"{}\",\n    {DISTINCT_USERS} AS \"{}\",\n    SUM(amount_usd) AS \"{}\"",
        labels::DATE,
        labels::TXNS,
        labels::USERS,
        labels::VOLUME,
        bucket = view.dialect.bucket_start("created_at", granularity),
    );
    windowed(view, window, &select, "\nGROUP BY 1\nORDER BY 1 ASC")
}

pub fn route_query(view: &QueryFragment, window: &DateWindow) -> Query {
    let select = format!(
        "    source_chain AS \"{src}\",\n    destination_chain AS \"{dst}\",\n    SUM(amount_usd) AS \"{vol}\",\n    {DISTINCT_EVENTS} AS \"{txns}\"",
        src = labels::SOURCE_CHAIN,
        dst = labels::DESTINATION_CHAIN,
        vol = labels::VOLUME,
        txns = labels::TXNS,
    );
    let tail = format!(
        "\nGROUP BY source_chain, destination_chain\nORDER BY \"{vol}\" DESC NULLS LAST, \"{txns}\" ASC, \"{src}\" ASC NULLS LAST, \"{dst}\" ASC NULLS LAST",
        src = labels::SOURCE_CHAIN,
        dst = labels::DESTINATION_CHAIN,
        vol = labels::VOLUME,
        txns = labels::TXNS,
    );
    windowed(view, window, &select, &tail)
}

pub fn service_query(view: &QueryFragment, window: &DateWindow) -> Query {
    let select = format!(
        "    service_kind AS \"{}\",\n    {DISTINCT_EVENTS} AS \"{}\",\n    {DISTINCT_USERS} AS \"{}\",\n    SUM(amount_usd) AS \"{}\",\n    SUM(fee_usd) AS \"{}\"",
        labels::SERVICE,
        labels::TXNS,
        labels::USERS,
        labels::VOLUME,
        labels::FEES,
    );
    windowed(view, window, &select, "\nGROUP BY service_kind\nORDER BY service_kind ASC")
}

/// `limit` is a typed integer and is rendered into the SQL.
pub fn asset_query(view: &QueryFragment, window: &DateWindow, limit: usize) -> Query {
    let select = format!(
        "    asset AS \"{asset}\",\n    {DISTINCT_EVENTS} AS \"{txns}\",\n    SUM(amount_usd) AS \"{vol}\"",
        asset = labels::ASSET,
        txns = labels::TXNS,
        vol = labels::VOLUME,
    );
    let tail = format!(
        "\nGROUP BY asset\nORDER BY \"{vol}\" DESC NULLS LAST, \"{txns}\" DESC, \"{asset}\" ASC NULLS LAST\nLIMIT {limit}",
        asset = labels::ASSET,
        txns = labels::TXNS,
        vol = labels::VOLUME,
    );
    windowed(view, window, &select, &tail)
}

pub fn recent_events_query(view: &QueryFragment, window: &DateWindow, limit: usize) -> Query {
    let columns = [
        (view.dialect.timestamp_text("created_at"), labels::CREATED_AT),
        ("event_id".to_string(), labels::EVENT_ID),
        ("service_kind".to_string(), labels::SERVICE),
        ("source_chain".to_string(), labels::SOURCE_CHAIN),
        ("destination_chain".to_string(), labels::DESTINATION_CHAIN),
        ("user_address".to_string(), labels::USER),
        ("asset".to_string(), labels::ASSET),
        ("amount_native".to_string(), labels::AMOUNT),
        ("amount_usd".to_string(), labels::AMOUNT_USD),
        ("fee_usd".to_string(), labels::FEE_USD),
    ];
    let select = columns
        .iter()
        .map(|(expr, label)| format!("    {expr} AS \"{label}\""))
        .collect::<Vec<_>>()
        .join(",\n");
    let tail = format!("\nORDER BY created_at DESC, service_kind ASC, event_id ASC\nLIMIT {limit}");
    windowed(view, window, &select, &tail)
}

fn check_dialect<W: Warehouse>(wh: &W, view: &QueryFragment) -> Result<(), WarehouseError> {
    let backend = wh.backend();
    if view.dialect.backend() == backend {
        Ok(())
    } else {
        Err(WarehouseError::Query(format!(
            "view was rendered for {} but the warehouse is {}",
            view.dialect.backend().as_str(),
            backend.as_str()
        )))
    }
}

async fn run<W: Warehouse + Sync>(
    wh: &W,
    view: &QueryFragment,
    op: &'static str,
    query: Query,
) -> Result<common::warehouse::Table, WarehouseError> {
    check_dialect(wh, view)?;
    let table = wh.execute(&query).await?;
    tracing::debug!(op, rows = table.rows.len(), "aggregate executed");
    Ok(table)
}

/// Distinct events, distinct users and priced volume in the window.
pub async fn aggregate_totals<W: Warehouse + Sync>(
    wh: &W,
    view: &QueryFragment,
    window: &DateWindow,
) -> Result<Totals, WarehouseError> {
    let table = run(wh, view, "totals", totals_query(view, window)).await?;
    decode_totals(&table)
}

/// One point per non-empty bucket, ascending.
pub async fn aggregate_time_series<W: Warehouse + Sync>(
    wh: &W,
    view: &QueryFragment,
    window: &DateWindow,
    granularity: Granularity,
) -> Result<Vec<SeriesPoint>, WarehouseError> {
    let table = run(
        wh,
        view,
        "time_series",
        time_series_query(view, window, granularity),
    )
    .await?;
    decode_series(&table)
}

pub async fn aggregate_by_route<W: Warehouse + Sync>(
    wh: &W,
    view: &QueryFragment,
    window: &DateWindow,
) -> Result<Vec<RouteRow>, WarehouseError> {
    let table = run(wh, view, "routes", route_query(view, window)).await?;
    decode_routes(&table)
}

pub async fn aggregate_by_service<W: Warehouse + Sync>(
    wh: &W,
    view: &QueryFragment,
    window: &DateWindow,
) -> Result<Vec<ServiceRow>, WarehouseError> {
    let table = run(wh, view, "services", service_query(view, window)).await?;
    decode_services(&table)
}

pub async fn aggregate_by_asset<W: Warehouse + Sync>(
    wh: &W,
    view: &QueryFragment,
    window: &DateWindow,
    limit: usize,
) -> Result<Vec<AssetRow>, WarehouseError> {
    let table = run(wh, view, "assets", asset_query(view, window, limit)).await?;
    decode_assets(&table)
}

/// Newest events first.
pub async fn recent_events<W: Warehouse + Sync>(
    wh: &W,
    view: &QueryFragment,
    window: &DateWindow,
    limit: usize,
) -> Result<Vec<TransferEvent>, WarehouseError> {
    let table = run(wh, view, "events", recent_events_query(view, window, limit)).await?;
    decode_events(&table)
}
