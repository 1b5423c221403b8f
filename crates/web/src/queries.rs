//! Panel data for the dashboard. This is the render boundary: warehouse
//! failures and bad window parameters become a notice plus empty data,
//! never an error response.

use chrono::NaiveDate;
use common::config::Dashboard;
use common::types::{DateWindow, Granularity};
use common::warehouse::WarehouseError;
use serde::Deserialize;

use crate::models::{
    AssetView, ChartData, EventView, KpiCards, RouteView, SeriesRow, ServiceView,
};
use crate::AppState;

/// Raw `start` / `end` / `granularity` query parameters, as carried by the
/// dashboard form. Blank values count as absent.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct WindowParams {
    pub start: Option<String>,
    pub end: Option<String>,
    pub granularity: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub window: DateWindow,
    pub granularity: Granularity,
}

fn present(v: Option<&String>) -> Option<&str> {
    v.map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| format!("Invalid {field} date {raw:?}: expected YYYY-MM-DD ({e})"))
}

/// Missing `end` is today; missing `start` is `default_window_days` back
/// from `end`. An unknown granularity falls back to the configured default.
pub fn resolve(
    params: &WindowParams,
    dashboard: &Dashboard,
    today: NaiveDate,
) -> Result<Selection, String> {
    let end = match present(params.end.as_ref()) {
        Some(raw) => parse_date("end", raw)?,
        None => today,
    };
    let start = match present(params.start.as_ref()) {
        Some(raw) => parse_date("start", raw)?,
        None => DateWindow::trailing(end, dashboard.default_window_days)
            .map_err(|e| format!("Invalid window: {e}"))?
            .start(),
    };
    let window = DateWindow::new(start, end).map_err(|e| format!("Invalid window: {e}"))?;
    let granularity = present(params.granularity.as_ref())
        .and_then(Granularity::from_str_loose)
        .unwrap_or(dashboard.default_granularity);
    Ok(Selection {
        window,
        granularity,
    })
}

/// Values the form shows when the page is opened without parameters or
/// with ones that don't resolve. A window too long to represent collapses
/// to `today`.
pub fn form_defaults(dashboard: &Dashboard, today: NaiveDate) -> Selection {
    let window = DateWindow::trailing(today, dashboard.default_window_days).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "default window out of range, showing today only");
        DateWindow::single(today)
    });
    Selection {
        window,
        granularity: dashboard.default_granularity,
    }
}

/// What a panel template receives.
pub struct Panel<T> {
    pub notice: Option<String>,
    pub data: T,
}

impl<T: Default> Panel<T> {
    fn empty(notice: String) -> Self {
        Self {
            notice: Some(notice),
            data: T::default(),
        }
    }
}

/// Turn a warehouse result into panel data, logging and counting failures.
pub fn settle<T: Default>(panel: &'static str, result: Result<T, WarehouseError>) -> Panel<T> {
    match result {
        Ok(data) => {
            crate::metrics::record_panel(panel, "ok");
            Panel { notice: None, data }
        }
        Err(e) => {
            tracing::error!(panel, kind = e.kind(), error = %e, "panel query failed");
            crate::metrics::record_panel(panel, "error");
            Panel::empty(e.user_message())
        }
    }
}

fn rejected<T: Default>(panel: &'static str, reason: String) -> Panel<T> {
    tracing::warn!(panel, %reason, "panel window rejected");
    crate::metrics::record_panel(panel, "invalid_window");
    Panel::empty(reason)
}

/// Time-series panel payload: table rows plus chart input.
#[derive(Default)]
pub struct SeriesData {
    pub granularity: &'static str,
    pub rows: Vec<SeriesRow>,
    pub chart: ChartData,
}

pub async fn kpis(
    state: &AppState,
    params: &WindowParams,
    today: NaiveDate,
) -> Panel<Option<KpiCards>> {
    let sel = match resolve(params, &state.dashboard, today) {
        Ok(sel) => sel,
        Err(reason) => return rejected("kpis", reason),
    };
    let result = transfers::aggregate_totals(&state.warehouse, &state.view, &sel.window).await;
    settle("kpis", result.map(|t| Some(KpiCards::from(&t))))
}

pub async fn series(
    state: &AppState,
    params: &WindowParams,
    today: NaiveDate,
) -> Panel<SeriesData> {
    let sel = match resolve(params, &state.dashboard, today) {
        Ok(sel) => sel,
        Err(reason) => return rejected("series", reason),
    };
    let result = transfers::aggregate_time_series(
        &state.warehouse,
        &state.view,
        &sel.window,
        sel.granularity,
    )
    .await;
    settle(
        "series",
        result.map(|points| SeriesData {
            granularity: sel.granularity.as_str(),
            rows: points.iter().map(SeriesRow::from).collect(),
            chart: ChartData::from_points(&points),
        }),
    )
}

pub async fn routes(
    state: &AppState,
    params: &WindowParams,
    today: NaiveDate,
) -> Panel<Vec<RouteView>> {
    let sel = match resolve(params, &state.dashboard, today) {
        Ok(sel) => sel,
        Err(reason) => return rejected("routes", reason),
    };
    let result = transfers::aggregate_by_route(&state.warehouse, &state.view, &sel.window).await;
    settle(
        "routes",
        result.map(|rows| rows.iter().map(RouteView::from).collect()),
    )
}

pub async fn services(
    state: &AppState,
    params: &WindowParams,
    today: NaiveDate,
) -> Panel<Vec<ServiceView>> {
    let sel = match resolve(params, &state.dashboard, today) {
        Ok(sel) => sel,
        Err(reason) => return rejected("services", reason),
    };
    let result =
        transfers::aggregate_by_service(&state.warehouse, &state.view, &sel.window).await;
    settle(
        "services",
        result.map(|rows| rows.iter().map(ServiceView::from).collect()),
    )
}

pub async fn assets(
    state: &AppState,
    params: &WindowParams,
    today: NaiveDate,
) -> Panel<Vec<AssetView>> {
    let sel = match resolve(params, &state.dashboard, today) {
        Ok(sel) => sel,
        Err(reason) => return rejected("assets", reason),
    };
    let result = transfers::aggregate_by_asset(
        &state.warehouse,
        &state.view,
        &sel.window,
        state.dashboard.top_assets,
    )
    .await;
    settle(
        "assets",
        result.map(|rows| rows.iter().map(AssetView::from).collect()),
    )
}

pub async fn events(
    state: &AppState,
    params: &WindowParams,
    today: NaiveDate,
) -> Panel<Vec<EventView>> {
    let sel = match resolve(params, &state.dashboard, today) {
        Ok(sel) => sel,
        Err(reason) => return rejected("events", reason),
    };
    let result = transfers::recent_events(
        &state.warehouse,
        &state.view,
        &sel.window,
        state.dashboard.recent_events,
    )
    .await;
    settle(
        "events",
        result.map(|rows| rows.iter().map(EventView::from).collect()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    fn dashboard() -> Dashboard {
        Dashboard {
            title: "Transfers".into(),
            default_window_days: 30,
            default_granularity: Granularity::Day,
            allowlist: vec!["0xabc".into()],
            top_assets: 10,
            recent_events: 25,
        }
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn params(start: &str, end: &str, granularity: &str) -> WindowParams {
        WindowParams {
            start: Some(start.into()),
            end: Some(end.into()),
            granularity: Some(granularity.into()),
        }
    }

    #[test]
    fn test_resolve_defaults_to_trailing_window() {
        let sel = resolve(&WindowParams::default(), &dashboard(), d("2025-01-31")).unwrap();
        assert_eq!(sel.window.start(), d("2025-01-02"));
        assert_eq!(sel.window.end(), d("2025-01-31"));
        assert_eq!(sel.granularity, Granularity::Day);
    }

    #[test]
    fn test_resolve_blank_fields_are_absent() {
        let sel = resolve(&params(" ", "", "weekly"), &dashboard(), d("2025-01-31")).unwrap();
        assert_eq!(sel.window.end(), d("2025-01-31"));
        assert_eq!(sel.granularity, Granularity::Week);
    }

    #[test]
    fn test_resolve_unknown_granularity_falls_back() {
        let sel = resolve(
            &params("2025-01-01", "2025-01-31", "hourly"),
            &dashboard(),
            d("2025-02-01"),
        )
        .unwrap();
        assert_eq!(sel.granularity, Granularity::Day);
    }

    #[test]
    fn test_resolve_rejects_bad_and_reversed_dates() {
        let bad = resolve(&params("01/05/2025", "", ""), &dashboard(), d("2025-01-31"));
        assert!(bad.unwrap_err().contains("expected YYYY-MM-DD"));

        let reversed = resolve(
            &params("2025-02-01", "2025-01-01", "day"),
            &dashboard(),
            d("2025-03-01"),
        );
        assert!(reversed.unwrap_err().starts_with("Invalid window"));
    }

    #[test]
    fn test_resolve_rejects_end_at_date_range_floor() {
        let end = NaiveDate::MIN.to_string();
        let open_start = WindowParams {
            start: None,
            end: Some(end.clone()),
            granularity: None,
        };
        let err = resolve(&open_start, &dashboard(), d("2025-01-31")).unwrap_err();
        assert!(err.starts_with("Invalid window"), "got: {err}");

        // An explicit start is still accepted down there.
        let sel = resolve(&params(&end, &end, "day"), &dashboard(), d("2025-01-31")).unwrap();
        assert_eq!(sel.window.start(), NaiveDate::MIN);
    }

    #[test]
    fn test_resolve_rejects_oversized_default_window() {
        let dashboard = Dashboard {
            default_window_days: u32::MAX,
            ..dashboard()
        };
        let err = resolve(&WindowParams::default(), &dashboard, d("2025-01-31")).unwrap_err();
        assert!(err.starts_with("Invalid window"), "got: {err}");

        let sel = form_defaults(&dashboard, d("2025-01-31"));
        assert_eq!(sel.window.start(), d("2025-01-31"));
        assert_eq!(sel.window.end(), d("2025-01-31"));
    }

    #[test]
    fn test_form_defaults_match_trailing_window() {
        let sel = form_defaults(&dashboard(), d("2025-01-31"));
        assert_eq!(sel.window.start(), d("2025-01-02"));
    }

    #[test]
    fn test_settle_counts_and_words_failures() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        let panel: Panel<Vec<RouteView>> = metrics::with_local_recorder(&recorder, || {
            settle(
                "routes",
                Err(WarehouseError::Connection("login refused".into())),
            )
        });
        assert!(panel.data.is_empty());
        assert_eq!(
            panel.notice.as_deref(),
            Some("Warehouse connection failed: login refused")
        );

        let rendered = handle.render();
        assert!(
            rendered.contains(r#"transfers_web_panel_renders_total{panel="routes",status="error"} 1"#),
            "got:\n{rendered}"
        );
    }
}
