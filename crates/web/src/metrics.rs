use anyhow::Result;
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub const PANEL_RENDERS: &str = "transfers_web_panel_renders_total";

pub fn describe() {
    describe_gauge!(
        "transfers_web_build_info",
        "Build info for the transfer dashboard (value is always 1)."
    );
    describe_counter!(
        PANEL_RENDERS,
        "Dashboard panel renders by panel and outcome (ok, error, invalid_window)."
    );
    describe_counter!(
        "transfers_query_cache_hits_total",
        "Aggregate queries answered from the result cache."
    );
    describe_counter!(
        "transfers_query_cache_misses_total",
        "Aggregate queries sent to the warehouse."
    );
}

/// Install the global Prometheus recorder once and return the handle `/metrics` renders.
///
/// `install_recorder` leaves upkeep to the caller; the `/metrics` handler runs it.
pub fn init_global() -> Result<PrometheusHandle> {
    if let Some(handle) = PROM_HANDLE.get() {
        return Ok(handle.clone());
    }
    describe();
    let installed = PrometheusBuilder::new().install_recorder()?;
    let handle = PROM_HANDLE.get_or_init(|| installed).clone();

    let git_sha = std::env::var("GIT_SHA").unwrap_or_else(|_| "unknown".to_string());
    ::metrics::gauge!(
        "transfers_web_build_info",
        "version" => env!("CARGO_PKG_VERSION"),
        "git_sha" => git_sha,
    )
    .set(1.0);

    Ok(handle)
}

/// One panel render, `status` being `ok`, `error` or `invalid_window`.
pub fn record_panel(panel: &'static str, status: &'static str) {
    ::metrics::counter!(PANEL_RENDERS, "panel" => panel, "status" => status).increment(1);
}
