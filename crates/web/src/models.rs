//! View models for dashboard templates: display strings only, built from
//! the aggregate rows. Nothing here talks to the warehouse.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use transfers::present;
use transfers::{AssetRow, RouteRow, SeriesPoint, ServiceRow, Totals, TransferEvent};

/// KPI cards for the selected window.
pub struct KpiCards {
    pub transfers: String,
    pub users: String,
    pub volume: String,
}

impl From<&Totals> for KpiCards {
    fn from(t: &Totals) -> Self {
        Self {
            transfers: present::count(t.transfer_count),
            users: present::count(t.user_count),
            volume: present::usd(t.volume_usd),
        }
    }
}

/// Row in the time-series table under the chart.
pub struct SeriesRow {
    pub bucket: String,
    pub transfers: String,
    pub users: String,
    pub volume: String,
}

impl From<&SeriesPoint> for SeriesRow {
    fn from(p: &SeriesPoint) -> Self {
        Self {
            bucket: p.bucket_start.to_string(),
            transfers: present::count(p.transfer_count),
            users: present::count(p.user_count),
            volume: present::usd(p.volume_usd),
        }
    }
}

/// Chart.js input. Unpriced buckets stay `null` so the line breaks
/// instead of dropping to zero.
#[derive(Debug, Default, Serialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub transfers: Vec<i64>,
    pub users: Vec<i64>,
    pub volume: Vec<Option<f64>>,
}

impl ChartData {
    pub fn from_points(points: &[SeriesPoint]) -> Self {
        let mut chart = Self::default();
        for p in points {
            chart.labels.push(p.bucket_start.to_string());
            chart.transfers.push(p.transfer_count);
            chart.users.push(p.user_count);
            chart.volume.push(p.volume_usd.and_then(|v| v.to_f64()));
        }
        chart
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

pub struct RouteView {
    pub source: String,
    pub destination: String,
    pub volume: String,
    pub transfers: String,
}

impl From<&RouteRow> for RouteView {
    fn from(r: &RouteRow) -> Self {
        Self {
            source: present::chain(r.source_chain.as_deref()).to_string(),
            destination: present::chain(r.destination_chain.as_deref()).to_string(),
            volume: present::usd(r.volume_usd),
            transfers: present::count(r.transfer_count),
        }
    }
}

pub struct ServiceView {
    pub service: String,
    pub transfers: String,
    pub users: String,
    pub volume: String,
    pub fees: String,
}

impl From<&ServiceRow> for ServiceView {
    fn from(s: &ServiceRow) -> Self {
        Self {
            service: s.service.label().to_string(),
            transfers: present::count(s.transfer_count),
            users: present::count(s.user_count),
            volume: present::usd(s.volume_usd),
            fees: present::usd(s.fees_usd),
        }
    }
}

pub struct AssetView {
    pub asset: String,
    pub transfers: String,
    pub volume: String,
}

impl From<&AssetRow> for AssetView {
    fn from(a: &AssetRow) -> Self {
        Self {
            asset: a
                .asset
                .clone()
                .unwrap_or_else(|| present::NOT_AVAILABLE.to_string()),
            transfers: present::count(a.transfer_count),
            volume: present::usd(a.volume_usd),
        }
    }
}

/// Row in the recent activity table
pub struct EventView {
    pub created_at: String,
    pub service: String,
    pub route: String,
    pub user: String,
    pub asset: String,
    pub amount: String,
    pub amount_usd: String,
    pub fee_usd: String,
}

impl From<&TransferEvent> for EventView {
    fn from(e: &TransferEvent) -> Self {
        Self {
            created_at: e.created_at.format("%Y-%m-%d %H:%M").to_string(),
            service: e.service_kind.label().to_string(),
            route: format!(
                "{} → {}",
                present::chain(e.source_chain.as_deref()),
                present::chain(e.destination_chain.as_deref())
            ),
            user: e.user_address.as_deref().map_or_else(
                || present::NOT_AVAILABLE.to_string(),
                shorten_address,
            ),
            asset: e
                .asset
                .clone()
                .unwrap_or_else(|| present::NOT_AVAILABLE.to_string()),
            amount: e
                .amount_native
                .map_or_else(|| present::NOT_AVAILABLE.to_string(), plain_amount),
            amount_usd: present::usd(e.amount_usd),
            fee_usd: present::usd(e.fee_usd),
        }
    }
}

/// `0x1234…abcd` for long addresses.
fn shorten_address(addr: &str) -> String {
    if addr.len() <= 14 || !addr.is_ascii() {
        return addr.to_string();
    }
    format!("{}…{}", &addr[..6], &addr[addr.len() - 4..])
}

fn plain_amount(v: Decimal) -> String {
    v.round_dp(6).normalize().to_string()
}

/// Option in the granularity select.
pub struct GranularityOption {
    pub value: &'static str,
    pub selected: bool,
}
