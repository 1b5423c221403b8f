//! Transfer aggregation query builder.
//!
//! Two raw sources, token-transfer facts and GMP facts, are projected into
//! one normalized event shape ([`view::build_normalized_view`]) and then
//! aggregated for a reporting window ([`aggregate`]). Every value reaches
//! the warehouse as a bound parameter; results are decoded by column label.

pub mod aggregate;
pub mod allowlist;
pub mod dialect;
pub mod labels;
pub mod models;
pub mod present;
pub mod view;

pub use aggregate::{
    aggregate_by_asset, aggregate_by_route, aggregate_by_service, aggregate_time_series,
    aggregate_totals, recent_events,
};
pub use allowlist::Allowlist;
pub use dialect::Dialect;
pub use models::{AssetRow, RouteRow, SeriesPoint, ServiceRow, Totals, TransferEvent};
pub use view::{build_normalized_view, QueryFragment};

/// Reasons a normalized view cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("allow-list must contain at least one non-blank address")]
    EmptyAllowlist,
    #[error("invalid table name {0:?}")]
    InvalidIdentifier(String),
}
