use anyhow::{bail, Result};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    TokenTransfer,
    MessagePassing,
}

impl ServiceKind {
    /// Code projected into the normalized view's `service_kind` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenTransfer => "token_transfer",
            Self::MessagePassing => "message_passing",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::TokenTransfer => "Token Transfers",
            Self::MessagePassing => "GMP",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "token_transfer" | "token transfers" | "transfer" => Some(Self::TokenTransfer),
            "message_passing" | "gmp" => Some(Self::MessagePassing),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
}

impl Granularity {
    pub const ALL: [Self; 3] = [Self::Day, Self::Week, Self::Month];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" | "d" => Some(Self::Day),
            "week" | "weekly" | "w" => Some(Self::Week),
            "month" | "monthly" | "m" => Some(Self::Month),
            _ => None,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive calendar-date reporting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            bail!("start date {start} is after end date {end}");
        }
        Ok(Self { start, end })
    }

    /// The `days`-day window ending on `today`, both ends included. Fails
    /// when the start would fall before the earliest representable date.
    pub fn trailing(today: NaiveDate, days: u32) -> Result<Self> {
        let span = u64::from(days.max(1)) - 1;
        let Some(start) = today.checked_sub_days(Days::new(span)) else {
            bail!("a {days}-day window ending {today} starts before the earliest supported date");
        };
        Ok(Self { start, end: today })
    }

    pub fn single(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} .. {}", self.start, self.end)
    }
}

/// Raw token-transfer fact record, as exported from the bridge explorer.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTransfer {
    pub id: String,
    pub created_at: String,
    pub status: Option<String>,
    pub simplified_status: Option<String>,
    pub sender_address: Option<String>,
    pub recipient_address: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Raw general-message-passing fact record.
#[derive(Debug, Clone, Deserialize)]
pub struct RawGmp {
    pub id: String,
    pub created_at: String,
    pub status: Option<String>,
    pub simplified_status: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_service_kind_codes() {
        assert_eq!(ServiceKind::TokenTransfer.as_str(), "token_transfer");
        assert_eq!(ServiceKind::MessagePassing.as_str(), "message_passing");
        assert_eq!(
            ServiceKind::from_str_loose("GMP"),
            Some(ServiceKind::MessagePassing)
        );
        assert_eq!(ServiceKind::from_str_loose("swap"), None);
    }

    #[test]
    fn test_granularity_parse() {
        assert_eq!(Granularity::from_str_loose("Week"), Some(Granularity::Week));
        assert_eq!(Granularity::from_str_loose("monthly"), Some(Granularity::Month));
        assert_eq!(Granularity::from_str_loose("hour"), None);
    }

    #[test]
    fn test_window_rejects_reversed_dates() {
        assert!(DateWindow::new(d("2025-02-01"), d("2025-01-01")).is_err());
        let w = DateWindow::new(d("2025-01-01"), d("2025-01-01")).unwrap();
        assert!(w.contains(d("2025-01-01")));
    }

    #[test]
    fn test_trailing_window_includes_today() {
        let w = DateWindow::trailing(d("2025-01-31"), 31).unwrap();
        assert_eq!(w.start(), d("2025-01-01"));
        assert_eq!(w.end(), d("2025-01-31"));

        let single = DateWindow::trailing(d("2025-01-31"), 0).unwrap();
        assert_eq!(single.start(), single.end());
    }

    #[test]
    fn test_trailing_window_at_date_range_floor() {
        let err = DateWindow::trailing(NaiveDate::MIN, 2).unwrap_err();
        assert!(err.to_string().contains("earliest supported date"));
        assert!(DateWindow::trailing(d("2025-01-31"), u32::MAX).is_err());

        let floor = DateWindow::trailing(NaiveDate::MIN, 1).unwrap();
        assert_eq!(floor.start(), NaiveDate::MIN);
    }

    #[test]
    fn test_raw_transfer_parses_without_data() {
        let rec: RawTransfer =
            serde_json::from_str(r#"{"id":"1","created_at":"2025-01-01T00:00:00Z"}"#).unwrap();
        assert!(rec.data.is_null());
        assert!(rec.status.is_none());
    }
}
