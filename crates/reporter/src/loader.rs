//! JSON-lines raw fact records into the local SQLite mirror.

use anyhow::{Context, Result};
use common::db::{insert_raw_gmp, insert_raw_transfer, AsyncDb};
use common::types::{RawGmp, RawTransfer, ServiceKind};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inserted={} duplicates={} rejected={}",
            self.inserted, self.duplicates, self.rejected
        )
    }
}

enum Records {
    Transfers(Vec<RawTransfer>),
    Gmp(Vec<RawGmp>),
}

fn parse_lines<T: serde::de::DeserializeOwned>(content: &str, rejected: &mut usize) -> Vec<T> {
    let mut out = Vec::new();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(rec) => out.push(rec),
            Err(e) => {
                *rejected += 1;
                tracing::warn!(line = n + 1, error = %e, "skipping malformed record");
            }
        }
    }
    out
}

/// Insert every record in `path`; ids already present are left untouched.
/// Lines that do not parse, or whose `created_at` is unreadable, are
/// counted as rejected rather than aborting the load.
pub async fn load_jsonl(db: &AsyncDb, kind: ServiceKind, path: &Path) -> Result<LoadSummary> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;

    let mut summary = LoadSummary::default();
    let records = match kind {
        ServiceKind::TokenTransfer => Records::Transfers(parse_lines(&content, &mut summary.rejected)),
        ServiceKind::MessagePassing => Records::Gmp(parse_lines(&content, &mut summary.rejected)),
    };

    let summary = db
        .call_named("loader.insert", move |conn| {
            let tx = conn.transaction()?;
            let mut tally = |res: Result<usize>, id: &str| match res {
                Ok(0) => summary.duplicates += 1,
                Ok(_) => summary.inserted += 1,
                Err(e) => {
                    summary.rejected += 1;
                    tracing::warn!(id, error = %e, "skipping record");
                }
            };
            match &records {
                Records::Transfers(recs) => {
                    for r in recs {
                        tally(insert_raw_transfer(&tx, r), &r.id);
                    }
                }
                Records::Gmp(recs) => {
                    for r in recs {
                        tally(insert_raw_gmp(&tx, r), &r.id);
                    }
                }
            }
            tx.commit()?;
            Ok(summary)
        })
        .await?;

    tracing::info!(
        path = %path.display(),
        source = kind.as_str(),
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        rejected = summary.rejected,
        "raw records loaded"
    );
    Ok(summary)
}
