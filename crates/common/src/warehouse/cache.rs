use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::{Backend, Query, Table, Warehouse, WarehouseError};

struct Entry {
    stored_at: Instant,
    table: Table,
}

/// Time-boxed memoization of query results keyed by (SQL text, params).
///
/// Advisory only: two renders missing on the same key at the same time both
/// execute, and the later insert wins. Errors are never stored.
pub struct Cached<W> {
    inner: W,
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<Query, Entry>>,
}

impl<W: Warehouse> Cached<W> {
    pub fn new(inner: W, ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner,
            ttl,
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |m| m.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut m) = self.entries.lock() {
            m.clear();
        }
    }

    fn lookup(&self, query: &Query) -> Option<Table> {
        let mut entries = self.entries.lock().ok()?;
        let fresh = entries
            .get(query)
            .map(|e| e.stored_at.elapsed() < self.ttl)?;
        if fresh {
            entries.get(query).map(|e| e.table.clone())
        } else {
            entries.remove(query);
            None
        }
    }

    fn store(&self, query: &Query, table: &Table) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let ttl = self.ttl;
        entries.retain(|_, e| e.stored_at.elapsed() < ttl);
        if entries.len() >= self.max_entries && !entries.contains_key(query) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.stored_at)
                .map(|(k, _)| k.clone());
            if let Some(k) = oldest {
                entries.remove(&k);
            }
        }
        entries.insert(
            query.clone(),
            Entry {
                stored_at: Instant::now(),
                table: table.clone(),
            },
        );
    }
}

impl<W: Warehouse + Sync> Warehouse for Cached<W> {
    fn backend(&self) -> Backend {
        self.inner.backend()
    }

    async fn execute(&self, query: &Query) -> Result<Table, WarehouseError> {
        if let Some(table) = self.lookup(query) {
            metrics::counter!("transfers_query_cache_hits_total").increment(1);
            return Ok(table);
        }
        metrics::counter!("transfers_query_cache_misses_total").increment(1);
        let table = self.inner.execute(query).await?;
        self.store(query, &table);
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::{Cell, Param};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts executions; fails when the SQL says so.
    struct Counting {
        calls: AtomicUsize,
    }

    impl Warehouse for Counting {
        fn backend(&self) -> Backend {
            Backend::Sqlite
        }

        async fn execute(&self, query: &Query) -> Result<Table, WarehouseError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if query.sql.contains("fail") {
                return Err(WarehouseError::Query("boom".into()));
            }
            Ok(Table {
                columns: vec!["n".into()],
                rows: vec![vec![Cell::Int(n as i64)]],
            })
        }
    }

    fn cached(ttl_secs: u64, max: usize) -> Cached<Counting> {
        Cached::new(
            Counting {
                calls: AtomicUsize::new(0),
            },
            Duration::from_secs(ttl_secs),
            max,
        )
    }

    fn q(sql: &str) -> Query {
        Query::new(sql, vec![Param::Text("x".into())])
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_ttl_then_miss_after_expiry() {
        let c = cached(300, 8);
        let first = c.execute(&q("a")).await.unwrap();
        let second = c.execute(&q("a")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(c.inner().calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(301)).await;
        let third = c.execute(&q("a")).await.unwrap();
        assert_ne!(first, third);
        assert_eq!(c.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_params_are_part_of_the_key() {
        let c = cached(300, 8);
        c.execute(&Query::new("a", vec![Param::Int(1)])).await.unwrap();
        c.execute(&Query::new("a", vec![Param::Int(2)])).await.unwrap();
        assert_eq!(c.inner().calls.load(Ordering::SeqCst), 2);
        assert_eq!(c.len(), 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let c = cached(300, 8);
        assert!(c.execute(&q("fail")).await.is_err());
        assert!(c.execute(&q("fail")).await.is_err());
        assert_eq!(c.inner().calls.load(Ordering::SeqCst), 2);
        assert!(c.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_evicts_oldest() {
        let c = cached(300, 2);
        c.execute(&q("a")).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        c.execute(&q("b")).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        c.execute(&q("c")).await.unwrap();
        assert_eq!(c.len(), 2);

        // "a" was evicted, so it executes again
        c.execute(&q("a")).await.unwrap();
        assert_eq!(c.inner().calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_clear_forces_reexecution() {
        let c = cached(300, 8);
        c.execute(&q("a")).await.unwrap();
        c.clear();
        c.execute(&q("a")).await.unwrap();
        assert_eq!(c.inner().calls.load(Ordering::SeqCst), 2);
    }
}
