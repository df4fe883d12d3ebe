//! Cache decorator honoring a data source's `cache` / `cache_ttl_secs` hints.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use forgebi_core::{Clock, FetchError};

use crate::connector::{DataSourceConnector, Row};
use crate::source::DataSource;

#[derive(Debug, Clone)]
struct CachedRows {
    rows: Vec<Row>,
    expires_at: DateTime<Utc>,
}

/// Wraps a connector and serves repeated fetches from memory until the
/// source's TTL elapses. Sources with `cache == false` always pass through.
///
/// Failures are never cached. Expired entries are evicted whenever a new
/// result is stored.
pub struct CachingConnector<C> {
    inner: C,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CachedRows>>,
}

impl<C: DataSourceConnector> CachingConnector<C> {
    pub fn new(inner: C, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every cached entry (e.g. after a schema change upstream).
    pub fn invalidate_all(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<C: DataSourceConnector> DataSourceConnector for CachingConnector<C> {
    fn fetch(&self, source: &DataSource) -> Result<Vec<Row>, FetchError> {
        if !source.cache {
            return self.inner.fetch(source);
        }

        let key = source.cache_key();
        let now = self.clock.now();
        {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            match entries.get(&key) {
                Some(hit) if hit.expires_at > now => {
                    debug!(connection = %source.connection, "data source cache hit");
                    return Ok(hit.rows.clone());
                }
                Some(_) => {
                    entries.remove(&key);
                }
                None => {}
            }
        }

        // Fetch without holding the cache lock: connectors may be slow.
        let rows = self.inner.fetch(source)?;
        let expires_at = i64::try_from(source.cache_ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        if entries.len() < before {
            debug!(evicted = before - entries.len(), "expired data source cache entries evicted");
        }
        entries.insert(
            key,
            CachedRows {
                rows: rows.clone(),
                expires_at,
            },
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use forgebi_core::ManualClock;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::source::DataSourceType;

    #[derive(Default)]
    struct CountingConnector {
        calls: AtomicUsize,
        fail: bool,
    }

    impl DataSourceConnector for CountingConnector {
        fn fetch(&self, _source: &DataSource) -> Result<Vec<Row>, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(FetchError::Unavailable("warehouse".into()));
            }
            let mut row = Row::new();
            row.insert("call".into(), json!(n));
            Ok(vec![row])
        }
    }

    fn setup(fail: bool) -> (Arc<CountingConnector>, Arc<ManualClock>, CachingConnector<Arc<CountingConnector>>) {
        let inner = Arc::new(CountingConnector {
            fail,
            ..Default::default()
        });
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        let caching = CachingConnector::new(inner.clone(), clock.clone());
        (inner, clock, caching)
    }

    fn cached_source() -> DataSource {
        DataSource::new(DataSourceType::Sql, "warehouse")
            .with_query("select 1")
            .with_cache(60)
    }

    #[test]
    fn serves_from_cache_until_ttl_expires() {
        let (inner, clock, caching) = setup(false);
        let source = cached_source();

        let first = caching.fetch(&source).unwrap();
        let second = caching.fetch(&source).unwrap();
        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::seconds(61));
        caching.fetch(&source).unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn uncached_sources_pass_through() {
        let (inner, _clock, caching) = setup(false);
        let source = DataSource::new(DataSourceType::Sql, "warehouse").with_query("select 1");

        caching.fetch(&source).unwrap();
        caching.fetch(&source).unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(caching.cached_entries(), 0);
    }

    #[test]
    fn failures_are_not_cached() {
        let (inner, _clock, caching) = setup(true);
        let source = cached_source();

        assert!(caching.fetch(&source).is_err());
        assert!(caching.fetch(&source).is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn storing_a_new_result_evicts_expired_entries() {
        let (inner, clock, caching) = setup(false);
        let short = DataSource::new(DataSourceType::Sql, "warehouse")
            .with_query("select 1")
            .with_cache(10);
        let long = DataSource::new(DataSourceType::Sql, "warehouse")
            .with_query("select 2")
            .with_cache(600);

        caching.fetch(&short).unwrap();
        caching.fetch(&long).unwrap();
        assert_eq!(caching.cached_entries(), 2);

        clock.advance(Duration::seconds(11));
        let other = DataSource::new(DataSourceType::Sql, "warehouse")
            .with_query("select 3")
            .with_cache(60);
        caching.fetch(&other).unwrap();

        // "select 1" expired and was never read again; "select 2" is still live.
        assert_eq!(caching.cached_entries(), 2);
        let calls = inner.calls.load(Ordering::SeqCst);
        caching.fetch(&long).unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), calls);
    }
}
