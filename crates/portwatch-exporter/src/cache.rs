//! Cached scan state shared between a scan task and the metrics read path.
//!
//! The published snapshot is either empty or the complete output of the
//! last finished cycle. Writers take the lock only to begin a cycle and to
//! swap in its result; readers only clone an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use prometheus::proto::MetricFamily;

use crate::metrics::LiveState;

/// Decision taken for an on-demand scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A new scan was started by this request.
    Started,
    /// The last scan is recent enough to serve as is.
    Cached,
    /// A scan is already in flight.
    Busy,
}

#[derive(Debug, Default)]
struct CacheState {
    collecting: bool,
    last_start: Option<DateTime<Utc>>,
    next_start: Option<DateTime<Utc>>,
    succeeded: u64,
    failed: u64,
    failed_current: u64,
    metrics: Arc<Vec<MetricFamily>>,
}

/// Point-in-time copy of the cache.
#[derive(Debug, Clone)]
pub struct CacheView {
    pub live: LiveState,
    pub last_start: Option<DateTime<Utc>>,
    pub metrics: Arc<Vec<MetricFamily>>,
}

#[derive(Debug, Default)]
pub struct MetricsCache {
    state: RwLock<CacheState>,
}

impl MetricsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a cycle as started at `now`.
    pub fn begin(&self, now: DateTime<Utc>) {
        let mut state = self.state.write();
        state.collecting = true;
        state.last_start = Some(now);
    }

    /// Begin a cycle unless one is in flight or the last one started
    /// within `ttl`. A zero `ttl` disables caching.
    pub fn try_begin(&self, now: DateTime<Utc>, ttl: Duration) -> Admission {
        let mut state = self.state.write();

        if state.collecting {
            return Admission::Busy;
        }

        if let (Some(last), Ok(ttl)) = (state.last_start, chrono::Duration::from_std(ttl)) {
            if !ttl.is_zero() && now < last + ttl {
                return Admission::Cached;
            }
        }

        state.collecting = true;
        state.last_start = Some(now);
        Admission::Started
    }

    /// Swap in the result of a finished cycle and clear the in-flight flag.
    pub fn publish(&self, metrics: Vec<MetricFamily>, success: bool) {
        let metrics = Arc::new(metrics);
        let mut state = self.state.write();

        state.metrics = metrics;
        state.collecting = false;
        if success {
            state.succeeded += 1;
            state.failed_current = 0;
        } else {
            state.failed += 1;
            state.failed_current += 1;
        }
    }

    /// Clear the in-flight flag without publishing.
    pub fn abandon(&self) {
        self.state.write().collecting = false;
    }

    pub fn set_next_start(&self, next: Option<DateTime<Utc>>) {
        self.state.write().next_start = next;
    }

    pub fn is_collecting(&self) -> bool {
        self.state.read().collecting
    }

    pub fn failed_current(&self) -> u64 {
        self.state.read().failed_current
    }

    pub fn view(&self) -> CacheView {
        let state = self.state.read();
        CacheView {
            live: LiveState {
                in_progress: state.collecting,
                succeeded: state.succeeded,
                failed: state.failed,
                failed_current: state.failed_current,
                next_start: state.next_start,
            },
            last_start: state.last_start,
            metrics: Arc::clone(&state.metrics),
        }
    }
}

/// Clears the in-flight flag if a cycle ends without publishing.
pub struct CycleGuard<'a> {
    cache: &'a MetricsCache,
    armed: bool,
}

impl<'a> CycleGuard<'a> {
    pub fn new(cache: &'a MetricsCache) -> Self {
        Self { cache, armed: true }
    }

    pub fn publish(mut self, metrics: Vec<MetricFamily>, success: bool) {
        self.armed = false;
        self.cache.publish(metrics, success);
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, secs).unwrap()
    }

    #[test]
    fn test_empty_cache() {
        let cache = MetricsCache::new();
        let view = cache.view();
        assert!(view.metrics.is_empty());
        assert!(view.last_start.is_none());
        assert_eq!(view.live, LiveState::default());
    }

    #[test]
    fn test_try_begin_without_ttl() {
        let cache = MetricsCache::new();
        assert_eq!(cache.try_begin(at(0), Duration::ZERO), Admission::Started);
        assert_eq!(cache.try_begin(at(1), Duration::ZERO), Admission::Busy);

        cache.publish(Vec::new(), true);
        assert_eq!(cache.try_begin(at(2), Duration::ZERO), Admission::Started);
    }

    #[test]
    fn test_try_begin_with_ttl() {
        let cache = MetricsCache::new();
        let ttl = Duration::from_secs(30);

        assert_eq!(cache.try_begin(at(0), ttl), Admission::Started);
        cache.publish(Vec::new(), true);

        assert_eq!(cache.try_begin(at(10), ttl), Admission::Cached);
        assert_eq!(cache.try_begin(at(30), ttl), Admission::Started);
    }

    #[test]
    fn test_publish_counts() {
        let cache = MetricsCache::new();

        cache.begin(at(0));
        assert!(cache.is_collecting());
        cache.publish(Vec::new(), false);
        cache.begin(at(1));
        cache.publish(Vec::new(), false);
        assert_eq!(cache.failed_current(), 2);

        cache.begin(at(2));
        cache.publish(Vec::new(), true);

        let view = cache.view();
        assert!(!view.live.in_progress);
        assert_eq!(view.live.succeeded, 1);
        assert_eq!(view.live.failed, 2);
        assert_eq!(view.live.failed_current, 0);
        assert_eq!(view.last_start, Some(at(2)));
    }

    #[test]
    fn test_guard_clears_collecting_on_drop() {
        let cache = MetricsCache::new();
        cache.begin(at(0));
        {
            let _guard = CycleGuard::new(&cache);
        }
        assert!(!cache.is_collecting());
        assert_eq!(cache.view().live.failed, 0);
    }
}
