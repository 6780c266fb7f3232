//! Resolution cache shared by every verification worker
//!
//! Three independent maps keyed by normalized (trimmed, lowercase) strings:
//!
//! - `line_country`: whole config line -> country
//! - `host_ip`: hostname -> IP (identity for IP literals)
//! - `ip_country`: IP -> country
//!
//! Hosts that failed to resolve and IPs that failed to geolocate are
//! remembered as well, so each distinct key reaches the network once.
//!
//! Entries live for as long as the cache object does and are never evicted.
//! Concurrent writers may race on the same key; they always derive the same
//! value from it, so last write wins.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Hit/miss counters for one cache map
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct CacheMap<V> {
    entries: RwLock<HashMap<String, V>>,
    stats: CacheStats,
}

impl<V> Default for CacheMap<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            stats: CacheStats::default(),
        }
    }
}

impl<V: Clone> CacheMap<V> {
    fn get(&self, key: &str) -> Option<V> {
        let value = self.entries.read().get(&normalize_key(key)).cloned();
        self.stats.record(value.is_some());
        value
    }

    fn insert(&self, key: &str, value: V) {
        self.entries.write().insert(normalize_key(key), value);
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Normalize a cache key
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

/// Process-lifetime memo of DNS, GeoIP and whole-line results
#[derive(Debug, Default)]
pub struct ResolutionCache {
    line_country: CacheMap<String>,
    host_ip: CacheMap<IpAddr>,
    ip_country: CacheMap<String>,
    unresolved_hosts: CacheMap<()>,
    unlocated_ips: CacheMap<()>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line_country(&self, line: &str) -> Option<String> {
        self.line_country.get(line)
    }

    pub fn set_line_country(&self, line: &str, country: &str) {
        self.line_country.insert(line, country.to_string());
    }

    pub fn host_ip(&self, host: &str) -> Option<IpAddr> {
        self.host_ip.get(host)
    }

    pub fn set_host_ip(&self, host: &str, ip: IpAddr) {
        self.host_ip.insert(host, ip);
    }

    pub fn ip_country(&self, ip: &str) -> Option<String> {
        self.ip_country.get(ip)
    }

    pub fn set_ip_country(&self, ip: &str, country: &str) {
        self.ip_country.insert(ip, country.to_string());
    }

    /// Whether a lookup of `host` already failed
    pub fn is_host_unresolved(&self, host: &str) -> bool {
        self.unresolved_hosts.get(host).is_some()
    }

    pub fn mark_host_unresolved(&self, host: &str) {
        self.unresolved_hosts.insert(host, ());
    }

    /// Whether geolocating `ip` already failed
    pub fn is_ip_unlocated(&self, ip: &str) -> bool {
        self.unlocated_ips.get(ip).is_some()
    }

    pub fn mark_ip_unlocated(&self, ip: &str) {
        self.unlocated_ips.insert(ip, ());
    }

    pub fn line_stats(&self) -> &CacheStats {
        &self.line_country.stats
    }

    pub fn host_stats(&self) -> &CacheStats {
        &self.host_ip.stats
    }

    pub fn ip_stats(&self) -> &CacheStats {
        &self.ip_country.stats
    }

    /// Number of entries in each map: `(lines, hosts, ips)`
    pub fn sizes(&self) -> (usize, usize, usize) {
        (
            self.line_country.len(),
            self.host_ip.len(),
            self.ip_country.len(),
        )
    }
}

/// Coalesces concurrent lookups of the same key into one call.
///
/// Callers arriving while a lookup is running wait for its result instead of
/// issuing their own. The slot is dropped once the call completes, so later
/// callers go back to the cache (or retry after a failure).
pub(crate) struct InFlight<K, V> {
    calls: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for InFlight<K, V> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> InFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) async fn run<F, Fut>(&self, key: K, call: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let cell = self
            .calls
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let value = cell.get_or_init(call).await.clone();

        let mut calls = self.calls.lock();
        if calls.get(&key).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            calls.remove(&key);
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_keys_are_normalized() {
        let cache = ResolutionCache::new();
        cache.set_host_ip("  Example.COM ", "1.2.3.4".parse().unwrap());
        assert_eq!(cache.host_ip("example.com"), Some("1.2.3.4".parse().unwrap()));

        cache.set_ip_country("1.2.3.4", "Japan");
        assert_eq!(cache.ip_country(" 1.2.3.4"), Some("Japan".to_string()));
    }

    #[test]
    fn test_maps_are_independent() {
        let cache = ResolutionCache::new();
        cache.set_line_country("1.2.3.4:443", "Germany");
        assert!(cache.ip_country("1.2.3.4:443").is_none());
        assert!(cache.host_ip("1.2.3.4:443").is_none());
        assert_eq!(cache.sizes(), (1, 0, 0));
    }

    #[test]
    fn test_stats() {
        let cache = ResolutionCache::new();
        assert!(cache.ip_country("8.8.8.8").is_none());
        cache.set_ip_country("8.8.8.8", "United States");
        assert!(cache.ip_country("8.8.8.8").is_some());
        assert_eq!(cache.ip_stats().hits(), 1);
        assert_eq!(cache.ip_stats().misses(), 1);
        assert_eq!(cache.host_stats().hits(), 0);
    }

    #[test]
    fn test_failures_are_remembered_separately() {
        let cache = ResolutionCache::new();
        assert!(!cache.is_host_unresolved("dead.example.com"));
        cache.mark_host_unresolved(" DEAD.example.com");
        assert!(cache.is_host_unresolved("dead.example.com"));
        assert!(cache.host_ip("dead.example.com").is_none());

        cache.mark_ip_unlocated("198.51.100.1");
        assert!(cache.is_ip_unlocated("198.51.100.1"));
        assert!(!cache.is_ip_unlocated("198.51.100.2"));
        assert_eq!(cache.sizes(), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_inflight_coalesces_concurrent_calls() {
        let inflight = Arc::new(InFlight::<String, u32>::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let inflight = Arc::clone(&inflight);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    inflight
                        .run("key".to_string(), || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            7
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(inflight.calls.lock().is_empty());
    }
}
