//! Cache-aware hostname resolution

use crate::classify::cache::{normalize_key, InFlight, ResolutionCache};
use anyhow::Result;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default timeout for a single hostname resolution
pub const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_secs(5);

/// Backend that turns a hostname into an address
#[async_trait]
pub trait HostLookup: Send + Sync {
    async fn lookup(&self, host: &str) -> Result<Option<IpAddr>>;
}

/// Resolver backed by the operating system (`getaddrinfo` via tokio).
///
/// IPv4 answers are preferred since the geolocation services key on them.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHostLookup;

#[async_trait]
impl HostLookup for SystemHostLookup {
    async fn lookup(&self, host: &str) -> Result<Option<IpAddr>> {
        // Port 0 is only needed to satisfy the socket-address API.
        let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, 0))
            .await?
            .map(|addr| addr.ip())
            .collect();

        Ok(addrs
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addrs.first())
            .copied())
    }
}

/// Hostname resolver with write-through caching.
///
/// Failures (NXDOMAIN, timeout, empty answer) are inconclusive and come back
/// as `None`. They are remembered, so a dead host is only queried once.
pub struct DnsResolver {
    cache: Arc<ResolutionCache>,
    lookup: Arc<dyn HostLookup>,
    timeout: Duration,
    inflight: InFlight<String, Option<IpAddr>>,
}

impl DnsResolver {
    pub fn new(cache: Arc<ResolutionCache>) -> Self {
        Self::with_lookup(cache, Arc::new(SystemHostLookup))
    }

    pub fn with_lookup(cache: Arc<ResolutionCache>, lookup: Arc<dyn HostLookup>) -> Self {
        Self {
            cache,
            lookup,
            timeout: DEFAULT_DNS_TIMEOUT,
            inflight: InFlight::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve `host` to an IP address
    pub async fn resolve(&self, host: &str) -> Option<IpAddr> {
        let host = host.trim();
        if host.is_empty() {
            return None;
        }

        if let Ok(ip) = host.parse::<IpAddr>() {
            self.cache.set_host_ip(host, ip);
            return Some(ip);
        }

        if let Some(ip) = self.cache.host_ip(host) {
            return Some(ip);
        }
        if self.cache.is_host_unresolved(host) {
            return None;
        }

        self.inflight
            .run(normalize_key(host), || self.resolve_uncached(host))
            .await
    }

    async fn resolve_uncached(&self, host: &str) -> Option<IpAddr> {
        match tokio::time::timeout(self.timeout, self.lookup.lookup(host)).await {
            Ok(Ok(Some(ip))) => {
                debug!(host, %ip, "resolved host");
                self.cache.set_host_ip(host, ip);
                return Some(ip);
            }
            Ok(Ok(None)) => debug!(host, "resolver returned no addresses"),
            Ok(Err(e)) => debug!(host, error = %e, "resolution failed"),
            Err(_) => debug!(host, timeout = ?self.timeout, "resolution timed out"),
        }
        self.cache.mark_host_unresolved(host);
        None
    }
}
