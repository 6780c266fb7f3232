//! Country lookup for IP addresses
//!
//! Two backends are available:
//! - an HTTP geolocation service (`GET {base_url}/{ip}`, ip-api.com JSON shape)
//! - a local MaxMind MMDB database
//!
//! Both sit behind [`GeoResolver`], which adds caching, private-range
//! short-circuiting and folds every failure into "no result".

use crate::classify::cache::{normalize_key, InFlight, ResolutionCache};
use crate::Result;
use async_trait::async_trait;
use maxminddb::{geoip2, Reader};
use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default geolocation endpoint
pub const DEFAULT_GEOIP_URL: &str = "http://ip-api.com/json";

/// Default timeout for one geolocation request
pub const DEFAULT_GEOIP_TIMEOUT: Duration = Duration::from_secs(3);

/// User agent sent to the geolocation service
pub const DEFAULT_USER_AGENT: &str = "proxy-geosort/0.1";

/// Configuration for the geolocation backend
#[derive(Debug, Clone)]
pub struct GeoConfig {
    /// Base URL of the HTTP service; the IP is appended as a path segment
    pub base_url: String,
    /// Timeout for each lookup
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
    /// Path to an MMDB file; when set it replaces the HTTP service
    pub mmdb_path: Option<String>,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEOIP_URL.to_string(),
            timeout: DEFAULT_GEOIP_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            mmdb_path: None,
        }
    }
}

impl GeoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_mmdb_path(mut self, path: String) -> Self {
        self.mmdb_path = Some(path);
        self
    }

    /// Build the backend this configuration selects
    pub fn build_lookup(&self) -> Result<Arc<dyn CountryLookup>> {
        Ok(match &self.mmdb_path {
            Some(path) => Arc::new(MmdbCountryLookup::from_path(path)?),
            None => Arc::new(HttpCountryLookup::new(self)?),
        })
    }
}

/// Backend that maps an IP address to a country name
#[async_trait]
pub trait CountryLookup: Send + Sync {
    async fn lookup_country(&self, ip: IpAddr) -> Result<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct GeoApiResponse {
    status: String,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP geolocation service client
#[derive(Debug, Clone)]
pub struct HttpCountryLookup {
    client: Client,
    base_url: String,
}

impl HttpCountryLookup {
    pub fn new(config: &GeoConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CountryLookup for HttpCountryLookup {
    async fn lookup_country(&self, ip: IpAddr) -> Result<Option<String>> {
        let url = format!("{}/{}", self.base_url, ip);
        let body: GeoApiResponse = self.client.get(&url).send().await?.json().await?;

        if body.status != "success" {
            debug!(%ip, status = %body.status, message = ?body.message, "geolocation unsuccessful");
            return Ok(None);
        }

        Ok(body.country.filter(|c| !c.trim().is_empty()))
    }
}

/// Offline lookup against a MaxMind City/Country database
pub struct MmdbCountryLookup {
    reader: Arc<Reader<Vec<u8>>>,
}

impl MmdbCountryLookup {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// English country name for `ip`, if the database knows it
    pub fn country_name(&self, ip: IpAddr) -> Result<Option<String>> {
        let lookup_result = self.reader.lookup(ip)?;
        let city: Option<geoip2::City> = lookup_result.decode()?;
        Ok(city.and_then(|city| city.country.names.english.map(String::from)))
    }
}

impl Clone for MmdbCountryLookup {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}

#[async_trait]
impl CountryLookup for MmdbCountryLookup {
    async fn lookup_country(&self, ip: IpAddr) -> Result<Option<String>> {
        self.country_name(ip)
    }
}

/// Whether `ip` belongs to a private, loopback or link-local range
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}

/// Cache-aware country resolver. Never fails; absence means "unknown".
///
/// Unknown answers are remembered like successful ones.
pub struct GeoResolver {
    cache: Arc<ResolutionCache>,
    lookup: Arc<dyn CountryLookup>,
    timeout: Duration,
    inflight: InFlight<String, Option<String>>,
}

impl GeoResolver {
    pub fn new(cache: Arc<ResolutionCache>, lookup: Arc<dyn CountryLookup>) -> Self {
        Self {
            cache,
            lookup,
            timeout: DEFAULT_GEOIP_TIMEOUT,
            inflight: InFlight::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Country name for `ip`
    pub async fn resolve_country(&self, ip: &str) -> Option<String> {
        let addr: IpAddr = match ip.trim().parse() {
            Ok(addr) => addr,
            Err(_) => {
                debug!(ip, "not an IP address");
                return None;
            }
        };

        if is_private_ip(&addr) {
            debug!(%addr, "skipping private address");
            return None;
        }

        if let Some(country) = self.cache.ip_country(ip) {
            return Some(country);
        }
        if self.cache.is_ip_unlocated(ip) {
            return None;
        }

        self.inflight
            .run(normalize_key(ip), || self.resolve_uncached(addr))
            .await
    }

    async fn resolve_uncached(&self, addr: IpAddr) -> Option<String> {
        match tokio::time::timeout(self.timeout, self.lookup.lookup_country(addr)).await {
            Ok(Ok(Some(country))) => {
                debug!(%addr, country = %country, "geolocated");
                self.cache.set_ip_country(&addr.to_string(), &country);
                return Some(country);
            }
            Ok(Ok(None)) => debug!(%addr, "no country for address"),
            Ok(Err(e)) => debug!(%addr, error = %e, "geolocation failed"),
            Err(_) => debug!(%addr, "geolocation timed out"),
        }
        self.cache.mark_ip_unlocated(&addr.to_string());
        None
    }
}
