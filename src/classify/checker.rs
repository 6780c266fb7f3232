//! Strict verification of candidate lines with a bounded worker pool

use crate::classify::cache::ResolutionCache;
use crate::classify::dns::DnsResolver;
use crate::classify::geo::{GeoConfig, GeoResolver};
use crate::classify::models::TargetCountry;
use crate::classify::parser::ConfigParser;
use crate::Result;
use futures::future;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default number of candidates per chunk
const DEFAULT_CHUNK_SIZE: usize = 100;

/// Default number of concurrent verifications
const DEFAULT_CONCURRENCY: usize = 8;

/// Default DNS timeout in seconds
const DEFAULT_DNS_TIMEOUT_SECS: u64 = 5;

/// Cooperative stop request shared with the caller
pub trait CancelSignal: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

impl CancelSignal for CancellationToken {
    fn is_cancelled(&self) -> bool {
        CancellationToken::is_cancelled(self)
    }
}

impl CancelSignal for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

/// Configuration for the batch checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Candidates processed between progress reports
    pub chunk_size: usize,
    /// Number of concurrent verifications inside a chunk
    pub concurrency: usize,
    /// Timeout for each hostname resolution
    pub dns_timeout: Duration,
    /// Also poll the cancel signal before each verification, not only
    /// between chunks
    pub fine_grained_cancel: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            dns_timeout: Duration::from_secs(DEFAULT_DNS_TIMEOUT_SECS),
            fine_grained_cancel: false,
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_dns_timeout(mut self, timeout: Duration) -> Self {
        self.dns_timeout = timeout;
        self
    }

    pub fn with_fine_grained_cancel(mut self, enabled: bool) -> Self {
        self.fine_grained_cancel = enabled;
        self
    }
}

/// Per-candidate pipeline: structure -> endpoint -> DNS -> GeoIP -> compare
#[derive(Clone)]
pub struct StrictVerifier {
    cache: Arc<ResolutionCache>,
    dns: Arc<DnsResolver>,
    geo: Arc<GeoResolver>,
}

impl StrictVerifier {
    pub fn new(cache: Arc<ResolutionCache>, dns: DnsResolver, geo: GeoResolver) -> Self {
        Self {
            cache,
            dns: Arc::new(dns),
            geo: Arc::new(geo),
        }
    }

    /// Verifier using the system resolver and the configured geolocation backend
    pub fn from_config(
        cache: Arc<ResolutionCache>,
        checker: &CheckerConfig,
        geo: &GeoConfig,
    ) -> Result<Self> {
        let dns = DnsResolver::new(Arc::clone(&cache)).with_timeout(checker.dns_timeout);
        let geo = GeoResolver::new(Arc::clone(&cache), geo.build_lookup()?).with_timeout(geo.timeout);
        Ok(Self::new(cache, dns, geo))
    }

    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    /// Country the line's endpoint geolocates to, if every stage succeeds
    pub async fn resolve_country(&self, line: &str) -> Option<String> {
        if let Some(country) = self.cache.line_country(line) {
            return Some(country);
        }

        if !ConfigParser::validate_structure(line) {
            debug!(line, "structural validation failed");
            return None;
        }

        let Some(endpoint) = ConfigParser::extract_host(line) else {
            debug!(line, "no endpoint");
            return None;
        };

        let Some(ip) = self.dns.resolve(&endpoint.host).await else {
            debug!(host = %endpoint.host, "host did not resolve");
            return None;
        };

        let country = self.geo.resolve_country(&ip.to_string()).await?;
        self.cache.set_line_country(line, &country);
        Some(country)
    }

    /// Verify that `line` geolocates to `target`
    pub async fn verify(&self, line: String, target: &TargetCountry) -> (String, bool) {
        let matched = self
            .resolve_country(&line)
            .await
            .is_some_and(|country| target.is_named(&country));
        (line, matched)
    }
}

/// Progress report emitted after each chunk
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Zero-based index of the chunk just finished
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// Lines from this chunk that matched, in completion order
    pub chunk_matches: Vec<String>,
    pub matches_so_far: usize,
    pub elapsed: Duration,
}

/// Result of a strict pass
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub matches: Vec<String>,
    pub chunks_processed: usize,
    pub total_chunks: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

/// Runs [`StrictVerifier`] over candidates in chunks
#[derive(Clone)]
pub struct BatchChecker {
    config: CheckerConfig,
    verifier: StrictVerifier,
}

impl BatchChecker {
    pub fn with_config(config: CheckerConfig, verifier: StrictVerifier) -> Self {
        Self { config, verifier }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    pub fn verifier(&self) -> &StrictVerifier {
        &self.verifier
    }

    /// Verify `candidates` chunk by chunk.
    ///
    /// `cancel` is polled once before each chunk; a chunk that has started
    /// always runs to completion. Matches found before cancellation are kept.
    pub async fn strict_check<F>(
        &self,
        candidates: Vec<String>,
        target: &TargetCountry,
        cancel: &dyn CancelSignal,
        mut on_progress: F,
    ) -> BatchOutcome
    where
        F: FnMut(&ProgressUpdate),
    {
        let start = Instant::now();
        let chunk_size = self.config.chunk_size.max(1);
        let total_chunks = candidates.len().div_ceil(chunk_size);
        let target = Arc::new(target.clone());

        let mut outcome = BatchOutcome {
            total_chunks,
            ..BatchOutcome::default()
        };

        for (chunk_index, chunk) in candidates.chunks(chunk_size).enumerate() {
            if cancel.is_cancelled() {
                info!(
                    chunk = chunk_index,
                    total_chunks,
                    matches = outcome.matches.len(),
                    "strict check cancelled"
                );
                outcome.cancelled = true;
                break;
            }

            let chunk_matches = self.check_chunk(chunk, &target, cancel).await;
            outcome.matches.extend(chunk_matches.iter().cloned());
            outcome.chunks_processed += 1;

            debug!(
                chunk = chunk_index,
                total_chunks,
                found = chunk_matches.len(),
                "chunk verified"
            );

            on_progress(&ProgressUpdate {
                chunk_index,
                total_chunks,
                chunk_matches,
                matches_so_far: outcome.matches.len(),
                elapsed: start.elapsed(),
            });
        }

        outcome.elapsed = start.elapsed();
        outcome
    }

    async fn check_chunk(
        &self,
        chunk: &[String],
        target: &Arc<TargetCountry>,
        cancel: &dyn CancelSignal,
    ) -> Vec<String> {
        let fine_grained = self.config.fine_grained_cancel;

        stream::iter(chunk.iter().cloned())
            .filter(move |_| future::ready(!(fine_grained && cancel.is_cancelled())))
            .map(|line| {
                let verifier = self.verifier.clone();
                let target = Arc::clone(target);
                let task_line = line.clone();
                async move {
                    // Each verification runs as its own task so a panic only
                    // costs that one candidate.
                    let task =
                        tokio::spawn(async move { verifier.verify(task_line, &target).await });
                    match task.await {
                        Ok((_, matched)) => (line, matched),
                        Err(e) => {
                            warn!(line = %line, error = %e, "verification task failed");
                            (line, false)
                        }
                    }
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .filter_map(|(line, matched)| future::ready(matched.then_some(line)))
            .collect()
            .await
    }
}
