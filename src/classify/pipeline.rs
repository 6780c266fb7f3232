//! Two-pass classification: lexical fast pass, optional strict pass

use crate::classify::cache::ResolutionCache;
use crate::classify::checker::{BatchChecker, CancelSignal, ProgressUpdate, StrictVerifier};
use crate::classify::lexical::LexicalClassifier;
use crate::classify::models::{CheckMode, ClassificationOutcome, MatchMethod, TargetCountry};
use crate::error::InputError;
use crate::{Config, Result};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default maximum number of lines accepted per request
const DEFAULT_MAX_LINES: usize = 50_000;

/// Default maximum input size in bytes
const DEFAULT_MAX_INPUT_BYTES: usize = 15 * 1024 * 1024;

/// Default cap on candidates handed to the strict pass
const DEFAULT_MAX_CANDIDATES: usize = 1_000;

/// Input limits for one request
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Lines past this count are dropped with a warning
    pub max_lines: usize,
    /// Larger inputs are rejected outright
    pub max_input_bytes: usize,
    /// Fast-pass matches past this count skip strict verification
    pub max_candidates: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_MAX_LINES,
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines;
        self
    }

    pub fn with_max_input_bytes(mut self, max_input_bytes: usize) -> Self {
        self.max_input_bytes = max_input_bytes;
        self
    }

    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates;
        self
    }
}

/// Lifecycle of one classification request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Ingested,
    FastFiltered,
    StrictVerified,
    Done,
    Cancelled,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Ingested => write!(f, "ingested"),
            PipelineState::FastFiltered => write!(f, "fast-filtered"),
            PipelineState::StrictVerified => write!(f, "strict-verified"),
            PipelineState::Done => write!(f, "done"),
            PipelineState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Final result of a request
#[derive(Debug, Clone)]
pub struct ClassificationReport {
    /// `Done` or `Cancelled`
    pub state: PipelineState,
    /// Matched outcomes; strict mode reports only verified lines
    pub outcomes: Vec<ClassificationOutcome>,
    pub total_lines: usize,
    pub blank_lines: usize,
    pub dropped_lines: usize,
    pub lexical_matches: usize,
    pub candidates_checked: usize,
    pub elapsed: Duration,
}

impl ClassificationReport {
    /// Matched lines
    pub fn matches(&self) -> Vec<String> {
        self.outcomes.iter().map(|o| o.line.clone()).collect()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == PipelineState::Cancelled
    }
}

/// Façade running the lexical pass and, in strict mode, the batch checker
#[derive(Clone)]
pub struct ClassificationPipeline {
    config: PipelineConfig,
    checker: BatchChecker,
}

impl ClassificationPipeline {
    pub fn new(config: PipelineConfig, checker: BatchChecker) -> Self {
        Self { config, checker }
    }

    /// Pipeline with a fresh cache, the system resolver and the configured
    /// geolocation backend
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_cache(config, Arc::new(ResolutionCache::new()))
    }

    /// Like [`from_config`](Self::from_config) but reusing `cache` across
    /// requests
    pub fn with_cache(config: &Config, cache: Arc<ResolutionCache>) -> Result<Self> {
        let verifier = StrictVerifier::from_config(cache, &config.checker, &config.geo)?;
        Ok(Self::new(
            config.pipeline.clone(),
            BatchChecker::with_config(config.checker.clone(), verifier),
        ))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ResolutionCache> {
        self.checker.verifier().cache()
    }

    /// Decode raw input into lines.
    ///
    /// Oversized input is rejected; invalid UTF-8 is replaced, not rejected.
    pub fn ingest(&self, bytes: &[u8]) -> std::result::Result<Vec<String>, InputError> {
        if bytes.len() > self.config.max_input_bytes {
            return Err(InputError::TooLarge {
                size: bytes.len(),
                limit: self.config.max_input_bytes,
            });
        }

        Ok(String::from_utf8_lossy(bytes)
            .lines()
            .map(str::to_string)
            .collect())
    }

    /// Lexical pass over every non-blank line
    pub fn fast_filter(&self, lines: &[String], target: &TargetCountry) -> Vec<ClassificationOutcome> {
        lines
            .iter()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                LexicalClassifier::classify(line, target).map(|method| {
                    ClassificationOutcome::matched(
                        line.clone(),
                        method,
                        Some(target.canonical_name.clone()),
                    )
                })
            })
            .collect()
    }

    /// Classify `lines` for `target`.
    ///
    /// Cancellation is only observed by the strict pass, between chunks;
    /// matches verified before that point are returned.
    pub async fn classify<F>(
        &self,
        mut lines: Vec<String>,
        target: &TargetCountry,
        mode: CheckMode,
        cancel: &dyn CancelSignal,
        on_progress: F,
    ) -> ClassificationReport
    where
        F: FnMut(&ProgressUpdate),
    {
        let start = Instant::now();

        let mut dropped_lines = 0;
        if lines.len() > self.config.max_lines {
            dropped_lines = lines.len() - self.config.max_lines;
            warn!(
                limit = self.config.max_lines,
                dropped = dropped_lines,
                "too many lines, dropping the excess"
            );
            lines.truncate(self.config.max_lines);
        }
        let total_lines = lines.len();
        let blank_lines = lines.iter().filter(|l| l.trim().is_empty()).count();
        debug!(state = %PipelineState::Ingested, total_lines, blank_lines);

        let lexical = self.fast_filter(&lines, target);
        let lexical_matches = lexical.len();
        info!(
            state = %PipelineState::FastFiltered,
            country = %target.canonical_name,
            lexical_matches,
            "fast pass complete"
        );

        let mut report = ClassificationReport {
            state: PipelineState::Done,
            outcomes: lexical,
            total_lines,
            blank_lines,
            dropped_lines,
            lexical_matches,
            candidates_checked: 0,
            elapsed: Duration::ZERO,
        };

        if mode == CheckMode::Strict {
            let mut candidates: Vec<String> =
                report.outcomes.drain(..).map(|outcome| outcome.line).collect();
            if candidates.len() > self.config.max_candidates {
                info!(
                    candidates = candidates.len(),
                    limit = self.config.max_candidates,
                    "capping strict candidates"
                );
                candidates.truncate(self.config.max_candidates);
            }
            report.candidates_checked = candidates.len();

            let batch = self
                .checker
                .strict_check(candidates, target, cancel, on_progress)
                .await;

            report.outcomes = batch
                .matches
                .into_iter()
                .map(|line| {
                    ClassificationOutcome::matched(
                        line,
                        MatchMethod::StrictGeoip,
                        Some(target.canonical_name.clone()),
                    )
                })
                .collect();

            if batch.cancelled {
                report.state = PipelineState::Cancelled;
            } else {
                debug!(state = %PipelineState::StrictVerified, matches = report.outcomes.len());
            }
        }

        report.elapsed = start.elapsed();
        info!(
            state = %report.state,
            matches = report.outcomes.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "classification finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::checker::CheckerConfig;
    use crate::classify::dns::tests::MockHostLookup;
    use crate::classify::dns::DnsResolver;
    use crate::classify::geo::tests::MockCountryLookup;
    use crate::classify::geo::GeoResolver;
    use crate::classify::parser::vmess_line;
    use std::sync::atomic::AtomicBool;

    fn japan() -> TargetCountry {
        TargetCountry::new("Japan", "JP").with_alias("jp")
    }

    fn pipeline(config: PipelineConfig, geo: Arc<MockCountryLookup>) -> ClassificationPipeline {
        let cache = Arc::new(ResolutionCache::new());
        let dns = DnsResolver::with_lookup(Arc::clone(&cache), Arc::new(MockHostLookup::default()));
        let geo = GeoResolver::new(Arc::clone(&cache), geo);
        let checker = BatchChecker::with_config(
            CheckerConfig::new().with_chunk_size(2),
            StrictVerifier::new(cache, dns, geo),
        );
        ClassificationPipeline::new(config, checker)
    }

    #[test]
    fn test_pipeline_config_builder() {
        let config = PipelineConfig::new()
            .with_max_lines(10)
            .with_max_input_bytes(1024)
            .with_max_candidates(3);
        assert_eq!(config.max_lines, 10);
        assert_eq!(config.max_input_bytes, 1024);
        assert_eq!(config.max_candidates, 3);
    }

    #[test]
    fn test_ingest_rejects_oversized_input() {
        let pipeline = pipeline(
            PipelineConfig::new().with_max_input_bytes(8),
            Arc::new(MockCountryLookup::default()),
        );
        let err = pipeline.ingest(b"0123456789").unwrap_err();
        assert_eq!(err, InputError::TooLarge { size: 10, limit: 8 });
    }

    #[test]
    fn test_ingest_is_lenient() {
        let pipeline = pipeline(PipelineConfig::default(), Arc::new(MockCountryLookup::default()));
        let lines = pipeline.ingest(b"jp node\n\xff\xfe broken\r\nlast").unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "jp node");
        assert!(lines[1].contains('\u{FFFD}'));
        assert_eq!(lines[2], "last");
    }

    #[tokio::test]
    async fn test_fast_mode_skips_blank_lines() {
        let geo = Arc::new(MockCountryLookup::default().with_default("Japan"));
        let pipeline = pipeline(PipelineConfig::default(), geo.clone());
        let lines = vec![
            "🇯🇵 my-server.jp".to_string(),
            "   ".to_string(),
            String::new(),
            "🇩🇪 frankfurt 5.5.5.5:443".to_string(),
            "tokyo-2 8.8.8.8:443".to_string(),
        ];
        let cancel = AtomicBool::new(false);

        let report = pipeline
            .classify(lines, &japan(), CheckMode::Fast, &cancel, |_| {})
            .await;

        assert_eq!(report.state, PipelineState::Done);
        assert_eq!(report.matches(), vec!["🇯🇵 my-server.jp", "tokyo-2 8.8.8.8:443"]);
        assert_eq!(report.blank_lines, 2);
        assert_eq!(report.total_lines, 5);
        assert!(report.outcomes.iter().all(|o| o.method == MatchMethod::Lexical));
        assert_eq!(geo.calls(), 0);
    }

    #[tokio::test]
    async fn test_excess_lines_are_dropped() {
        let pipeline = pipeline(
            PipelineConfig::new().with_max_lines(2),
            Arc::new(MockCountryLookup::default()),
        );
        let lines = vec!["jp a".to_string(), "jp b".to_string(), "jp c".to_string()];
        let cancel = AtomicBool::new(false);

        let report = pipeline
            .classify(lines, &japan(), CheckMode::Fast, &cancel, |_| {})
            .await;
        assert_eq!(report.dropped_lines, 1);
        assert_eq!(report.matches(), vec!["jp a", "jp b"]);
    }

    #[tokio::test]
    async fn test_strict_mode_reverifies_candidates() {
        let geo = Arc::new(
            MockCountryLookup::default()
                .with_entry("45.0.0.1", "Japan")
                .with_entry("45.0.0.2", "Germany"),
        );
        let pipeline = pipeline(PipelineConfig::default(), geo.clone());
        let lines = vec![
            "jp-1 45.0.0.1:443".to_string(),
            "jp-2 45.0.0.2:443".to_string(),
            "de-1 45.0.0.3:443".to_string(),
        ];
        let cancel = AtomicBool::new(false);

        let mut progress = 0;
        let report = pipeline
            .classify(lines, &japan(), CheckMode::Strict, &cancel, |_| progress += 1)
            .await;

        assert_eq!(report.lexical_matches, 2);
        assert_eq!(report.candidates_checked, 2);
        assert_eq!(report.matches(), vec!["jp-1 45.0.0.1:443"]);
        assert_eq!(report.outcomes[0].method, MatchMethod::StrictGeoip);
        assert_eq!(report.outcomes[0].country.as_deref(), Some("Japan"));
        assert_eq!(progress, 1);
        assert_eq!(geo.calls(), 2);
    }

    #[tokio::test]
    async fn test_candidate_cap() {
        let geo = Arc::new(MockCountryLookup::default().with_default("Japan"));
        let pipeline = pipeline(PipelineConfig::new().with_max_candidates(3), geo.clone());
        let lines: Vec<String> = (1..=6).map(|i| vmess_line(&format!("45.1.0.{i}"), None)).collect();
        let target = TargetCountry::new("Japan", "JP");
        let cancel = AtomicBool::new(false);

        // vmess payloads carry no keywords, so tag them in the fragment.
        let lines: Vec<String> = lines.into_iter().map(|l| format!("{l}#jp")).collect();
        let report = pipeline
            .classify(lines, &target, CheckMode::Strict, &cancel, |_| {})
            .await;

        assert_eq!(report.lexical_matches, 6);
        assert_eq!(report.candidates_checked, 3);
        assert_eq!(geo.calls(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_strict_pass_keeps_partial_matches() {
        let geo = Arc::new(MockCountryLookup::default().with_default("Japan"));
        let pipeline = pipeline(PipelineConfig::default(), geo.clone());
        let lines: Vec<String> = (1..=6).map(|i| format!("jp-{i} 45.2.0.{i}:443")).collect();
        let cancel = AtomicBool::new(false);

        let report = pipeline
            .classify(lines, &japan(), CheckMode::Strict, &cancel, |_| {
                cancel.store(true, std::sync::atomic::Ordering::SeqCst);
            })
            .await;

        assert!(report.is_cancelled());
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(geo.calls(), 2);
    }
}
