//! Config line classification
//!
//! This module provides functionality for:
//! - Extracting endpoints from vmess/vless share links and bare host:port lines
//! - Validating line structure per protocol
//! - Matching lines to a country by keywords, flags and TLDs (no network)
//! - Verifying candidates through DNS and IP geolocation with a worker pool
//! - Caching every resolution for the life of the process

pub mod cache;
pub mod checker;
pub mod dns;
pub mod geo;
pub mod lexical;
pub mod models;
pub mod parser;
pub mod pipeline;

pub use cache::ResolutionCache;
pub use checker::{
    BatchChecker, BatchOutcome, CancelSignal, CheckerConfig, ProgressUpdate, StrictVerifier,
};
pub use dns::{DnsResolver, HostLookup, SystemHostLookup};
pub use geo::{
    CountryLookup, GeoConfig, GeoResolver, HttpCountryLookup, MmdbCountryLookup,
};
pub use lexical::LexicalClassifier;
pub use models::{
    CheckMode, ClassificationOutcome, ConfigLine, Endpoint, LineReport, MatchMethod, Protocol,
    TargetCountry,
};
pub use parser::ConfigParser;
pub use pipeline::{ClassificationPipeline, ClassificationReport, PipelineConfig, PipelineState};
