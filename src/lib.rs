//! Proxy GeoSort - Config line country classifier
//!
//! Sorts proxy config lines (vmess, vless, bare host:port) by the country
//! their endpoint sits in. A fast keyword pass narrows the input; an optional
//! strict pass verifies candidates through DNS and IP geolocation with a
//! bounded worker pool.

pub mod classify;
pub mod country;
pub mod error;
pub mod output;

pub use classify::*;
pub use error::InputError;

/// Application result type
pub type Result<T> = anyhow::Result<T>;

/// Application configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Input limits
    pub pipeline: PipelineConfig,
    /// Strict pass worker pool
    pub checker: CheckerConfig,
    /// Geolocation backend
    pub geo: GeoConfig,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_checker(mut self, checker: CheckerConfig) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_geo(mut self, geo: GeoConfig) -> Self {
        self.geo = geo;
        self
    }
}
