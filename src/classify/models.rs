//! Config line data models

use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::classify::parser::ConfigParser;

/// Protocol tag derived from a config line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vmess,
    Vless,
    /// Scheme-less line carrying an IPv4 `ip:port`
    Bare,
    #[default]
    Unknown,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Vmess => write!(f, "vmess"),
            Protocol::Vless => write!(f, "vless"),
            Protocol::Bare => write!(f, "bare"),
            Protocol::Unknown => write!(f, "unknown"),
        }
    }
}

/// A single raw config line.
///
/// The protocol tag is computed lazily on first access and never changes
/// afterwards.
#[derive(Debug, Clone)]
pub struct ConfigLine {
    raw: String,
    protocol: OnceCell<Protocol>,
}

impl ConfigLine {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            protocol: OnceCell::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn into_inner(self) -> String {
        self.raw
    }

    pub fn is_blank(&self) -> bool {
        self.raw.trim().is_empty()
    }

    pub fn protocol(&self) -> Protocol {
        *self
            .protocol
            .get_or_init(|| ConfigParser::detect_protocol(&self.raw))
    }

    /// Extract the network endpoint of this line
    pub fn endpoint(&self) -> Option<Endpoint> {
        ConfigParser::extract_host(&self.raw)
    }
}

impl PartialEq for ConfigLine {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for ConfigLine {}

impl fmt::Display for ConfigLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Network endpoint extracted from a config line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: Option<u16>,
}

impl Endpoint {
    pub fn new(host: String, port: Option<u16>) -> Self {
        Self { host, port }
    }

    /// Last dot-separated label of the host, lowercased
    pub fn tld(&self) -> Option<String> {
        let (_, tld) = self.host.rsplit_once('.')?;
        if tld.is_empty() || tld.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(tld.to_ascii_lowercase())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}", self.host),
        }
    }
}

/// Country a request is filtering for.
///
/// `alpha2_codes` holds the primary ISO 3166-1 code first, followed by any
/// alternate codes (e.g. `uk` next to `gb`). All codes and aliases are stored
/// lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetCountry {
    pub canonical_name: String,
    pub alpha2_codes: Vec<String>,
    pub aliases: BTreeSet<String>,
}

impl TargetCountry {
    pub fn new(canonical_name: impl Into<String>, alpha2_code: impl Into<String>) -> Self {
        Self {
            canonical_name: canonical_name.into(),
            alpha2_codes: vec![alpha2_code.into().to_lowercase()],
            aliases: BTreeSet::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into().to_lowercase());
        self
    }

    pub fn with_alternate_code(mut self, code: impl Into<String>) -> Self {
        let code = code.into().to_lowercase();
        if !self.alpha2_codes.contains(&code) {
            self.alpha2_codes.push(code);
        }
        self
    }

    /// Primary alpha-2 code
    pub fn alpha2_code(&self) -> &str {
        self.alpha2_codes.first().map(String::as_str).unwrap_or_default()
    }

    /// Case-insensitive comparison against the canonical name
    pub fn is_named(&self, country: &str) -> bool {
        country.trim().eq_ignore_ascii_case(self.canonical_name.trim())
    }

    /// Whether `tld` is one of this country's ISO codes
    pub fn owns_tld(&self, tld: &str) -> bool {
        self.alpha2_codes.iter().any(|code| code.eq_ignore_ascii_case(tld))
    }
}

impl fmt::Display for TargetCountry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.canonical_name, self.alpha2_code().to_uppercase())
    }
}

/// Which stage produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MatchMethod {
    #[serde(rename = "lexical")]
    Lexical,
    #[serde(rename = "tld")]
    StructuralTld,
    #[serde(rename = "geoip")]
    StrictGeoip,
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMethod::Lexical => write!(f, "lexical"),
            MatchMethod::StructuralTld => write!(f, "tld"),
            MatchMethod::StrictGeoip => write!(f, "geoip"),
        }
    }
}

/// Result of classifying one line in one pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationOutcome {
    pub line: String,
    pub matched: bool,
    pub method: MatchMethod,
    pub country: Option<String>,
}

impl ClassificationOutcome {
    pub fn matched(line: String, method: MatchMethod, country: Option<String>) -> Self {
        Self {
            line,
            matched: true,
            method,
            country,
        }
    }

    pub fn rejected(line: String, method: MatchMethod) -> Self {
        Self {
            line,
            matched: false,
            method,
            country: None,
        }
    }
}

/// Classification mode requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckMode {
    /// Lexical pass only
    #[default]
    Fast,
    /// Lexical pass followed by DNS + GeoIP verification
    Strict,
}

/// Per-line summary printed by `inspect`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineReport {
    /// 1-based position in the input
    pub line_number: usize,
    pub protocol: Protocol,
    pub endpoint: Option<Endpoint>,
    pub valid: bool,
}
