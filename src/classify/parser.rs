//! Config line parser: endpoint extraction and structural validation

use crate::classify::models::{ConfigLine, Endpoint, LineReport, Protocol};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

const VMESS_SCHEME: &str = "vmess://";
const VLESS_SCHEME: &str = "vless://";

/// Fields every well-formed vmess share link carries
const VMESS_REQUIRED_FIELDS: [&str; 6] = ["v", "ps", "add", "port", "id", "aid"];

/// Share links are produced by many clients; accept both alphabets, any
/// padding and non-canonical trailing bits.
const LENIENT: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_decode_allow_trailing_bits(true)
    .with_decode_padding_mode(DecodePaddingMode::Indifferent);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

static IPV4_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b((?:[0-9]{1,3}\.){3}[0-9]{1,3})\b(?::([0-9]{1,5})\b)?").expect("Invalid IPv4 regex")
});

static DOMAIN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:[a-z][a-z0-9+.-]*://)?\b((?:[a-z0-9]+(?:-[a-z0-9]+)*\.)+[a-z]{2,})\b(?::([0-9]{1,5})\b)?")
        .expect("Invalid domain regex")
});

static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}:[0-9]{1,5}\b").expect("Invalid IP:PORT regex")
});

static VLESS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^vless://[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}@\S+")
        .expect("Invalid vless regex")
});

/// Parser for V2Ray share links and bare host:port lines
pub struct ConfigParser;

impl ConfigParser {
    /// Extract the network endpoint from a config line.
    ///
    /// Strategies, first success wins:
    /// 1. vmess/vless payload decoded as base64 JSON (`host`, then `add`)
    /// 2. first dotted-quad IPv4 literal
    /// 3. first domain name
    pub fn extract_host(line: &str) -> Option<Endpoint> {
        let line = line.trim();

        if let Some(endpoint) = Self::extract_from_payload(line) {
            return Some(endpoint);
        }

        if let Some(caps) = IPV4_REGEX.captures(line) {
            let port = caps.get(2).and_then(|p| p.as_str().parse().ok());
            return Some(Endpoint::new(caps[1].to_string(), port));
        }

        if let Some(caps) = DOMAIN_REGEX.captures(line) {
            let port = caps.get(2).and_then(|p| p.as_str().parse().ok());
            return Some(Endpoint::new(caps[1].to_string(), port));
        }

        None
    }

    /// Check that a line is syntactically well-formed for its protocol.
    ///
    /// This says nothing about reachability or location.
    pub fn validate_structure(line: &str) -> bool {
        let line = line.trim();

        if line.starts_with(VMESS_SCHEME) {
            return Self::decode_payload(line)
                .map(|config| VMESS_REQUIRED_FIELDS.iter().all(|f| config.contains_key(*f)))
                .unwrap_or(false);
        }

        if line.starts_with(VLESS_SCHEME) {
            return VLESS_REGEX.is_match(line);
        }

        IP_PORT_REGEX.is_match(line)
    }

    /// Derive the protocol tag of a line
    pub fn detect_protocol(line: &str) -> Protocol {
        let line = line.trim();
        if line.starts_with(VMESS_SCHEME) {
            Protocol::Vmess
        } else if line.starts_with(VLESS_SCHEME) {
            Protocol::Vless
        } else if IP_PORT_REGEX.is_match(line) {
            Protocol::Bare
        } else {
            Protocol::Unknown
        }
    }

    /// Split raw content into config lines, keeping blank lines in place
    pub fn parse_string(content: &str) -> Vec<ConfigLine> {
        content.lines().map(ConfigLine::new).collect()
    }

    /// Protocol, endpoint and validity of every non-blank line
    pub fn inspect(content: &str) -> Vec<LineReport> {
        Self::parse_string(content)
            .into_iter()
            .enumerate()
            .filter(|(_, line)| !line.is_blank())
            .map(|(index, line)| LineReport {
                line_number: index + 1,
                protocol: line.protocol(),
                endpoint: line.endpoint(),
                valid: Self::validate_structure(line.as_str()),
            })
            .collect()
    }

    fn extract_from_payload(line: &str) -> Option<Endpoint> {
        let config = Self::decode_payload(line)?;

        let host = ["host", "add"].iter().find_map(|key| {
            config
                .get(*key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|h| !h.is_empty())
        })?;

        let port = config.get("port").and_then(|p| match p {
            Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });

        Some(Endpoint::new(host.to_string(), port))
    }

    /// Decode the base64 JSON body of a vmess/vless share link
    fn decode_payload(line: &str) -> Option<Map<String, Value>> {
        let rest = line
            .strip_prefix(VMESS_SCHEME)
            .or_else(|| line.strip_prefix(VLESS_SCHEME))?;

        let encoded = rest
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim();
        if encoded.is_empty() {
            return None;
        }

        let mut padded = encoded.trim_end_matches('=').to_string();
        while padded.len() % 4 != 0 {
            padded.push('=');
        }

        let bytes = STANDARD_LENIENT
            .decode(&padded)
            .or_else(|_| URL_SAFE_LENIENT.decode(&padded))
            .ok()?;
        let text = String::from_utf8(bytes).ok()?;

        match serde_json::from_str::<Value>(&text).ok()? {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) fn vmess_line(add: &str, host: Option<&str>) -> String {
    use base64::engine::general_purpose::STANDARD;

    let mut config = serde_json::json!({
        "v": "2",
        "ps": "test node",
        "add": add,
        "port": 443,
        "id": "a1b2c3d4-e5f6-7890-abcd-ef1234567890",
        "aid": 0,
    });
    if let Some(host) = host {
        config["host"] = Value::String(host.to_string());
    }
    format!("{}{}", VMESS_SCHEME, STANDARD.encode(config.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD_NO_PAD;

    #[test]
    fn test_vmess_extracts_add() {
        let line = vmess_line("node.example.com", None);
        let endpoint = ConfigParser::extract_host(&line).unwrap();
        assert_eq!(endpoint.host, "node.example.com");
        assert_eq!(endpoint.port, Some(443));
        assert!(ConfigParser::validate_structure(&line));
    }

    #[test]
    fn test_vmess_prefers_host_field() {
        let line = vmess_line("1.2.3.4", Some("cdn.example.org"));
        let endpoint = ConfigParser::extract_host(&line).unwrap();
        assert_eq!(endpoint.host, "cdn.example.org");
    }

    #[test]
    fn test_vmess_empty_host_falls_back_to_add() {
        let line = vmess_line("5.6.7.8", Some(""));
        assert_eq!(ConfigParser::extract_host(&line).unwrap().host, "5.6.7.8");
    }

    #[test]
    fn test_vmess_without_padding() {
        let json = r#"{"v":"2","ps":"x","add":"9.9.9.9","port":"8443","id":"u","aid":"0"}"#;
        let line = format!("vmess://{}?remarks=1", STANDARD_NO_PAD.encode(json));
        let endpoint = ConfigParser::extract_host(&line).unwrap();
        assert_eq!(endpoint.host, "9.9.9.9");
        assert_eq!(endpoint.port, Some(8443));
        assert!(ConfigParser::validate_structure(&line));
    }

    #[test]
    fn test_vmess_missing_field_is_invalid() {
        let json = r#"{"v":"2","add":"9.9.9.9","port":443,"id":"u","aid":0}"#;
        let line = format!("vmess://{}", STANDARD_NO_PAD.encode(json));
        assert!(!ConfigParser::validate_structure(&line));
    }

    #[test]
    fn test_vmess_garbage_falls_through() {
        let line = "vmess://!!!not-base64!!! 203.0.113.7";
        assert!(!ConfigParser::validate_structure(line));
        assert_eq!(ConfigParser::extract_host(line).unwrap().host, "203.0.113.7");
    }

    #[test]
    fn test_vless_extraction_and_validation() {
        let line = "vless://a1b2c3d4-e5f6-7890-abcd-ef1234567890@1.2.3.4:443";
        let endpoint = ConfigParser::extract_host(line).unwrap();
        assert_eq!(endpoint.host, "1.2.3.4");
        assert_eq!(endpoint.port, Some(443));
        assert!(ConfigParser::validate_structure(line));
    }

    #[test]
    fn test_vless_malformed_uuid() {
        let line = "vless://a1b2c3d-e5f6-7890-abcd-ef1234567890@1.2.3.4:443";
        assert!(!ConfigParser::validate_structure(line));
    }

    #[test]
    fn test_vless_domain_host() {
        let line = "vless://a1b2c3d4-e5f6-7890-abcd-ef1234567890@edge.example.de:8443?security=tls#DE";
        let endpoint = ConfigParser::extract_host(line).unwrap();
        assert_eq!(endpoint.host, "edge.example.de");
        assert_eq!(endpoint.port, Some(8443));
    }

    #[test]
    fn test_bare_lines() {
        assert!(ConfigParser::validate_structure("192.168.1.1:8080"));
        assert!(!ConfigParser::validate_structure("192.168.1.1"));
        assert!(!ConfigParser::validate_structure("just some text"));

        let endpoint = ConfigParser::extract_host("🇯🇵 my-server.jp").unwrap();
        assert_eq!(endpoint.host, "my-server.jp");
        assert_eq!(endpoint.port, None);

        let endpoint = ConfigParser::extract_host("trojan://pw@proxy.example.net:443").unwrap();
        assert_eq!(endpoint.host, "proxy.example.net");
    }

    #[test]
    fn test_no_endpoint() {
        assert!(ConfigParser::extract_host("").is_none());
        assert!(ConfigParser::extract_host("nothing to see here").is_none());
        assert!(ConfigParser::extract_host("vmess://").is_none());
    }

    #[test]
    fn test_only_ascii_digits_form_addresses() {
        let arabic_indic = "١٢.٣.٤.٥:٤٤٣";
        assert!(ConfigParser::extract_host(arabic_indic).is_none());
        assert!(!ConfigParser::validate_structure(arabic_indic));
        assert_eq!(ConfigParser::detect_protocol(arabic_indic), Protocol::Unknown);
    }

    #[test]
    fn test_detect_protocol() {
        assert_eq!(ConfigParser::detect_protocol("vmess://xyz"), Protocol::Vmess);
        assert_eq!(ConfigParser::detect_protocol("vless://xyz"), Protocol::Vless);
        // Same rule as the structural check: bare lines need an IPv4 ip:port.
        assert_eq!(ConfigParser::detect_protocol("host.example.com:443"), Protocol::Unknown);
        assert!(!ConfigParser::validate_structure("host.example.com:443"));
        assert_eq!(ConfigParser::detect_protocol("10.0.0.1:1080"), Protocol::Bare);
        assert_eq!(ConfigParser::detect_protocol("10.0.0.1"), Protocol::Unknown);
    }

    #[test]
    fn test_inspect_reports_non_blank_lines() {
        let content = format!("1.2.3.4:443\n\n{}\nnode.example.com:443", vmess_line("edge.example.jp", None));
        let reports = ConfigParser::inspect(&content);

        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].line_number, 1);
        assert_eq!(reports[0].protocol, Protocol::Bare);
        assert!(reports[0].valid);

        assert_eq!(reports[1].line_number, 3);
        assert_eq!(reports[1].protocol, Protocol::Vmess);
        assert_eq!(reports[1].endpoint.as_ref().map(|e| e.host.as_str()), Some("edge.example.jp"));
        assert!(reports[1].valid);

        assert_eq!(reports[2].line_number, 4);
        assert_eq!(reports[2].protocol, Protocol::Unknown);
        assert_eq!(reports[2].endpoint.as_ref().map(|e| e.host.as_str()), Some("node.example.com"));
        assert!(!reports[2].valid);
    }

    #[test]
    fn test_parse_string_keeps_blank_lines() {
        let lines = ConfigParser::parse_string("a\n\n  \nb");
        assert_eq!(lines.len(), 4);
        assert!(lines[1].is_blank());
        assert!(lines[2].is_blank());
    }
}
