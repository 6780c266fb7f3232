//! Keyword, script, emoji and TLD matching without network access

use crate::classify::models::{MatchMethod, TargetCountry};
use crate::classify::parser::ConfigParser;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;

/// Patterns per canonical (lowercase) country name.
///
/// Order inside a list only matters for short-circuiting: flag glyph, ISO
/// code, English name, cities, country-code TLD, native/CJK names.
const PATTERN_TABLE: &[(&str, &[&str])] = &[
    ("japan", &[r"🇯🇵", r"\bjp\b", r"japan", r"tokyo", r"osaka", r"\.jp\b", r"日本", r"япония"]),
    (
        "united states",
        &[
            r"🇺🇸",
            r"\bus\b",
            r"usa\b",
            r"united states",
            r"new york",
            r"los angeles",
            r"\.us\b",
            r"美国",
            r"сша",
        ],
    ),
    ("russia", &[r"🇷🇺", r"\bru\b", r"russia", r"moscow", r"\.ru\b", r"россия", r"俄国", r"俄罗斯"]),
    ("germany", &[r"🇩🇪", r"\bde\b", r"germany", r"frankfurt", r"\.de\b", r"германия", r"德国"]),
    (
        "united kingdom",
        &[r"🇬🇧", r"\buk\b", r"united kingdom", r"london", r"\.uk\b", r"英国", r"великобритания"],
    ),
    ("france", &[r"🇫🇷", r"france", r"paris", r"\.fr\b", r"法国", r"франция"]),
    ("brazil", &[r"🇧🇷", r"brazil", r"sao paulo", r"\.br\b", r"巴西", r"бразилия"]),
    ("singapore", &[r"🇸🇬", r"singapore", r"\.sg\b", r"新加坡", r"сингапур"]),
    ("south korea", &[r"🇰🇷", r"korea", r"seoul", r"\.kr\b", r"韩国", r"южная корея"]),
    ("turkey", &[r"🇹🇷", r"turkey", r"istanbul", r"\.tr\b", r"土耳其", r"турция"]),
    ("taiwan", &[r"🇹🇼", r"taiwan", r"taipei", r"\.tw\b", r"台湾", r"тайвань"]),
    ("switzerland", &[r"🇨🇭", r"switzerland", r"zurich", r"\.ch\b", r"瑞士", r"швейцария"]),
    ("netherlands", &[r"🇳🇱", r"netherlands", r"amsterdam", r"\.nl\b", r"荷兰", r"нидерланды"]),
    ("canada", &[r"🇨🇦", r"canada", r"toronto", r"\.ca\b", r"加拿大", r"канада"]),
    ("sweden", &[r"🇸🇪", r"sweden", r"stockholm", r"\.se\b", r"瑞典", r"швеция"]),
    ("australia", &[r"🇦🇺", r"australia", r"sydney", r"\.au\b", r"澳大利亚", r"австралия"]),
    ("india", &[r"🇮🇳", r"india", r"mumbai", r"\.in\b", r"印度", r"индия"]),
];

static PATTERNS: Lazy<HashMap<&'static str, Vec<Regex>>> = Lazy::new(|| {
    PATTERN_TABLE
        .iter()
        .map(|(country, patterns)| {
            let compiled = patterns
                .iter()
                .map(|p| {
                    RegexBuilder::new(p)
                        .case_insensitive(true)
                        .build()
                        .expect("Invalid country pattern")
                })
                .collect();
            (*country, compiled)
        })
        .collect()
});

/// CPU-only classifier for the fast pass
pub struct LexicalClassifier;

impl LexicalClassifier {
    /// Whether the line mentions `target` or sits under one of its TLDs
    pub fn matches_country(line: &str, target: &TargetCountry) -> bool {
        Self::classify(line, target).is_some()
    }

    /// Like [`matches_country`](Self::matches_country), but reports which
    /// rule fired.
    pub fn classify(line: &str, target: &TargetCountry) -> Option<MatchMethod> {
        if line.trim().is_empty() {
            return None;
        }

        let hit = Self::names(target)
            .filter_map(|name| PATTERNS.get(name.as_str()))
            .flatten()
            .any(|pattern| pattern.is_match(line));
        if hit {
            return Some(MatchMethod::Lexical);
        }

        let tld = ConfigParser::extract_host(line).and_then(|endpoint| endpoint.tld())?;
        target.owns_tld(&tld).then_some(MatchMethod::StructuralTld)
    }

    /// Countries the pattern table knows about
    pub fn known_countries() -> impl Iterator<Item = &'static str> {
        PATTERN_TABLE.iter().map(|(country, _)| *country)
    }

    fn names(target: &TargetCountry) -> impl Iterator<Item = String> + '_ {
        std::iter::once(target.canonical_name.to_lowercase())
            .chain(target.aliases.iter().map(|alias| alias.to_lowercase()))
    }
}
