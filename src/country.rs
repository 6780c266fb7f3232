//! Static country registry used to turn a user query into a [`TargetCountry`]

use crate::classify::models::TargetCountry;
use crate::error::InputError;

/// One known country. `name` is spelled the way the geolocation service
/// reports it.
#[derive(Debug, Clone, Copy)]
pub struct CountryEntry {
    pub name: &'static str,
    pub code: &'static str,
    pub alternate_codes: &'static [&'static str],
    pub aliases: &'static [&'static str],
}

const COUNTRIES: &[CountryEntry] = &[
    CountryEntry { name: "Japan", code: "jp", alternate_codes: &[], aliases: &["nippon", "日本"] },
    CountryEntry {
        name: "United States",
        code: "us",
        alternate_codes: &[],
        aliases: &["usa", "america", "united states of america"],
    },
    CountryEntry { name: "Russia", code: "ru", alternate_codes: &["su"], aliases: &["russian federation"] },
    CountryEntry { name: "Germany", code: "de", alternate_codes: &[], aliases: &["deutschland"] },
    CountryEntry {
        name: "United Kingdom",
        code: "gb",
        alternate_codes: &["uk"],
        aliases: &["great britain", "britain", "england"],
    },
    CountryEntry { name: "France", code: "fr", alternate_codes: &[], aliases: &[] },
    CountryEntry { name: "Brazil", code: "br", alternate_codes: &[], aliases: &["brasil"] },
    CountryEntry { name: "Singapore", code: "sg", alternate_codes: &[], aliases: &[] },
    CountryEntry {
        name: "South Korea",
        code: "kr",
        alternate_codes: &[],
        aliases: &["korea", "republic of korea", "korea, republic of"],
    },
    CountryEntry { name: "Turkey", code: "tr", alternate_codes: &[], aliases: &["türkiye", "turkiye"] },
    CountryEntry { name: "Taiwan", code: "tw", alternate_codes: &[], aliases: &[] },
    CountryEntry { name: "Switzerland", code: "ch", alternate_codes: &[], aliases: &["swiss"] },
    CountryEntry {
        name: "Netherlands",
        code: "nl",
        alternate_codes: &[],
        aliases: &["holland", "the netherlands", "kingdom of the netherlands"],
    },
    CountryEntry { name: "Canada", code: "ca", alternate_codes: &[], aliases: &[] },
    CountryEntry { name: "Sweden", code: "se", alternate_codes: &[], aliases: &[] },
    CountryEntry { name: "Australia", code: "au", alternate_codes: &[], aliases: &[] },
    CountryEntry { name: "India", code: "in", alternate_codes: &[], aliases: &["bharat"] },
    CountryEntry { name: "Finland", code: "fi", alternate_codes: &[], aliases: &["suomi"] },
    CountryEntry { name: "Poland", code: "pl", alternate_codes: &[], aliases: &["polska"] },
    CountryEntry { name: "Hong Kong", code: "hk", alternate_codes: &[], aliases: &["hongkong"] },
];

/// Russian names accepted in queries
const RU_EN: &[(&str, &str)] = &[
    ("россия", "russia"),
    ("сша", "united states"),
    ("германия", "germany"),
    ("япония", "japan"),
    ("франция", "france"),
    ("великобритания", "united kingdom"),
    ("сингапур", "singapore"),
    ("нидерланды", "netherlands"),
    ("канада", "canada"),
    ("швейцария", "switzerland"),
    ("швеция", "sweden"),
    ("австралия", "australia"),
    ("бразилия", "brazil"),
    ("индия", "india"),
    ("южная корея", "south korea"),
    ("турция", "turkey"),
    ("тайвань", "taiwan"),
    ("финляндия", "finland"),
    ("польша", "poland"),
    ("гонконг", "hong kong"),
];

/// Minimum query length for prefix matching
const MIN_PREFIX_LEN: usize = 3;

/// Lowercase, trim and translate a country query
pub fn normalize_country_name(name: &str) -> String {
    let name = name.trim().to_lowercase();
    RU_EN
        .iter()
        .find(|(ru, _)| *ru == name)
        .map(|(_, en)| en.to_string())
        .unwrap_or(name)
}

/// All known countries, in resolution priority order
pub fn countries() -> &'static [CountryEntry] {
    COUNTRIES
}

impl CountryEntry {
    fn is_exact(&self, query: &str) -> bool {
        self.name.eq_ignore_ascii_case(query)
            || self.code == query
            || self.alternate_codes.contains(&query)
            || self.aliases.contains(&query)
    }

    fn is_prefix(&self, query: &str) -> bool {
        query.chars().count() >= MIN_PREFIX_LEN
            && (self.name.to_lowercase().starts_with(query)
                || self.aliases.iter().any(|alias| alias.starts_with(query)))
    }

    pub fn to_target(&self) -> TargetCountry {
        let mut target = TargetCountry::new(self.name, self.code).with_alias(self.code);
        for code in self.alternate_codes {
            target = target.with_alternate_code(*code);
        }
        for alias in self.aliases {
            target = target.with_alias(*alias);
        }
        target
    }
}

/// Resolve a free-form country query.
///
/// Exact matches on name, ISO code or alias win; otherwise the first entry
/// (in table order) whose name or alias starts with the query is used.
pub fn resolve_country(query: &str) -> Result<TargetCountry, InputError> {
    let normalized = normalize_country_name(query);
    if normalized.is_empty() {
        return Err(InputError::UnknownCountry(query.to_string()));
    }

    COUNTRIES
        .iter()
        .find(|entry| entry.is_exact(&normalized))
        .or_else(|| COUNTRIES.iter().find(|entry| entry.is_prefix(&normalized)))
        .map(CountryEntry::to_target)
        .ok_or_else(|| InputError::UnknownCountry(query.to_string()))
}
