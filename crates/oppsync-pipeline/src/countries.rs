//! Country-name normalisation for `country` and `eligible_nationalities`.

use std::collections::HashMap;

use anyhow::{Context, Result};
use oppsync_core::ExtractedOpportunity;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use strsim::jaro_winkler;

const BUILTIN_RULES: &str = include_str!("../rules/countries.yaml");

/// Fuzzy matches below this score keep the name as written.
const FUZZY_THRESHOLD: f64 = 0.93;

#[derive(Debug, Clone, Deserialize)]
struct CountryRulesFile {
    #[allow(dead_code)]
    version: u32,
    canonical: Vec<String>,
    #[serde(default)]
    aliases: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CountryNormalizer {
    canonical: Vec<String>,
    /// Lower-cased alias or canonical name → canonical name.
    lookup: HashMap<String, String>,
}

impl CountryNormalizer {
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_RULES).context("parsing rules/countries.yaml")
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let rules: CountryRulesFile = serde_yaml::from_str(text)?;
        let mut lookup = rules
            .canonical
            .iter()
            .map(|name| (name.to_lowercase(), name.clone()))
            .collect::<HashMap<_, _>>();
        for (alias, target) in rules.aliases {
            lookup.insert(alias.trim().to_lowercase(), target);
        }
        Ok(Self {
            canonical: rules.canonical,
            lookup,
        })
    }

    pub fn normalize(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        let key = trimmed.to_lowercase();
        if let Some(hit) = self.lookup.get(&key) {
            return hit.clone();
        }
        let key = key.strip_prefix("the ").unwrap_or(key.as_str()).trim();
        if let Some(hit) = self.lookup.get(key) {
            return hit.clone();
        }

        let best = self
            .canonical
            .iter()
            .map(|name| (jaro_winkler(key, &name.to_lowercase()), name))
            .max_by(|a, b| a.0.total_cmp(&b.0));
        match best {
            Some((score, name)) if score >= FUZZY_THRESHOLD => name.clone(),
            _ => trimmed.to_string(),
        }
    }

    /// Normalises each name, dropping blanks and duplicates while keeping order.
    pub fn normalize_all<'a, I>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out: Vec<String> = Vec::new();
        for name in names {
            if name.trim().is_empty() {
                continue;
            }
            let normalized = self.normalize(name);
            if !out.contains(&normalized) {
                out.push(normalized);
            }
        }
        out
    }

    /// Rewrites `country` to a list of canonical names and `eligible_nationalities`
    /// likewise, leaving the literal `"all"` untouched.
    pub fn apply(&self, record: &mut ExtractedOpportunity) {
        if let Some(value) = record.get("country") {
            let names = self.normalize_value(value);
            record.set("country", names_to_json(names));
        }

        let Some(value) = record.get("eligible_nationalities") else {
            return;
        };
        if is_all(value) {
            return;
        }
        let names = self.normalize_value(value);
        record.set("eligible_nationalities", names_to_json(names));
    }

    fn normalize_value(&self, value: &JsonValue) -> Vec<String> {
        match value {
            JsonValue::String(s) => self.normalize_all([s.as_str()]),
            JsonValue::Array(items) => {
                let mut names: Vec<String> = Vec::new();
                for item in items.iter().filter_map(JsonValue::as_str) {
                    let name = if item.trim().eq_ignore_ascii_case("all") {
                        "all".to_string()
                    } else if item.trim().is_empty() {
                        continue;
                    } else {
                        self.normalize(item)
                    };
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
                names
            }
            _ => Vec::new(),
        }
    }
}

fn is_all(value: &JsonValue) -> bool {
    value
        .as_str()
        .map(|s| s.trim().eq_ignore_ascii_case("all"))
        .unwrap_or(false)
}

fn names_to_json(names: Vec<String>) -> JsonValue {
    JsonValue::Array(names.into_iter().map(JsonValue::String).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalizer() -> CountryNormalizer {
        CountryNormalizer::builtin().unwrap()
    }

    #[test]
    fn aliases_map_to_short_names() {
        let n = normalizer();
        assert_eq!(n.normalize("United States of America"), "USA");
        assert_eq!(n.normalize("Great Britain"), "UK");
        assert_eq!(n.normalize("united arab emirates"), "UAE");
        assert_eq!(n.normalize("Republic of Korea"), "South Korea");
        assert_eq!(n.normalize("Czechia"), "Czech Republic");
        assert_eq!(n.normalize("Türkiye"), "Turkey");
        assert_eq!(n.normalize("The Philippines"), "Philippines");
        assert_eq!(n.normalize(" germany "), "Germany");
    }

    #[test]
    fn near_misses_snap_and_strangers_pass_through() {
        let n = normalizer();
        assert_eq!(n.normalize("Germnay"), "Germany");
        assert_eq!(n.normalize("Atlantis"), "Atlantis");
    }

    #[test]
    fn lists_are_deduplicated_in_order() {
        let n = normalizer();
        assert_eq!(
            n.normalize_all(["Holland", "Netherlands", "", "Japan"]),
            vec!["Netherlands".to_string(), "Japan".to_string()]
        );
    }

    #[test]
    fn records_are_rewritten_in_place() {
        let n = normalizer();
        let mut record = ExtractedOpportunity::from_value(json!({
            "title": "Grant",
            "country": "United Kingdom",
            "eligible_nationalities": ["Egypt", "KSA", "Egypt"]
        }))
        .unwrap();
        n.apply(&mut record);
        assert_eq!(record.get("country"), Some(&json!(["UK"])));
        assert_eq!(
            record.get("eligible_nationalities"),
            Some(&json!(["Egypt", "Saudi Arabia"]))
        );
    }

    #[test]
    fn unrestricted_nationalities_stay_all() {
        let n = normalizer();
        let mut record = ExtractedOpportunity::from_value(json!({
            "eligible_nationalities": "All"
        }))
        .unwrap();
        n.apply(&mut record);
        assert_eq!(record.get("eligible_nationalities"), Some(&json!("All")));
        assert!(record.get("country").is_none());
    }
}
