//! Environment-driven configuration. Shared settings always resolve (with defaults);
//! credentials are resolved per stage so a missing key only fails the stage needing it.

use std::path::PathBuf;
use std::time::Duration;

use oppsync_core::DEFAULT_SOURCE;
use oppsync_storage::{DbSettings, QdrantConfig};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://opportunitiescorners.com/";
pub const DEFAULT_COLLECTION: &str = "opportunities_v1";
pub const GROQ_MODEL: &str = "openai/gpt-oss-120b";
pub const CEREBRAS_MODEL: &str = "gpt-oss-120b";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },
    #[error("no LLM provider key set (GROQ_API_KEY or CEREBRAS_API_KEY)")]
    NoLlmProvider,
}

/// Reads the first non-empty value among `names` (upper-case name first, then aliases).
fn var<F>(lookup: &F, names: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    names
        .iter()
        .filter_map(|name| lookup(*name))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn required<F>(lookup: &F, names: &[&'static str]) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    var(lookup, names).ok_or(ConfigError::Missing(names[0]))
}

fn parsed<F, T>(lookup: &F, names: &[&'static str], default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match var(lookup, names) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            name: names[0],
            value,
        }),
    }
}

fn pacing<F>(lookup: &F, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: f64 = parsed(lookup, &[name], default.as_secs_f64())?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(ConfigError::Invalid {
            name,
            value: secs.to_string(),
        });
    }
    Ok(Duration::from_secs_f64(secs))
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub work_dir: PathBuf,
    pub source: String,
    pub base_url: String,
    pub scrape_max_pages: usize,
    pub user_agent: String,
    pub http_timeout: Duration,
    pub llm_pacing: Duration,
    /// Pause between detail-page fetches.
    pub scrape_pacing: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./pipeline"),
            source: DEFAULT_SOURCE.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            scrape_max_pages: 1,
            user_agent: "oppsync-bot/0.1".to_string(),
            http_timeout: Duration::from_secs(30),
            llm_pacing: Duration::ZERO,
            scrape_pacing: Duration::from_secs(1),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let scrape_max_pages: usize = parsed(
            &lookup,
            &["OPPSYNC_SCRAPE_MAX_PAGES"],
            defaults.scrape_max_pages,
        )?;
        if scrape_max_pages == 0 {
            return Err(ConfigError::Invalid {
                name: "OPPSYNC_SCRAPE_MAX_PAGES",
                value: "0".into(),
            });
        }
        let llm_pacing = pacing(&lookup, "OPPSYNC_LLM_PACING_SECS", defaults.llm_pacing)?;
        let scrape_pacing = pacing(&lookup, "OPPSYNC_SCRAPE_PACING_SECS", defaults.scrape_pacing)?;
        Ok(Self {
            work_dir: var(&lookup, &["OPPSYNC_WORK_DIR"])
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            source: var(&lookup, &["OPPSYNC_SOURCE"]).unwrap_or(defaults.source),
            base_url: var(&lookup, &["OPPSYNC_BASE_URL"]).unwrap_or(defaults.base_url),
            scrape_max_pages,
            user_agent: var(&lookup, &["OPPSYNC_USER_AGENT"]).unwrap_or(defaults.user_agent),
            http_timeout: Duration::from_secs(parsed(
                &lookup,
                &["OPPSYNC_HTTP_TIMEOUT_SECS"],
                30u64,
            )?),
            llm_pacing,
            scrape_pacing,
        })
    }

    pub fn markdown_dir(&self) -> PathBuf {
        self.work_dir.join("opportunities_markdown")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.work_dir.join("source_metadata.json")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.work_dir.join("opportunities_en.json")
    }
}

pub fn db_settings_from_env() -> Result<DbSettings, ConfigError> {
    db_settings_from_lookup(|k| std::env::var(k).ok())
}

/// `DATABASE_URL` wins; otherwise all five `DB_*` parts are required.
pub fn db_settings_from_lookup<F>(lookup: F) -> Result<DbSettings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = var(&lookup, &["DATABASE_URL"]) {
        return Ok(DbSettings::Url(url));
    }
    let host = required(&lookup, &["DB_HOST", "db_host"])?;
    let port_raw = required(&lookup, &["DB_PORT", "db_port"])?;
    let port = port_raw.parse::<u16>().map_err(|_| ConfigError::Invalid {
        name: "DB_PORT",
        value: port_raw.clone(),
    })?;
    Ok(DbSettings::Parts {
        host,
        port,
        database: required(&lookup, &["DB_NAME", "db_name"])?,
        user: required(&lookup, &["DB_USER", "db_user"])?,
        password: required(&lookup, &["DB_PASSWORD", "db_password"])?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmKeys {
    pub groq: Option<String>,
    pub cerebras: Option<String>,
}

impl LlmKeys {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let keys = Self {
            groq: var(&lookup, &["GROQ_API_KEY", "grok_api"]),
            cerebras: var(&lookup, &["CEREBRAS_API_KEY", "cerebras_api"]),
        };
        if keys.groq.is_none() && keys.cerebras.is_none() {
            return Err(ConfigError::NoLlmProvider);
        }
        Ok(keys)
    }
}

#[derive(Debug, Clone)]
pub struct EmbedSettings {
    pub jina_api_key: String,
    pub qdrant: QdrantConfig,
}

impl EmbedSettings {
    pub fn from_env(timeout: Duration) -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok(), timeout)
    }

    pub fn from_lookup<F>(lookup: F, timeout: Duration) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            jina_api_key: required(&lookup, &["JINA_API_KEY", "jina_api_key"])?,
            qdrant: QdrantConfig {
                endpoint: required(&lookup, &["QDRANT_ENDPOINT", "qdrant_endpoint"])?,
                api_key: var(&lookup, &["QDRANT_API_KEY", "qdrant_api_key"]),
                collection: var(&lookup, &["QDRANT_COLLECTION"])
                    .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
                timeout,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = PipelineConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.snapshot_path(), PathBuf::from("./pipeline/opportunities_en.json"));
        assert_eq!(
            cfg.markdown_dir(),
            PathBuf::from("./pipeline/opportunities_markdown")
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = PipelineConfig::from_lookup(env(&[
            ("OPPSYNC_WORK_DIR", "/data"),
            ("OPPSYNC_SCRAPE_MAX_PAGES", "3"),
            ("OPPSYNC_LLM_PACING_SECS", "1.5"),
            ("OPPSYNC_SCRAPE_PACING_SECS", "0"),
            ("OPPSYNC_HTTP_TIMEOUT_SECS", "10"),
        ]))
        .unwrap();
        assert_eq!(cfg.manifest_path(), PathBuf::from("/data/source_metadata.json"));
        assert_eq!(cfg.scrape_max_pages, 3);
        assert_eq!(cfg.llm_pacing, Duration::from_millis(1500));
        assert_eq!(cfg.scrape_pacing, Duration::ZERO);
        assert_eq!(cfg.http_timeout, Duration::from_secs(10));
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = PipelineConfig::from_lookup(env(&[("OPPSYNC_SCRAPE_MAX_PAGES", "many")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "OPPSYNC_SCRAPE_MAX_PAGES",
                value: "many".into()
            }
        );
        assert!(PipelineConfig::from_lookup(env(&[("OPPSYNC_SCRAPE_MAX_PAGES", "0")])).is_err());
        assert!(PipelineConfig::from_lookup(env(&[("OPPSYNC_SCRAPE_PACING_SECS", "-1")])).is_err());
    }

    #[test]
    fn database_url_takes_precedence_over_parts() {
        let settings = db_settings_from_lookup(env(&[
            ("DATABASE_URL", "postgres://u:p@db/opps"),
            ("DB_HOST", "ignored"),
        ]))
        .unwrap();
        assert_eq!(settings, DbSettings::Url("postgres://u:p@db/opps".into()));
    }

    #[test]
    fn lowercase_aliases_fill_database_parts() {
        let settings = db_settings_from_lookup(env(&[
            ("db_host", "localhost"),
            ("DB_PORT", "5432"),
            ("db_name", "opps"),
            ("db_user", "etl"),
            ("db_password", "secret"),
        ]))
        .unwrap();
        assert_eq!(
            settings,
            DbSettings::Parts {
                host: "localhost".into(),
                port: 5432,
                database: "opps".into(),
                user: "etl".into(),
                password: "secret".into(),
            }
        );
    }

    #[test]
    fn missing_database_part_is_named() {
        let err = db_settings_from_lookup(env(&[("DB_HOST", "localhost")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DB_PORT"));
    }

    #[test]
    fn one_llm_key_is_enough() {
        let keys = LlmKeys::from_lookup(env(&[("cerebras_api", "c-key")])).unwrap();
        assert_eq!(keys.groq, None);
        assert_eq!(keys.cerebras.as_deref(), Some("c-key"));
        assert_eq!(LlmKeys::from_lookup(env(&[])).unwrap_err(), ConfigError::NoLlmProvider);
    }

    #[test]
    fn embed_settings_require_jina_and_qdrant() {
        let timeout = Duration::from_secs(5);
        assert_eq!(
            EmbedSettings::from_lookup(env(&[("QDRANT_ENDPOINT", "http://q")]), timeout).unwrap_err(),
            ConfigError::Missing("JINA_API_KEY")
        );
        let settings = EmbedSettings::from_lookup(
            env(&[("jina_api_key", "j"), ("qdrant_endpoint", "http://q:6333")]),
            timeout,
        )
        .unwrap();
        assert_eq!(settings.qdrant.collection, DEFAULT_COLLECTION);
        assert_eq!(settings.qdrant.api_key, None);
    }
}
