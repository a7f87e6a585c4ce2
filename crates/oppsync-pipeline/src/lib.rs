//! Scrape → extract → embed stages and the runner that chains them.

pub mod config;
pub mod countries;
pub mod embed;
pub mod extract;
pub mod prompts;
pub mod runner;
pub mod scrape;

pub use config::{ConfigError, PipelineConfig};
pub use countries::CountryNormalizer;
pub use embed::EmbedContext;
pub use extract::ExtractContext;
pub use runner::{EnvStageSet, RunSummary, Runner, StageSet};
pub use scrape::ScrapeContext;

pub const CRATE_NAME: &str = "oppsync-pipeline";
