use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use oppsync_core::{Stage, StageReport};
use serde::Serialize;
use tracing::{info, info_span, Instrument};

use crate::config::PipelineConfig;
use crate::embed::{self, EmbedContext};
use crate::extract::{self, ExtractContext};
use crate::scrape::{self, ScrapeContext};

#[async_trait]
pub trait StageSet: Send + Sync {
    async fn run_stage(&self, stage: Stage) -> Result<StageReport>;
}

/// Builds each stage's clients from the environment only when that stage runs, so
/// e.g. `scrape` works without database or API credentials.
pub struct EnvStageSet {
    config: PipelineConfig,
}

impl EnvStageSet {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StageSet for EnvStageSet {
    async fn run_stage(&self, stage: Stage) -> Result<StageReport> {
        match stage {
            Stage::Scrape => {
                let ctx = ScrapeContext::from_config(&self.config)?;
                scrape::run(&ctx).await
            }
            Stage::Extract => {
                let ctx = ExtractContext::from_env(&self.config).await?;
                extract::run(&ctx).await
            }
            Stage::Embed => {
                let ctx = EmbedContext::from_env(&self.config)?;
                embed::run(&ctx).await
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub reports: Vec<StageReport>,
    /// Set when the chain stopped early because this stage produced nothing.
    pub stopped_after: Option<Stage>,
    #[serde(with = "secs")]
    pub elapsed: Duration,
}

mod secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

pub struct Runner {
    stages: Box<dyn StageSet>,
}

impl Runner {
    pub fn new(stages: Box<dyn StageSet>) -> Self {
        Self { stages }
    }

    pub fn from_config(config: PipelineConfig) -> Self {
        Self::new(Box::new(EnvStageSet::new(config)))
    }

    /// Runs `requested` in order. A stage reporting no new data ends the chain when
    /// more stages follow it; a stage error aborts the run.
    pub async fn run(&self, requested: &[Stage]) -> Result<RunSummary> {
        let started = Instant::now();
        let names = requested.iter().map(Stage::as_str).collect::<Vec<_>>();
        info!(stages = %names.join(" -> "), "pipeline starting");

        let mut reports = Vec::with_capacity(requested.len());
        let mut stopped_after = None;

        for (idx, stage) in requested.iter().copied().enumerate() {
            let stage_started = Instant::now();
            let report = self
                .stages
                .run_stage(stage)
                .instrument(info_span!("stage", stage = %stage))
                .await
                .with_context(|| format!("stage {stage} failed"))?;
            info!(
                stage = %stage,
                elapsed_secs = stage_started.elapsed().as_secs_f64(),
                outcome = ?report.outcome,
                considered = report.considered,
                skipped = report.skipped,
                failed = report.failed,
                "stage finished"
            );

            let has_new_data = report.outcome.has_new_data();
            reports.push(report);
            if !has_new_data && idx + 1 < requested.len() {
                info!(stage = %stage, "no new data; skipping remaining stages");
                stopped_after = Some(stage);
                break;
            }
        }

        let elapsed = started.elapsed();
        info!(elapsed_secs = elapsed.as_secs_f64(), "pipeline complete");
        Ok(RunSummary {
            reports,
            stopped_after,
            elapsed,
        })
    }
}
