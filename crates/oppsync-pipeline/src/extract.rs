//! Markdown artifacts newer than the cursor → bilingual rows plus the run snapshot.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use oppsync_ai::{
    parse_json_response, AiError, ChatModel, CompletionOptions, OpenAiCompatClient, ProviderPool,
};
use oppsync_core::{record_id, ExtractedOpportunity, OpportunityRow, Stage, StageReport, DEFAULT_SOURCE};
use oppsync_storage::{
    MarkdownArtifact, MarkdownStore, OpportunityStore, PgOpportunityStore, SnapshotFile, SourceManifest,
};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use crate::config::{db_settings_from_env, LlmKeys, PipelineConfig, CEREBRAS_MODEL, GROQ_MODEL};
use crate::countries::CountryNormalizer;
use crate::prompts::{arabic_translation_messages, extraction_messages};

pub struct ExtractContext {
    pub markdown: MarkdownStore,
    pub manifest_path: PathBuf,
    pub snapshot: SnapshotFile,
    pub store: Box<dyn OpportunityStore>,
    pub chat: Box<dyn ChatModel>,
    pub countries: CountryNormalizer,
    pub options: CompletionOptions,
    pub pacing: Duration,
}

impl ExtractContext {
    /// Connects to Postgres and builds the provider pool from the environment.
    pub async fn from_env(config: &PipelineConfig) -> Result<Self> {
        let keys = LlmKeys::from_env()?;
        let mut providers: Vec<Box<dyn ChatModel>> = Vec::new();
        if let Some(key) = &keys.groq {
            providers.push(Box::new(OpenAiCompatClient::groq(key, GROQ_MODEL, config.http_timeout)?));
        } else {
            warn!("GROQ_API_KEY not set; skipping Groq provider");
        }
        if let Some(key) = &keys.cerebras {
            providers.push(Box::new(OpenAiCompatClient::cerebras(
                key,
                CEREBRAS_MODEL,
                config.http_timeout,
            )?));
        } else {
            warn!("CEREBRAS_API_KEY not set; skipping Cerebras provider");
        }
        let chat = ProviderPool::new(providers)?;

        let db = db_settings_from_env()?;
        let store = PgOpportunityStore::connect(&db)
            .await
            .context("connecting to postgres")?;

        Ok(Self {
            markdown: MarkdownStore::new(config.markdown_dir()),
            manifest_path: config.manifest_path(),
            snapshot: SnapshotFile::new(config.snapshot_path()),
            store: Box::new(store),
            chat: Box::new(chat),
            countries: CountryNormalizer::builtin()?,
            options: CompletionOptions::default(),
            pacing: config.llm_pacing,
        })
    }
}

/// An artifact selected for extraction, with what the manifest knows about it.
#[derive(Debug, Clone)]
struct PendingArtifact {
    artifact: MarkdownArtifact,
    source: String,
    source_url: String,
    /// Stable key for record ids; the source URL, or the file name when unknown.
    id_key: String,
}

pub async fn run(ctx: &ExtractContext) -> Result<StageReport> {
    let mut report = StageReport::new(Stage::Extract);

    let cursor = ctx
        .store
        .max_created_at()
        .await
        .context("reading extraction cursor")?;
    let manifest = SourceManifest::load(&ctx.manifest_path).await?;
    let artifacts = ctx.markdown.list().await?;
    report.considered = artifacts.len();

    let pending = select_new(&manifest, artifacts, cursor);
    report.skipped = report.considered - pending.len();
    info!(
        cursor = ?cursor,
        artifacts = report.considered,
        new = pending.len(),
        "extract starting"
    );

    if pending.is_empty() {
        if ctx.snapshot.clear().await? {
            info!(path = %ctx.snapshot.path().display(), "removed stale snapshot");
        }
        info!("no new artifacts since last extraction");
        return Ok(report.finish(0));
    }

    let created_at = cursor.map_or_else(Utc::now, |c| c.max(Utc::now()));
    let mut saved: Vec<ExtractedOpportunity> = Vec::new();
    let total = pending.len();

    for (idx, item) in pending.iter().enumerate() {
        info!(n = idx + 1, total, file = %item.artifact.file_name, "processing artifact");
        let markdown = ctx.markdown.read(&item.artifact).await?;

        let extracted = match extract_records(ctx, &markdown).await {
            Ok(records) => records,
            Err(err) => {
                error!(file = %item.artifact.file_name, error = %err, "extraction failed; skipping");
                report.failed += 1;
                pace(ctx).await;
                continue;
            }
        };
        pace(ctx).await;

        for (ordinal, mut record) in extracted.into_iter().enumerate() {
            if let Err(reason) = validate(&record) {
                warn!(file = %item.artifact.file_name, ordinal, reason, "dropping extracted record");
                report.failed += 1;
                continue;
            }
            let id = record_id(&item.id_key, ordinal);
            record.set("id", JsonValue::String(id.to_string()));
            ctx.countries.apply(&mut record);

            let arabic = match translate_to_arabic(ctx, &record).await {
                Ok(ar) => Some(ar),
                Err(err) => {
                    warn!(id = %id, error = %err, "arabic translation failed; storing without data_ar");
                    None
                }
            };
            pace(ctx).await;

            let row = OpportunityRow::new(
                id,
                &item.source,
                &item.source_url,
                &markdown,
                &record,
                arabic.as_ref(),
                created_at,
            );
            if let Err(err) = ctx.store.upsert(&row).await {
                write_snapshot(ctx, &saved).await?;
                return Err(err).with_context(|| format!("saving opportunity {id}"));
            }
            debug!(id = %id, title = record.title().unwrap_or_default(), "saved opportunity");
            saved.push(record);
        }
    }

    write_snapshot(ctx, &saved).await?;
    info!(
        saved = saved.len(),
        failed = report.failed,
        snapshot = %ctx.snapshot.path().display(),
        "extract complete"
    );
    Ok(report.finish(saved.len()))
}

/// Artifacts whose date is strictly after the cursor. The date is the manifest's
/// `scraped_at`, or the file modification time for files the manifest does not know.
fn select_new(
    manifest: &SourceManifest,
    artifacts: Vec<MarkdownArtifact>,
    cursor: Option<DateTime<Utc>>,
) -> Vec<PendingArtifact> {
    artifacts
        .into_iter()
        .filter_map(|artifact| {
            let entry = manifest.entry_for_file(&artifact.file_name);
            let dated = entry.map_or(artifact.modified_at, |e| e.scraped_at);
            if cursor.is_some_and(|c| dated <= c) {
                return None;
            }
            let (source, source_url) = match entry {
                Some(e) => (e.source.clone(), e.source_url.clone()),
                None => (DEFAULT_SOURCE.to_string(), String::new()),
            };
            let id_key = if source_url.is_empty() {
                artifact.file_name.clone()
            } else {
                source_url.clone()
            };
            Some(PendingArtifact {
                artifact,
                source,
                source_url,
                id_key,
            })
        })
        .collect()
}

async fn extract_records(ctx: &ExtractContext, markdown: &str) -> Result<Vec<ExtractedOpportunity>, AiError> {
    let reply = ctx
        .chat
        .complete(&extraction_messages(markdown), &ctx.options)
        .await?;
    records_from_value(parse_json_response(&reply)?)
}

fn records_from_value(value: JsonValue) -> Result<Vec<ExtractedOpportunity>, AiError> {
    let items = match value {
        JsonValue::Array(items) => items,
        other => vec![other],
    };
    items
        .into_iter()
        .map(|item| {
            ExtractedOpportunity::from_value(item)
                .ok_or_else(|| AiError::Parse("expected a JSON object per opportunity".into()))
        })
        .collect()
}

fn validate(record: &ExtractedOpportunity) -> Result<(), &'static str> {
    if record.title().is_none() {
        return Err("missing title");
    }
    if record.application_link().is_none() {
        return Err("missing application_link");
    }
    Ok(())
}

async fn translate_to_arabic(
    ctx: &ExtractContext,
    record: &ExtractedOpportunity,
) -> Result<ExtractedOpportunity, AiError> {
    let mut payload = record.clone();
    let id = payload.remove("id");
    let body = serde_json::to_string_pretty(&payload).map_err(|e| AiError::Parse(e.to_string()))?;

    let reply = ctx
        .chat
        .complete(&arabic_translation_messages(&body), &ctx.options)
        .await?;
    let mut translated = ExtractedOpportunity::from_value(parse_json_response(&reply)?)
        .ok_or_else(|| AiError::Parse("translation is not a JSON object".into()))?;
    if let Some(id) = id {
        translated.set("id", id);
    }
    Ok(translated)
}

async fn write_snapshot(ctx: &ExtractContext, saved: &[ExtractedOpportunity]) -> Result<()> {
    if saved.is_empty() {
        ctx.snapshot.clear().await?;
        return Ok(());
    }
    ctx.snapshot
        .write(saved)
        .await
        .with_context(|| format!("writing snapshot {}", ctx.snapshot.path().display()))
}

async fn pace(ctx: &ExtractContext) {
    if !ctx.pacing.is_zero() {
        tokio::time::sleep(ctx.pacing).await;
    }
}
