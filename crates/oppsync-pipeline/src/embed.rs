//! Run snapshot → embeddings → vector-store upserts keyed by record id.

use anyhow::{Context, Result};
use oppsync_ai::{Embedder, JinaEmbedder};
use oppsync_core::{ExtractedOpportunity, Stage, StageReport, VectorPayload, VectorPoint};
use oppsync_storage::{QdrantStore, SnapshotFile, VectorStore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{EmbedSettings, PipelineConfig};
use crate::countries::CountryNormalizer;

pub const EMBED_BATCH_SIZE: usize = 100;
pub const UPSERT_BATCH_SIZE: usize = 10;

pub struct EmbedContext {
    pub snapshot: SnapshotFile,
    pub embedder: Box<dyn Embedder>,
    pub vectors: Box<dyn VectorStore>,
    pub countries: CountryNormalizer,
    pub embed_batch_size: usize,
    pub upsert_batch_size: usize,
}

impl EmbedContext {
    pub fn from_env(config: &PipelineConfig) -> Result<Self> {
        let settings = EmbedSettings::from_env(config.http_timeout)?;
        let embedder = JinaEmbedder::new(settings.jina_api_key, config.http_timeout)?;
        let vectors = QdrantStore::new(settings.qdrant)?;
        Ok(Self {
            snapshot: SnapshotFile::new(config.snapshot_path()),
            embedder: Box::new(embedder),
            vectors: Box::new(vectors),
            countries: CountryNormalizer::builtin()?,
            embed_batch_size: EMBED_BATCH_SIZE,
            upsert_batch_size: UPSERT_BATCH_SIZE,
        })
    }
}

pub async fn run(ctx: &EmbedContext) -> Result<StageReport> {
    let mut report = StageReport::new(Stage::Embed);

    let records = match ctx.snapshot.load().await? {
        Some(records) if !records.is_empty() => records,
        _ => {
            info!(path = %ctx.snapshot.path().display(), "no snapshot records to embed");
            return Ok(report.finish(0));
        }
    };
    report.considered = records.len();
    info!(records = records.len(), "embed starting");

    let mut prepared: Vec<(Uuid, ExtractedOpportunity, String)> = Vec::with_capacity(records.len());
    for mut record in records {
        let Some(id) = record.id() else {
            warn!(title = record.title().unwrap_or_default(), "snapshot record has no id; skipping");
            report.skipped += 1;
            continue;
        };
        ctx.countries.apply(&mut record);
        let text = record.embedding_text();
        prepared.push((id, record, text));
    }

    let mut points: Vec<VectorPoint> = Vec::with_capacity(prepared.len());
    for batch in prepared.chunks(ctx.embed_batch_size.max(1)) {
        let vectors = embed_batch(ctx, batch, &mut report).await;
        for ((id, record, _), vector) in batch.iter().zip(vectors) {
            if let Some(vector) = vector {
                points.push(VectorPoint {
                    id: *id,
                    vector,
                    payload: VectorPayload::from_record(*id, record),
                });
            }
        }
    }
    info!(embedded = points.len(), failed = report.failed, "embeddings generated");

    for chunk in points.chunks(ctx.upsert_batch_size.max(1)) {
        ctx.vectors
            .upsert(chunk)
            .await
            .context("upserting vectors")?;
        debug!(points = chunk.len(), "upserted batch");
    }

    info!(upserted = points.len(), "embed complete");
    Ok(report.finish(points.len()))
}

/// One slot per batch entry; a failed batch is retried record by record so only the
/// records that fail on their own are lost.
async fn embed_batch(
    ctx: &EmbedContext,
    batch: &[(Uuid, ExtractedOpportunity, String)],
    report: &mut StageReport,
) -> Vec<Option<Vec<f32>>> {
    let texts = batch.iter().map(|(_, _, text)| text.clone()).collect::<Vec<_>>();
    match ctx.embedder.embed(&texts).await {
        Ok(vectors) if vectors.len() == texts.len() => return vectors.into_iter().map(Some).collect(),
        Ok(vectors) => warn!(
            expected = texts.len(),
            got = vectors.len(),
            "embedding batch size mismatch; embedding individually"
        ),
        Err(err) => warn!(size = texts.len(), error = %err, "embedding batch failed; embedding individually"),
    }

    let mut out = Vec::with_capacity(batch.len());
    for (id, _, text) in batch {
        match ctx.embedder.embed(std::slice::from_ref(text)).await {
            Ok(mut vectors) if vectors.len() == 1 => out.push(vectors.pop()),
            Ok(_) => {
                warn!(id = %id, "embedding response was empty; skipping record");
                report.failed += 1;
                out.push(None);
            }
            Err(err) => {
                warn!(id = %id, error = %err, "embedding failed; skipping record");
                report.failed += 1;
                out.push(None);
            }
        }
    }
    out
}
