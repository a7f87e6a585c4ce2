//! Listing pages → one Markdown artifact per posting not yet in the manifest.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use oppsync_adapters::{adapter_for_source, artifact_file_name, AdapterError, SourceAdapter};
use oppsync_core::{Stage, StageReport};
use oppsync_storage::{
    FetchError, HttpClientConfig, HttpFetcher, ManifestEntry, MarkdownStore, SourceManifest,
};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;

pub struct ScrapeContext {
    pub adapter: Box<dyn SourceAdapter>,
    pub http: HttpFetcher,
    pub markdown: MarkdownStore,
    pub manifest_path: PathBuf,
    pub max_pages: usize,
    /// Pause between detail-page fetches.
    pub pacing: Duration,
}

impl ScrapeContext {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let adapter = adapter_for_source(&config.source, &config.base_url)
            .with_context(|| format!("no adapter registered for {}", config.source))?;
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: config.http_timeout,
            user_agent: Some(config.user_agent.clone()),
        })?;
        Ok(Self {
            adapter,
            http,
            markdown: MarkdownStore::new(config.markdown_dir()),
            manifest_path: config.manifest_path(),
            max_pages: config.scrape_max_pages,
            pacing: config.scrape_pacing,
        })
    }
}

pub async fn run(ctx: &ScrapeContext) -> Result<StageReport> {
    let mut report = StageReport::new(Stage::Scrape);
    let mut manifest = SourceManifest::load(&ctx.manifest_path).await?;
    let mut seen_this_run = HashSet::new();
    let mut written = 0usize;
    let mut detail_fetched = false;

    info!(
        source = ctx.adapter.source_id(),
        known_urls = manifest.len(),
        max_pages = ctx.max_pages,
        "scrape starting"
    );

    for page in 1..=ctx.max_pages {
        let entries = match ctx.adapter.fetch_listing(&ctx.http, page).await {
            Ok(entries) => entries,
            // paging past the last listing page is answered with a 404
            Err(AdapterError::Fetch(FetchError::HttpStatus { status: 404, .. })) if page > 1 => {
                debug!(page, "listing page not found; stopping");
                break;
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("fetching listing page {}", ctx.adapter.listing_url(page)));
            }
        };
        if entries.is_empty() {
            debug!(page, "listing page empty; stopping");
            break;
        }
        report.considered += entries.len();

        let mut unseen_on_page = 0usize;
        for entry in entries {
            if manifest.contains(&entry.link) || !seen_this_run.insert(entry.link.clone()) {
                report.skipped += 1;
                continue;
            }
            unseen_on_page += 1;

            if detail_fetched && !ctx.pacing.is_zero() {
                tokio::time::sleep(ctx.pacing).await;
            }
            detail_fetched = true;
            let Some(document) = ctx
                .adapter
                .fetch_detail(&ctx.http, &entry)
                .await
                .with_context(|| format!("fetching {}", entry.link))?
            else {
                warn!(url = %entry.link, "no article content found; will retry next run");
                report.skipped += 1;
                continue;
            };

            let file_name = artifact_file_name(&entry.title, &entry.link);
            let stored = ctx.markdown.write(&file_name, &document).await?;
            manifest.insert(ManifestEntry {
                source_url: entry.link.clone(),
                source: ctx.adapter.source_id().to_string(),
                title: entry.title.clone(),
                file_name: stored.file_name.clone(),
                content_hash: stored.content_hash.clone(),
                published_at: entry.published_at,
                scraped_at: Utc::now(),
            });
            manifest.save().await?;
            written += 1;
            info!(file = %stored.file_name, bytes = stored.byte_size, "saved posting");
        }

        if unseen_on_page == 0 {
            debug!(page, "no unseen postings on page; stopping");
            break;
        }
    }

    info!(
        candidates = report.considered,
        already_seen_or_skipped = report.skipped,
        written,
        "scrape complete"
    );
    Ok(report.finish(written))
}
