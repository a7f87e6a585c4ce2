//! Source adapter contract and the listing-site adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oppsync_core::ListingEntry;
use oppsync_storage::{sha256_hex, FetchError, HttpFetcher};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::warn;
use url::Url;

pub mod markdown;

pub use markdown::{html_to_markdown, render_document};

pub const CRATE_NAME: &str = "oppsync-adapters";

pub const OPPORTUNITIES_CORNERS: &str = "opportunitiescorners";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// URL of listing page `page` (1-based).
    fn listing_url(&self, page: usize) -> String;

    fn parse_listing(&self, html: &str) -> Result<Vec<ListingEntry>, AdapterError>;

    /// Full Markdown document for one posting, or `None` when the page has no
    /// recognisable content.
    fn parse_detail(&self, entry: &ListingEntry, html: &str) -> Result<Option<String>, AdapterError>;

    async fn fetch_listing(
        &self,
        http: &HttpFetcher,
        page: usize,
    ) -> Result<Vec<ListingEntry>, AdapterError> {
        let resp = http.fetch_bytes(&self.listing_url(page)).await?;
        self.parse_listing(&resp.text())
    }

    async fn fetch_detail(
        &self,
        http: &HttpFetcher,
        entry: &ListingEntry,
    ) -> Result<Option<String>, AdapterError> {
        let resp = http.fetch_bytes(&entry.link).await?;
        self.parse_detail(entry, &resp.text())
    }
}

#[derive(Debug, Clone)]
pub struct OpportunitiesCornersAdapter {
    base_url: String,
    exclude_domains: Vec<String>,
}

impl OpportunitiesCornersAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            base_url,
            exclude_domains: vec!["https://opportunitiescorners".to_string()],
        }
    }

    pub fn with_exclude_domains(mut self, domains: Vec<String>) -> Self {
        self.exclude_domains = domains;
        self
    }

    fn resolve(&self, href: &str) -> Option<String> {
        let base = Url::parse(&self.base_url).ok()?;
        base.join(href.trim()).ok().map(|u| u.to_string())
    }
}

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Message(e.to_string()))
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn first_within<'a>(el: ElementRef<'a>, sel: &Selector) -> Option<ElementRef<'a>> {
    el.select(sel).next()
}

#[async_trait]
impl SourceAdapter for OpportunitiesCornersAdapter {
    fn source_id(&self) -> &'static str {
        OPPORTUNITIES_CORNERS
    }

    fn listing_url(&self, page: usize) -> String {
        if page <= 1 {
            self.base_url.clone()
        } else {
            format!("{}page/{}/", self.base_url, page)
        }
    }

    fn parse_listing(&self, html: &str) -> Result<Vec<ListingEntry>, AdapterError> {
        let document = Html::parse_document(html);
        let section_sel = selector("div#tdi_13")?;
        let card_sel = selector("div.td_module_6")?;
        let title_sel = selector("h3.entry-title a")?;
        let time_sel = selector("time.td-module-date")?;

        let cards: Vec<ElementRef<'_>> = match document.select(&section_sel).next() {
            Some(section) => section.select(&card_sel).collect(),
            None => {
                warn!("latest opportunities section not found; scanning whole page");
                document.select(&card_sel).collect()
            }
        };

        let mut entries = Vec::with_capacity(cards.len());
        for card in cards {
            let Some(anchor) = first_within(card, &title_sel) else {
                continue;
            };
            let title = text_or_none(anchor.text().collect::<String>());
            let link = anchor.value().attr("href").and_then(|h| self.resolve(h));
            let (Some(title), Some(link)) = (title, link) else {
                warn!("listing card without title or link skipped");
                continue;
            };
            let time = first_within(card, &time_sel);
            let date_text = time.and_then(|t| text_or_none(t.text().collect::<String>()));
            let published_at = time
                .and_then(|t| t.value().attr("datetime"))
                .and_then(|v| DateTime::parse_from_rfc3339(v.trim()).ok())
                .map(|d| d.with_timezone(&Utc));
            entries.push(ListingEntry {
                title,
                link,
                date_text,
                published_at,
            });
        }
        Ok(entries)
    }

    fn parse_detail(&self, entry: &ListingEntry, html: &str) -> Result<Option<String>, AdapterError> {
        let document = Html::parse_document(html);
        let article_sel = selector("div.td-main-content article")?;
        let post_sel = selector("div.td-post-content")?;

        let content_html = document
            .select(&article_sel)
            .next()
            .or_else(|| document.select(&post_sel).next())
            .map(|el| el.inner_html());
        let Some(content_html) = content_html else {
            return Ok(None);
        };

        let body = html_to_markdown(&content_html, &self.exclude_domains)?;
        Ok(Some(render_document(entry, &body)))
    }
}

pub fn adapter_for_source(source_id: &str, base_url: &str) -> Option<Box<dyn SourceAdapter>> {
    match source_id {
        OPPORTUNITIES_CORNERS => Some(Box::new(OpportunitiesCornersAdapter::new(base_url))),
        _ => None,
    }
}

/// Title with filesystem-hostile characters removed, at most 100 characters.
pub fn sanitize_filename(title: &str) -> String {
    let cleaned = title
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect::<String>();
    let truncated = cleaned.trim().chars().take(100).collect::<String>();
    let truncated = truncated.trim().to_string();
    if truncated.is_empty() {
        "opportunity".to_string()
    } else {
        truncated
    }
}

/// Artifact file name for a posting; the URL hash suffix keeps same-titled postings apart.
pub fn artifact_file_name(title: &str, source_url: &str) -> String {
    let hash = sha256_hex(source_url.as_bytes());
    format!("{}-{}.md", sanitize_filename(title), &hash[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_pages_follow_wordpress_pagination() {
        let adapter = OpportunitiesCornersAdapter::new("https://example.org");
        assert_eq!(adapter.listing_url(1), "https://example.org/");
        assert_eq!(adapter.listing_url(3), "https://example.org/page/3/");
    }

    #[test]
    fn filenames_drop_reserved_characters() {
        assert_eq!(
            sanitize_filename("  Fulbright: \"USA\" 2026/27? "),
            "Fulbright USA 202627"
        );
        assert_eq!(sanitize_filename("???"), "opportunity");
        assert_eq!(sanitize_filename(&"x".repeat(150)).len(), 100);
    }

    #[test]
    fn artifact_names_differ_for_same_title() {
        let a = artifact_file_name("Same", "https://example.org/a");
        let b = artifact_file_name("Same", "https://example.org/b");
        assert_ne!(a, b);
        assert!(a.starts_with("Same-") && a.ends_with(".md"));
        assert_eq!(a, artifact_file_name("Same", "https://example.org/a"));
    }

    #[test]
    fn relative_links_resolve_against_base() {
        let adapter = OpportunitiesCornersAdapter::new("https://example.org/");
        let html = r#"<div id="tdi_13"><div class="td_module_6">
            <h3 class="entry-title"><a href="/erasmus-2026/">Erasmus 2026</a></h3>
        </div></div>"#;
        let entries = adapter.parse_listing(html).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].link, "https://example.org/erasmus-2026/");
        assert_eq!(entries[0].date_text, None);
        assert_eq!(entries[0].published_at, None);
    }

    #[test]
    fn unknown_sources_have_no_adapter() {
        assert!(adapter_for_source("opportunitiescorners", "https://example.org/").is_some());
        assert!(adapter_for_source("elsewhere", "https://example.org/").is_none());
    }
}
