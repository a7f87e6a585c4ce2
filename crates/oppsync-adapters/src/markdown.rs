//! HTML cleanup and Markdown rendering for scraped postings.

use htmd::HtmlToMarkdown;
use oppsync_core::ListingEntry;
use scraper::{ElementRef, Html, Selector};

use crate::AdapterError;

const UNWANTED: &[&str] = &["script", "style", "noscript", "header", "footer", "nav", "iframe"];

/// Remove page chrome and cross-promotion blocks, then convert to Markdown.
///
/// Buttons wrapping a link are replaced by the link. A link into one of `exclude_domains`
/// drops its enclosing "Also Check" paragraph, or otherwise the element that holds it once
/// buttons are unwrapped.
pub fn html_to_markdown(html: &str, exclude_domains: &[String]) -> Result<String, AdapterError> {
    let cleaned = strip_chrome(html, exclude_domains)?;
    let converter = HtmlToMarkdown::builder()
        .skip_tags(vec!["img", "script", "style", "noscript"])
        .build();
    let markdown = converter.convert(&cleaned).unwrap_or_else(|_| {
        let fragment = Html::parse_fragment(&cleaned);
        fragment.root_element().text().collect::<String>()
    });
    Ok(markdown.trim().to_string())
}

fn strip_chrome(html: &str, exclude_domains: &[String]) -> Result<String, AdapterError> {
    let fragment = Html::parse_fragment(html);
    let mut replacements: Vec<(String, String)> = Vec::new();

    for css in UNWANTED {
        let sel = Selector::parse(css).map_err(|e| AdapterError::Message(e.to_string()))?;
        for el in fragment.select(&sel) {
            replacements.push((el.html(), String::new()));
        }
    }

    let button_sel = Selector::parse("button").map_err(|e| AdapterError::Message(e.to_string()))?;
    let link_sel = Selector::parse("a[href]").map_err(|e| AdapterError::Message(e.to_string()))?;
    for button in fragment.select(&button_sel) {
        if let Some(anchor) = button.select(&link_sel).next() {
            let unwrapped = if is_excluded(anchor, exclude_domains) {
                String::new()
            } else {
                anchor.html()
            };
            replacements.push((button.html(), unwrapped));
        }
    }

    if !exclude_domains.is_empty() {
        for anchor in fragment.select(&link_sel) {
            if !is_excluded(anchor, exclude_domains) {
                continue;
            }
            if let Some(block) = removable_block(anchor) {
                replacements.push((block.html(), String::new()));
            }
        }
    }

    // Outer blocks first so nested matches do not break the larger substitution.
    replacements.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
    replacements.dedup_by(|a, b| a.0 == b.0);

    let mut result = fragment.root_element().inner_html();
    for (from, to) in replacements {
        if !from.is_empty() {
            result = result.replace(&from, &to);
        }
    }
    Ok(result)
}

fn is_excluded(anchor: ElementRef<'_>, exclude_domains: &[String]) -> bool {
    let href = anchor.value().attr("href").unwrap_or_default();
    exclude_domains.iter().any(|d| href.contains(d.as_str()))
}

fn removable_block(anchor: ElementRef<'_>) -> Option<ElementRef<'_>> {
    let paragraph = anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "p");
    if let Some(p) = paragraph {
        if p.text().collect::<String>().contains("Also Check") {
            return Some(p);
        }
    }
    let mut parent = anchor.parent().and_then(ElementRef::wrap)?;
    // the button is swapped for its link, so the link ends up in the button's parent
    if parent.value().name() == "button" {
        parent = parent.parent().and_then(ElementRef::wrap)?;
    }
    match parent.value().name() {
        "body" | "html" => None,
        _ => Some(parent),
    }
}

/// The artifact body: a header block naming the posting, then the converted content.
pub fn render_document(entry: &ListingEntry, body: &str) -> String {
    format!(
        "# {title}\n\n**Date:** {date}\n\n**Source:** [{link}]({link})\n\n---\n\n{body}\n",
        title = entry.title,
        date = entry.date_text.as_deref().unwrap_or("unknown"),
        link = entry.link,
        body = body.trim(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn excluded() -> Vec<String> {
        vec!["https://opportunitiescorners".to_string()]
    }

    #[test]
    fn chrome_and_scripts_are_removed() {
        let html = r#"<nav><a href="/">Home</a></nav>
            <p>Keep this paragraph.</p>
            <script>track();</script>
            <footer>Copyright</footer>"#;
        let md = html_to_markdown(html, &[]).unwrap();
        assert!(md.contains("Keep this paragraph."));
        assert!(!md.contains("Home"));
        assert!(!md.contains("track()"));
        assert!(!md.contains("Copyright"));
    }

    #[test]
    fn cross_promotion_paragraphs_are_dropped() {
        let html = r#"<p>Real content.</p>
            <p>Also Check: <a href="https://opportunitiescorners.com/other/">Other Scholarship</a></p>
            <div><span>Related</span><a href="https://opportunitiescorners.com/x/">X</a></div>"#;
        let md = html_to_markdown(html, &excluded()).unwrap();
        assert!(md.contains("Real content."));
        assert!(!md.contains("Other Scholarship"));
        assert!(!md.contains("Related"));

        let html = r#"<p>Real content.</p>
            <div><button><a href="https://opportunitiescorners.com/other/">Other Scholarship</a></button></div>"#;
        let md = html_to_markdown(html, &excluded()).unwrap();
        assert!(md.contains("Real content."));
        assert!(!md.contains("Other Scholarship"));
        assert!(!md.contains("opportunitiescorners.com"));
    }

    #[test]
    fn top_level_button_to_excluded_domain_is_dropped() {
        let html = r#"<p>Real content.</p><button><a href="https://opportunitiescorners.com/y/">Y Grant</a></button>"#;
        let md = html_to_markdown(html, &excluded()).unwrap();
        assert!(md.contains("Real content."));
        assert!(!md.contains("Y Grant"));
    }

    #[test]
    fn external_links_and_button_links_survive() {
        let html = r#"<p>Apply at <a href="https://apply.example.org/form">the portal</a>.</p>
            <button><a href="https://apply.example.org/now">Apply Now</a></button>
            <img src="banner.png" alt="banner">"#;
        let md = html_to_markdown(html, &excluded()).unwrap();
        assert!(md.contains("https://apply.example.org/form"));
        assert!(md.contains("Apply Now"));
        assert!(!md.contains("banner.png"));
    }

    #[test]
    fn document_header_names_title_date_and_source() {
        let entry = ListingEntry {
            title: "Chevening Scholarship".into(),
            link: "https://example.org/chevening/".into(),
            date_text: Some("October 1, 2026".into()),
            published_at: None,
        };
        let doc = render_document(&entry, "Body text\n");
        assert!(doc.starts_with("# Chevening Scholarship\n\n**Date:** October 1, 2026\n\n"));
        assert!(doc.contains(
            "**Source:** [https://example.org/chevening/](https://example.org/chevening/)\n\n---\n\nBody text\n"
        ));
    }
}
