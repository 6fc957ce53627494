// Web search and page scraping collaborators, plus the helpers that turn
// their output into conversation content.

use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use std::time::Duration;

use canvas_common::types::{Message, MessageContent};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("provider timed out")]
    Timeout,
    #[error("provider request failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    pub content: String,
}

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

pub trait SearchProvider: Send + Sync {
    fn search<'a>(&'a self, query: &'a str) -> ProviderFuture<'a, Vec<SearchResult>>;
}

pub trait ScrapeProvider: Send + Sync {
    /// Fetch the readable text of one page.
    fn scrape<'a>(&'a self, url: &'a Url) -> ProviderFuture<'a, String>;
}

/// Run a search under a deadline.
pub async fn search_with_timeout(
    provider: &dyn SearchProvider,
    query: &str,
    limit: Duration,
) -> Result<Vec<SearchResult>, ProviderError> {
    tokio::time::timeout(limit, provider.search(query))
        .await
        .unwrap_or(Err(ProviderError::Timeout))
}

/// Render results as the body of a hidden assistant message. Output depends
/// only on the input order and contents.
pub fn format_results(results: &[SearchResult]) -> String {
    let mut out = String::from("Here is some relevant context from the web:\n\n<search-results>\n");
    for (i, result) in results.iter().enumerate() {
        out.push_str(&format!("<result index=\"{}\" url=\"{}\"", i + 1, result.url));
        if let Some(title) = &result.title {
            out.push_str(&format!(" title=\"{title}\""));
        }
        if let Some(date) = &result.published_date {
            out.push_str(&format!(" published=\"{date}\""));
        }
        out.push_str(">\n");
        out.push_str(result.content.trim());
        out.push_str("\n</result>\n");
    }
    out.push_str("</search-results>");
    out
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"https?://[^\s<>"'`)\]]+"#).expect("url pattern should compile")
    })
}

/// All distinct, parseable http(s) URLs in `text`, in first-seen order.
pub fn extract_urls(text: &str) -> Vec<Url> {
    let mut urls: Vec<Url> = Vec::new();
    for found in url_pattern().find_iter(text) {
        let raw = found.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
        match Url::parse(raw) {
            Ok(url) if !urls.contains(&url) => urls.push(url),
            Ok(_) => {}
            Err(error) => debug!(url = raw, error = %error, "skipping unparseable url"),
        }
    }
    urls
}

/// Inline scraped page text into `message` for every URL it mentions.
/// Returns the number of pages inlined. Scrape failures are skipped.
pub async fn enrich_message(
    message: &mut Message,
    scraper: &dyn ScrapeProvider,
    limit: Duration,
) -> usize {
    let text = message.text();
    let urls = extract_urls(&text);
    if urls.is_empty() {
        return 0;
    }

    let mut enriched = text;
    let mut inlined = 0;
    for url in &urls {
        match tokio::time::timeout(limit, scraper.scrape(url)).await {
            Ok(Ok(page)) => {
                enriched.push_str(&format!(
                    "\n\n<page-contents url=\"{url}\">\n{}\n</page-contents>",
                    page.trim()
                ));
                inlined += 1;
            }
            Ok(Err(error)) => warn!(url = %url, error = %error, "failed to scrape url"),
            Err(_) => warn!(url = %url, "scraping url timed out"),
        }
    }
    if inlined > 0 {
        message.content = MessageContent::Text(enriched);
    }
    inlined
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeScraper {
        pages: HashMap<String, Result<String, ProviderError>>,
    }

    impl ScrapeProvider for FakeScraper {
        fn scrape<'a>(&'a self, url: &'a Url) -> ProviderFuture<'a, String> {
            let result = self
                .pages
                .get(url.as_str())
                .cloned()
                .unwrap_or_else(|| Err(ProviderError::Failed("unknown".into())));
            Box::pin(async move { result })
        }
    }

    #[test]
    fn urls_are_extracted_in_order_without_duplicates() {
        let urls = extract_urls(
            "see https://example.com/a, then (http://b.org/x) and https://example.com/a again.",
        );
        let urls: Vec<&str> = urls.iter().map(Url::as_str).collect();
        assert_eq!(urls, vec!["https://example.com/a", "http://b.org/x"]);
        assert!(extract_urls("no links here").is_empty());
    }

    #[test]
    fn results_format_deterministically() {
        let results = vec![
            SearchResult {
                url: "https://a.dev".into(),
                title: Some("A".into()),
                published_date: Some("2024-01-02".into()),
                content: " alpha \n".into(),
            },
            SearchResult {
                url: "https://b.dev".into(),
                title: None,
                published_date: None,
                content: "beta".into(),
            },
        ];
        let formatted = format_results(&results);
        assert_eq!(formatted, format_results(&results));
        assert!(formatted.contains(
            "<result index=\"1\" url=\"https://a.dev\" title=\"A\" published=\"2024-01-02\">\nalpha\n</result>"
        ));
        assert!(formatted.contains("<result index=\"2\" url=\"https://b.dev\">\nbeta\n</result>"));
    }

    #[tokio::test]
    async fn enrichment_inlines_pages_and_skips_failures() {
        let scraper = FakeScraper {
            pages: HashMap::from([
                ("https://ok.dev/".to_owned(), Ok("page body".to_owned())),
                ("https://down.dev/".to_owned(), Err(ProviderError::Failed("503".into()))),
            ]),
        };
        let mut message = Message::user("compare https://ok.dev/ with https://down.dev/");
        let inlined = enrich_message(&mut message, &scraper, Duration::from_secs(1)).await;
        assert_eq!(inlined, 1);
        let text = message.text();
        assert!(text.starts_with("compare https://ok.dev/"));
        assert!(text.contains("<page-contents url=\"https://ok.dev/\">\npage body\n</page-contents>"));
        assert!(!text.contains("down.dev/\">"));
    }
}
