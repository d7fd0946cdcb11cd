//! Full-text extraction: fetch each article page and replace the feed summary
//! with the page's main text. Failures are per article; the summary stays.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::ingest::rss::USER_AGENT;
use crate::model::RawItem;
use crate::normalize::text::clean_text;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub enabled: bool,
    pub workers: usize,
    pub timeout_ms: u64,
    /// Page bytes read before the body is cut off.
    pub max_bytes: usize,
    /// Pages fetched per run; the rest keep their feed summary.
    pub max_articles: usize,
    /// Extracted text shorter than this is treated as a failed extraction.
    pub min_chars: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: 10,
            timeout_ms: 15_000,
            max_bytes: 512 * 1024,
            max_articles: 100,
            min_chars: 100,
        }
    }
}

#[async_trait::async_trait]
pub trait ArticleExtractor: Send + Sync {
    /// Main text of the page at `url`, already cleaned.
    async fn extract(&self, url: &str) -> Result<String, FetchError>;
}

fn re_article() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)<article[\s>].*?</article>").unwrap())
}

fn re_main() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)<main[\s>].*?</main>").unwrap())
}

fn re_body() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)<body[\s>].*?(?:</body>|$)").unwrap())
}

fn re_chrome() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    // No backreferences in `regex`, so one alternative per tag.
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)<nav[\s>].*?</nav>|<header[\s>].*?</header>|<footer[\s>].*?</footer>|<aside[\s>].*?</aside>|<form[\s>].*?</form>|<noscript[\s>].*?</noscript>",
        )
        .unwrap()
    })
}

/// Main text of an HTML page: the `<article>` elements when present, else
/// `<main>`, else the whole `<body>`, with navigation chrome removed.
pub fn main_text(html: &str) -> String {
    let articles: Vec<&str> = re_article().find_iter(html).map(|m| m.as_str()).collect();
    let region = if !articles.is_empty() {
        articles.join(" ")
    } else if let Some(m) = re_main().find(html) {
        m.as_str().to_string()
    } else if let Some(m) = re_body().find(html) {
        m.as_str().to_string()
    } else {
        html.to_string()
    };
    clean_text(&re_chrome().replace_all(&region, " "))
}

/// Fetches pages over HTTP, reading at most `max_bytes` of each.
pub struct HttpArticleExtractor {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpArticleExtractor {
    pub fn new(request_timeout: Duration, max_bytes: usize) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(4))
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            max_bytes: max_bytes.max(1),
        })
    }
}

#[async_trait::async_trait]
impl ArticleExtractor for HttpArticleExtractor {
    async fn extract(&self, url: &str) -> Result<String, FetchError> {
        let mut resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            let room = self.max_bytes.saturating_sub(buf.len());
            buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if buf.len() >= self.max_bytes {
                tracing::debug!(target: "normalize", url, bytes = buf.len(), "page truncated");
                break;
            }
        }
        Ok(main_text(&String::from_utf8_lossy(&buf)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnrichOutput {
    pub items: Vec<RawItem>,
    pub extracted: usize,
    pub failed: usize,
    /// Items left as they came: no link, or over the per-run page limit.
    pub skipped: usize,
}

/// Runs an [`ArticleExtractor`] over a run's items with bounded concurrency.
pub struct ArticleEnricher {
    extractor: Arc<dyn ArticleExtractor>,
    cfg: ExtractConfig,
}

impl ArticleEnricher {
    pub fn new(extractor: Arc<dyn ArticleExtractor>, cfg: ExtractConfig) -> Self {
        Self { extractor, cfg }
    }

    /// Item order is preserved. An item's body is replaced only when the page
    /// yields at least `min_chars` and more text than the feed summary did.
    pub async fn run(&self, mut items: Vec<RawItem>) -> EnrichOutput {
        let mut out = EnrichOutput::default();
        let mut targets: Vec<(usize, String)> = Vec::new();
        for (i, item) in items.iter().enumerate() {
            match item.link.as_deref().map(str::trim) {
                Some(link) if link.starts_with("http") && targets.len() < self.cfg.max_articles => {
                    targets.push((i, link.to_string()));
                }
                _ => out.skipped += 1,
            }
        }

        let timeout = Duration::from_millis(self.cfg.timeout_ms);
        let fetches: Vec<BoxFuture<'_, (usize, Result<String, FetchError>)>> = targets
            .into_iter()
            .map(|(i, url)| {
                async move {
                    let res = match tokio::time::timeout(timeout, self.extractor.extract(&url)).await {
                        Ok(r) => r,
                        Err(_) => Err(FetchError::Timeout(self.cfg.timeout_ms)),
                    };
                    if let Err(e) = &res {
                        tracing::debug!(target: "normalize", url = %url, error = %e, "extraction failed; keeping feed summary");
                    }
                    (i, res)
                }
                .boxed()
            })
            .collect();
        let results: Vec<(usize, Result<String, FetchError>)> =
            stream::iter(fetches).buffer_unordered(self.cfg.workers.max(1)).collect().await;

        for (i, res) in results {
            let item = &mut items[i];
            match res {
                Ok(text) if text.chars().count() >= self.cfg.min_chars && text.len() > clean_text(&item.body).len() => {
                    item.body = text;
                    out.extracted += 1;
                }
                _ => out.failed += 1,
            }
        }
        counter!("normalize_extract_failures_total").increment(out.failed as u64);
        tracing::info!(
            target: "normalize",
            extracted = out.extracted,
            failed = out.failed,
            skipped = out.skipped,
            "full-text extraction done"
        );
        out.items = items;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_element_wins_over_page_chrome() {
        let html = r#"<html><head><title>t</title><style>p{}</style></head><body>
<nav>Home | World | Markets</nav>
<article><h1>Oil jumps</h1><p>Brent rose 3% on &ldquo;supply&rdquo; fears.</p></article>
<footer>Copyright</footer></body></html>"#;
        assert_eq!(main_text(html), "Oil jumps Brent rose 3% on \"supply\" fears.");
    }

    #[test]
    fn body_is_used_without_article_or_main() {
        let html = "<body><header>Site</header><div class=\"post\">Plain page text.</div></body>";
        assert_eq!(main_text(html), "Plain page text.");
    }

    #[test]
    fn truncated_page_still_yields_text() {
        let html = "<html><body><main><p>Cut off mid-sentence and never clo";
        assert_eq!(main_text(html), "Cut off mid-sentence and never clo");
    }
}
