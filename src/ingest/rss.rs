//! RSS 2.0 / Atom feed parsing and the HTTP fetcher.

use std::time::Duration;

use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::error::FetchError;
use crate::ingest::types::FeedFetcher;
use crate::model::{RawItem, Source};

pub const USER_AGENT: &str = "signal-brief/0.1 (+https://github.com/signal-brief/signal-brief)";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    summary: Option<AtomText>,
    content: Option<AtomText>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

impl AtomEntry {
    fn alternate_link(&self) -> Option<String> {
        self.links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| self.links.first())
            .and_then(|l| l.href.clone())
    }
}

/// Parse a feed body into raw items for `source`.
///
/// Entries with neither a link nor a title are dropped. At most `max_items`
/// are kept, most recent first.
pub fn parse_feed(
    source: &Source,
    xml: &str,
    fetched_at: DateTime<Utc>,
    max_items: usize,
) -> Result<Vec<RawItem>, FetchError> {
    let xml_clean = scrub_html_entities_for_xml(xml);

    let entries: Vec<(Option<String>, Option<String>, String, Option<DateTime<Utc>>)> =
        if looks_like_atom(&xml_clean) {
            let feed: AtomFeed =
                from_str(&xml_clean).map_err(|e| FetchError::Parse(format!("atom: {e}")))?;
            feed.entry
                .into_iter()
                .map(|e| {
                    let link = e.alternate_link();
                    let body = e
                        .summary
                        .or(e.content)
                        .map(|t| t.value)
                        .unwrap_or_default();
                    let published = e
                        .published
                        .as_deref()
                        .or(e.updated.as_deref())
                        .and_then(parse_feed_date);
                    (e.title.map(|t| t.value), link, body, published)
                })
                .collect()
        } else {
            let rss: Rss =
                from_str(&xml_clean).map_err(|e| FetchError::Parse(format!("rss: {e}")))?;
            rss.channel
                .item
                .into_iter()
                .map(|it| {
                    let published = it.pub_date.as_deref().and_then(parse_feed_date);
                    (it.title, it.link, it.description.unwrap_or_default(), published)
                })
                .collect()
        };

    let mut out = Vec::with_capacity(entries.len());
    for (title, link, body, published_at) in entries {
        let title = title.map(|t| t.trim().to_string()).unwrap_or_default();
        let link = link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty());
        if title.is_empty() && link.is_none() {
            continue;
        }
        out.push(RawItem {
            id: RawItem::make_id(&source.id, link.as_deref(), &title),
            source_id: source.id.clone(),
            section: source.section.clone(),
            title,
            link,
            body,
            published_at,
            fetched_at,
        });
    }

    // Most recent first, undated last; id keeps the cut deterministic.
    out.sort_by(|a, b| {
        b.published_at
            .is_some()
            .cmp(&a.published_at.is_some())
            .then_with(|| b.published_at.cmp(&a.published_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    let mut seen = std::collections::HashSet::new();
    out.retain(|it| seen.insert(it.id.clone()));
    out.truncate(max_items);
    Ok(out)
}

fn looks_like_atom(xml: &str) -> bool {
    match (xml.find("<feed"), xml.find("<rss")) {
        (Some(_), None) => true,
        (Some(f), Some(r)) => f < r,
        _ => false,
    }
}

/// RFC 2822 (RSS) or RFC 3339 (Atom). Unparseable dates read as unknown.
pub fn parse_feed_date(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    if let Ok(dt) = OffsetDateTime::parse(ts, &Rfc2822) {
        return DateTime::from_timestamp(dt.unix_timestamp(), dt.nanosecond());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(ts) {
        return Some(dt.with_timezone(&Utc));
    }
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// HTML entities are not valid XML; feeds use them anyway.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

/// [`FeedFetcher`] over HTTP.
pub struct RssFetcher {
    client: reqwest::Client,
    max_items: usize,
}

impl RssFetcher {
    pub fn new(request_timeout: Duration, max_items: usize) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(4))
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            max_items: max_items.max(1),
        })
    }
}

#[async_trait::async_trait]
impl FeedFetcher for RssFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<RawItem>, FetchError> {
        let resp = self.client.get(&source.feed_url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        let items = parse_feed(source, &body, Utc::now(), self.max_items)?;
        tracing::debug!(target: "ingest", source = %source.id, items = items.len(), "feed parsed");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src() -> Source {
        Source::new("bbc", "BBC", "https://feeds.test/bbc.xml", "general_news_us")
    }

    #[test]
    fn rss_items_parse_with_dates_and_entities() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>t</title>
<item><title>Rates&nbsp;held</title><link>https://x.test/1</link>
<pubDate>Tue, 03 Mar 2026 10:00:00 GMT</pubDate><description>Body one</description></item>
<item><title>No date</title><link>https://x.test/2</link></item>
<item><description>orphan</description></item>
</channel></rss>"#;
        let items = parse_feed(&src(), xml, Utc::now(), 50).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Rates held");
        assert!(items[0].published_at.is_some());
        assert!(items[1].published_at.is_none());
        assert_eq!(items[0].section, "general_news_us");
    }

    #[test]
    fn atom_entries_use_alternate_link() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom"><title>f</title>
<entry><title type="html">Chip export rules</title>
<link rel="self" href="https://x.test/self"/><link rel="alternate" href="https://x.test/a"/>
<updated>2026-03-03T09:00:00Z</updated><summary>Summary text</summary></entry>
</feed>"#;
        let items = parse_feed(&src(), xml, Utc::now(), 50).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].link.as_deref(), Some("https://x.test/a"));
        assert_eq!(items[0].body, "Summary text");
    }

    #[test]
    fn cap_keeps_most_recent() {
        let xml = r#"<rss><channel>
<item><title>old</title><link>https://x.test/o</link><pubDate>Mon, 02 Mar 2026 10:00:00 GMT</pubDate></item>
<item><title>new</title><link>https://x.test/n</link><pubDate>Wed, 04 Mar 2026 10:00:00 GMT</pubDate></item>
</channel></rss>"#;
        let items = parse_feed(&src(), xml, Utc::now(), 1).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "new");
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_feed(&src(), "<html>nope", Utc::now(), 50).unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }
}
