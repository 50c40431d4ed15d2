//! RSS/Atom adapter.
//!
//! Cursor key: `rss:<feed name>`, value: time of the last completed poll. The
//! cursor never bounds requests; its absence only enables the first-run
//! lookback filter, which keeps a new feed's backlog out of the chat.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use feed_rs::model::Entry;
use reqwest::Client;
use tracing::{debug, info, instrument, warn};

use super::{oldest_first, BatchHandler, PollContext, SourceAdapter};
use crate::config::{RssCfg, RssFeed};
use crate::hash;
use crate::model::{Item, SourceKind};

const UNTITLED: &str = "Untitled";

pub struct RssAdapter {
    cfg: RssCfg,
    http: Client,
}

/// Fields of a feed entry the filters and the sink care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub url: String,
    pub title: String,
    pub summary: String,
    pub published_at: Option<DateTime<Utc>>,
}

impl FeedEntry {
    /// Link, else an http(s) entry id, else a fallback derived from the title.
    pub fn from_entry(feed_url: &str, entry: Entry) -> Self {
        let title = entry
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNTITLED.to_string());
        let url = entry
            .links
            .into_iter()
            .map(|l| l.href)
            .find(|href| !href.is_empty())
            .or_else(|| {
                let id = entry.id.trim();
                id.starts_with("http").then(|| id.to_string())
            })
            .unwrap_or_else(|| hash::fallback_url(feed_url, &title));
        Self {
            url,
            title,
            summary: entry.summary.map(|s| s.content).unwrap_or_default(),
            published_at: entry.published.or(entry.updated),
        }
    }

    pub fn into_item(self, feed: &RssFeed) -> Item {
        Item {
            source_name: feed.name.clone(),
            source_label: feed.name.clone(),
            url: self.url,
            title: self.title,
            preview: Some(self.summary).filter(|s| !s.trim().is_empty()),
            published_at: self.published_at,
        }
    }
}

/// Case-insensitive substring match; no keywords means everything matches.
pub fn matches_keywords(text: &str, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let haystack = text.to_lowercase();
    keywords
        .iter()
        .any(|kw| haystack.contains(&kw.to_lowercase()))
}

/// Entries older than `cutoff` are only dropped on a feed's first poll.
/// Undated entries always pass, as does everything when there is no cutoff.
pub fn passes_lookback(
    published_at: Option<DateTime<Utc>>,
    first_run: bool,
    cutoff: Option<DateTime<Utc>>,
) -> bool {
    match (published_at, cutoff) {
        (Some(published), Some(cutoff)) if first_run => published >= cutoff,
        _ => true,
    }
}

/// `now` minus the lookback window; `None` when it falls outside chrono's range.
fn lookback_cutoff(now: DateTime<Utc>, max_age_minutes: i64) -> Option<DateTime<Utc>> {
    Duration::try_minutes(max_age_minutes).and_then(|age| now.checked_sub_signed(age))
}

pub fn cursor_key(feed_name: &str) -> String {
    format!("rss:{feed_name}")
}

impl RssAdapter {
    pub fn new(cfg: RssCfg, http: Client) -> Self {
        Self { cfg, http }
    }

    async fn fetch_entries(&self, feed: &RssFeed) -> Result<Vec<Entry>> {
        let res = self
            .http
            .get(&feed.url)
            .send()
            .await
            .context("feed fetch failed")?;
        let status = res.status();
        if !status.is_success() {
            return Err(anyhow!("feed fetch returned {}", status));
        }
        let bytes = res.bytes().await.context("failed to read feed body")?;
        let parsed = feed_rs::parser::parse(&bytes[..]).context("failed to parse RSS/Atom feed")?;
        Ok(parsed.entries)
    }

    /// Apply the keyword and lookback filters to newest-first `entries`,
    /// returning survivors oldest first.
    pub fn select(
        &self,
        feed: &RssFeed,
        entries: Vec<Entry>,
        first_run: bool,
        now: DateTime<Utc>,
    ) -> Vec<Item> {
        let cutoff = lookback_cutoff(now, self.cfg.initial_max_age_minutes);
        oldest_first(entries, self.cfg.max_per_feed as usize)
            .into_iter()
            .map(|entry| FeedEntry::from_entry(&feed.url, entry))
            .filter(|entry| {
                let blob = format!("{}\n{}", entry.title, entry.summary);
                if !matches_keywords(&blob, &feed.include_keywords) {
                    debug!(feed = %feed.name, title = %entry.title, "dropped by keyword filter");
                    return false;
                }
                if !passes_lookback(entry.published_at, first_run, cutoff) {
                    debug!(feed = %feed.name, title = %entry.title, "dropped by first-run lookback");
                    return false;
                }
                true
            })
            .map(|entry| entry.into_item(feed))
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for RssAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Rss
    }

    fn is_enabled(&self) -> bool {
        self.cfg.enabled
    }

    #[instrument(skip_all)]
    async fn poll(&self, ctx: &PollContext<'_>, out: &dyn BatchHandler) -> Result<usize> {
        if !self.cfg.enabled {
            return Ok(0);
        }

        let mut fresh = 0;
        for feed in &self.cfg.feeds {
            let entries = match self.fetch_entries(feed).await {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(?err, feed = %feed.name, url = %feed.url, "feed fetch failed; skipping feed");
                    continue;
                }
            };
            let key = cursor_key(&feed.name);
            let first_run = ctx.store.get_cursor(&key).await?.is_none();
            let fetched = entries.len();
            let selected = self.select(feed, entries, first_run, ctx.now);
            info!(feed = %feed.name, fetched, selected = selected.len(), first_run, "feed parsed");
            fresh += out.handle(selected).await?;
            // Marks the feed as polled at least once, whatever was emitted.
            ctx.store.set_cursor(&key, &ctx.now.to_rfc3339()).await?;
        }
        Ok(fresh)
    }
}
