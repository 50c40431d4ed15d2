//! Twitter/X v2 timeline adapter.
//!
//! Cursor key: `twitter:<handle>`, value: newest tweet id already fetched.
//! Requests use `since_id` so only newer tweets come back.
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{fetch_json, oldest_first, BatchHandler, PollContext, SourceAdapter};
use crate::config::TwitterCfg;
use crate::db::Store;
use crate::model::{Item, SourceKind};

const TWITTER_API_BASE: &str = "https://api.twitter.com/";
pub const SOURCE_NAME: &str = "twitter";
const SOURCE_LABEL: &str = "Twitter/X";

pub struct TwitterAdapter {
    cfg: TwitterCfg,
    http: Client,
    base_url: Url,
    /// handle -> numeric user id, resolved once per process.
    user_ids: Mutex<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct UserLookup {
    data: Option<UserData>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Timeline {
    #[serde(default)]
    data: Vec<Tweet>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    #[serde(default)]
    text: String,
    created_at: Option<DateTime<Utc>>,
}

impl TwitterAdapter {
    pub fn new(cfg: TwitterCfg, http: Client) -> Self {
        let base_url = Url::parse(TWITTER_API_BASE).expect("valid default Twitter URL");
        Self::with_base_url(cfg, http, base_url)
    }

    pub fn with_base_url(cfg: TwitterCfg, http: Client, base_url: Url) -> Self {
        Self {
            cfg,
            http,
            base_url,
            user_ids: Mutex::new(HashMap::new()),
        }
    }

    async fn resolve_user_id(&self, bearer: &str, handle: &str) -> Result<String> {
        if let Some(id) = self.user_ids.lock().await.get(handle) {
            return Ok(id.clone());
        }
        let endpoint = self
            .base_url
            .join(&format!("2/users/by/username/{handle}"))
            .context("invalid Twitter base URL")?;
        let lookup: UserLookup = fetch_json(
            self.http
                .get(endpoint)
                .bearer_auth(bearer)
                .query(&[("user.fields", "id")]),
        )
        .await?;
        let id = lookup
            .data
            .map(|d| d.id)
            .filter(|id| !id.is_empty())
            .with_context(|| format!("no user id for @{handle}"))?;
        self.user_ids
            .lock()
            .await
            .insert(handle.to_string(), id.clone());
        Ok(id)
    }

    /// Tweets newer than `since_id`, newest first as the API returns them.
    async fn fetch_timeline(
        &self,
        bearer: &str,
        handle: &str,
        since_id: Option<&str>,
    ) -> Result<Vec<Tweet>> {
        let user_id = self.resolve_user_id(bearer, handle).await?;
        let endpoint = self
            .base_url
            .join(&format!("2/users/{user_id}/tweets"))
            .context("invalid Twitter base URL")?;
        // The API only accepts max_results in 5..=100.
        let max_results = self.cfg.max_per_user.clamp(5, 100).to_string();
        let mut params = vec![
            ("max_results", max_results.as_str()),
            ("tweet.fields", "created_at"),
            ("exclude", "replies"),
        ];
        if let Some(since_id) = since_id {
            params.push(("since_id", since_id));
        }
        let timeline: Timeline =
            fetch_json(self.http.get(endpoint).bearer_auth(bearer).query(&params)).await?;
        Ok(timeline.data)
    }

    fn to_item(handle: &str, tweet: Tweet) -> Item {
        Item {
            source_name: SOURCE_NAME.to_string(),
            source_label: SOURCE_LABEL.to_string(),
            url: format!("https://x.com/{}/status/{}", handle, tweet.id),
            title: format!("New post from @{handle}"),
            preview: Some(tweet.text).filter(|t| !t.is_empty()),
            published_at: tweet.created_at,
        }
    }
}

#[async_trait]
impl SourceAdapter for TwitterAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Twitter
    }

    fn is_enabled(&self) -> bool {
        self.cfg.enabled
    }

    #[instrument(skip_all)]
    async fn poll(&self, ctx: &PollContext<'_>, out: &dyn BatchHandler) -> Result<usize> {
        if !self.cfg.enabled {
            return Ok(0);
        }
        let Some(bearer) = ctx.credentials.twitter_bearer.as_deref() else {
            debug!("TWITTER_BEARER_TOKEN not set; twitter adapter inactive");
            return Ok(0);
        };

        let mut fresh = 0;
        for handle in &self.cfg.users {
            let cursor_key = cursor_key(handle);
            let since_id = ctx.store.get_cursor(&cursor_key).await?;
            let tweets = match self.fetch_timeline(bearer, handle, since_id.as_deref()).await {
                Ok(tweets) => tweets,
                Err(err) => {
                    warn!(?err, handle = %handle, "twitter fetch failed; skipping account");
                    continue;
                }
            };
            info!(handle = %handle, fetched = tweets.len(), "twitter timeline fetched");
            let newest = tweets.first().map(|t| t.id.clone());
            let batch = oldest_first(tweets, self.cfg.max_per_user as usize)
                .into_iter()
                .map(|t| Self::to_item(handle, t))
                .collect();
            fresh += out.handle(batch).await?;
            // Only after delivery, so a failed batch is fetched again next cycle.
            if let Some(newest) = newest {
                advance_cursor(ctx.store, &cursor_key, since_id.as_deref(), &newest).await?;
            }
        }
        Ok(fresh)
    }
}

pub fn cursor_key(handle: &str) -> String {
    format!("twitter:{handle}")
}

/// Store `candidate` only if it is strictly past `current`.
async fn advance_cursor(
    store: &Store,
    key: &str,
    current: Option<&str>,
    candidate: &str,
) -> Result<()> {
    match current {
        Some(current) if !is_newer(candidate, current) => {
            debug!(key, current, candidate, "cursor not advanced");
            Ok(())
        }
        _ => store.set_cursor(key, candidate).await,
    }
}

/// Snowflake ids compare numerically; anything else by length then lexically.
fn is_newer(candidate: &str, current: &str) -> bool {
    match (candidate.parse::<u64>(), current.parse::<u64>()) {
        (Ok(a), Ok(b)) => a > b,
        _ => (candidate.len(), candidate) > (current.len(), current),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_compare_numerically() {
        assert!(is_newer("1000", "999"));
        assert!(!is_newer("999", "1000"));
        assert!(!is_newer("1000", "1000"));
        assert!(is_newer("1790000000000000001", "1790000000000000000"));
    }

    #[test]
    fn opaque_ids_compare_by_length_then_text() {
        assert!(is_newer("abcd", "abc"));
        assert!(is_newer("abd", "abc"));
        assert!(!is_newer("ab", "abc"));
    }

    #[test]
    fn tweet_maps_to_item() {
        let tweet = Tweet {
            id: "42".into(),
            text: "hello".into(),
            created_at: None,
        };
        let item = TwitterAdapter::to_item("nasa", tweet);
        assert_eq!(item.url, "https://x.com/nasa/status/42");
        assert_eq!(item.title, "New post from @nasa");
        assert_eq!(item.source_name, "twitter");
        assert_eq!(item.preview.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn advance_cursor_never_moves_back() {
        let store = Store::open("sqlite::memory:").await.unwrap();
        advance_cursor(&store, "twitter:nasa", None, "200").await.unwrap();
        advance_cursor(&store, "twitter:nasa", Some("200"), "150").await.unwrap();
        assert_eq!(
            store.get_cursor("twitter:nasa").await.unwrap().as_deref(),
            Some("200")
        );
        advance_cursor(&store, "twitter:nasa", Some("200"), "300").await.unwrap();
        assert_eq!(
            store.get_cursor("twitter:nasa").await.unwrap().as_deref(),
            Some("300")
        );
    }
}
