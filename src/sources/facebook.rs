//! Facebook Graph API page-feed adapter.
//!
//! No server-side cursor: each poll reads the latest window of posts and
//! relies on the store's seen ledger for dedup.
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::{fetch_json, oldest_first, BatchHandler, PollContext, SourceAdapter};
use crate::config::FacebookCfg;
use crate::model::{Item, SourceKind};

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v19.0/";
pub const SOURCE_NAME: &str = "facebook";
const SOURCE_LABEL: &str = "Facebook";
const GRAPH_MAX_LIMIT: u32 = 25;

pub struct FacebookAdapter {
    cfg: FacebookCfg,
    http: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct PostsPage {
    #[serde(default)]
    data: Vec<Post>,
}

#[derive(Debug, Deserialize)]
struct Post {
    message: Option<String>,
    permalink_url: Option<String>,
    created_time: Option<String>,
}

impl FacebookAdapter {
    pub fn new(cfg: FacebookCfg, http: Client) -> Self {
        let base_url = Url::parse(GRAPH_API_BASE).expect("valid default Graph API URL");
        Self::with_base_url(cfg, http, base_url)
    }

    pub fn with_base_url(cfg: FacebookCfg, http: Client, base_url: Url) -> Self {
        Self { cfg, http, base_url }
    }

    fn limit(&self) -> usize {
        self.cfg.max_per_page.min(GRAPH_MAX_LIMIT) as usize
    }

    async fn fetch_posts(&self, token: &str, page: &str) -> Result<Vec<Post>> {
        let endpoint = self
            .base_url
            .join(&format!("{page}/posts"))
            .context("invalid Graph API base URL")?;
        let limit = self.limit().to_string();
        let posts: PostsPage = fetch_json(self.http.get(endpoint).query(&[
            ("access_token", token),
            ("fields", "message,permalink_url,created_time"),
            ("limit", limit.as_str()),
        ]))
        .await?;
        Ok(posts.data)
    }

    fn to_item(page: &str, post: Post) -> Option<Item> {
        let url = post.permalink_url.filter(|u| !u.is_empty())?;
        Some(Item {
            source_name: SOURCE_NAME.to_string(),
            source_label: SOURCE_LABEL.to_string(),
            url,
            title: format!("New post from Facebook/{page}"),
            preview: post.message.filter(|m| !m.is_empty()),
            published_at: post.created_time.as_deref().and_then(parse_graph_time),
        })
    }
}

/// Graph API timestamps look like `2024-05-01T12:00:00+0000`.
fn parse_graph_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl SourceAdapter for FacebookAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Facebook
    }

    fn is_enabled(&self) -> bool {
        self.cfg.enabled
    }

    #[instrument(skip_all)]
    async fn poll(&self, ctx: &PollContext<'_>, out: &dyn BatchHandler) -> Result<usize> {
        if !self.cfg.enabled {
            return Ok(0);
        }
        let Some(token) = ctx.credentials.facebook_token.as_deref() else {
            debug!("no Facebook token configured; facebook adapter inactive");
            return Ok(0);
        };

        let mut fresh = 0;
        for page in &self.cfg.pages {
            let posts = match self.fetch_posts(token, page).await {
                Ok(posts) => posts,
                Err(err) => {
                    warn!(?err, page = %page, "facebook fetch failed; skipping page");
                    continue;
                }
            };
            info!(page = %page, fetched = posts.len(), "facebook posts fetched");
            let batch = oldest_first(posts, self.limit())
                .into_iter()
                .filter_map(|p| Self::to_item(page, p))
                .collect();
            fresh += out.handle(batch).await?;
        }
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_graph_timestamps() {
        assert_eq!(
            parse_graph_time("2024-05-01T12:00:00+0000"),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(
            parse_graph_time("2024-05-01T14:00:00+02:00"),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(parse_graph_time("yesterday"), None);
    }

    #[test]
    fn posts_without_permalink_are_dropped() {
        let post = Post {
            message: Some("hi".into()),
            permalink_url: None,
            created_time: None,
        };
        assert!(FacebookAdapter::to_item("NASA", post).is_none());

        let post = Post {
            message: Some("hi".into()),
            permalink_url: Some("https://facebook.com/NASA/posts/1".into()),
            created_time: None,
        };
        let item = FacebookAdapter::to_item("NASA", post).unwrap();
        assert_eq!(item.title, "New post from Facebook/NASA");
        assert_eq!(item.source_label, "Facebook");
    }
}
