//! Mastodon-compatible adapter, pointed at Truth Social.
//!
//! Account ids are looked up on every poll. Dedup relies on the seen ledger.
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::{fetch_json, oldest_first, BatchHandler, PollContext, SourceAdapter};
use crate::config::TruthSocialCfg;
use crate::model::{Item, SourceKind};

pub const SOURCE_NAME: &str = "truth";
const SOURCE_LABEL: &str = "Truth Social";
const STATUSES_MAX_LIMIT: u32 = 40;

/// Markup tokens replaced by a space when building previews. This is not an
/// HTML parser; anything else passes through untouched.
pub const STRIPPED_TOKENS: [&str; 5] = ["<p>", "</p>", "<br>", "<br/>", "<br />"];

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

pub struct TruthSocialAdapter {
    cfg: TruthSocialCfg,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct Account {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Status {
    url: Option<String>,
    uri: Option<String>,
    #[serde(default)]
    content: String,
    created_at: Option<DateTime<Utc>>,
}

impl TruthSocialAdapter {
    pub fn new(cfg: TruthSocialCfg, http: Client) -> Self {
        Self { cfg, http }
    }

    fn limit(&self) -> usize {
        self.cfg.max_per_user.min(STATUSES_MAX_LIMIT) as usize
    }

    async fn fetch_statuses(&self, base: &Url, token: &str, user: &str) -> Result<Vec<Status>> {
        let lookup = base
            .join("api/v1/accounts/lookup")
            .context("invalid Mastodon base URL")?;
        let account: Account = fetch_json(
            self.http
                .get(lookup)
                .bearer_auth(token)
                .query(&[("acct", user)]),
        )
        .await?;
        let account_id = account
            .id
            .filter(|id| !id.is_empty())
            .with_context(|| format!("no account id for {user}"))?;

        let statuses_url = base
            .join(&format!("api/v1/accounts/{account_id}/statuses"))
            .context("invalid Mastodon base URL")?;
        let limit = self.limit().to_string();
        fetch_json(
            self.http
                .get(statuses_url)
                .bearer_auth(token)
                .query(&[("limit", limit.as_str())]),
        )
        .await
    }

    fn to_item(user: &str, status: Status) -> Option<Item> {
        let url = status
            .url
            .filter(|u| !u.is_empty())
            .or(status.uri.filter(|u| !u.is_empty()))?;
        let preview = plain_text(&status.content);
        Some(Item {
            source_name: SOURCE_NAME.to_string(),
            source_label: SOURCE_LABEL.to_string(),
            url,
            title: format!("New post from Truth Social/{user}"),
            preview: Some(preview).filter(|p| !p.is_empty()),
            published_at: status.created_at,
        })
    }
}

/// Replace [`STRIPPED_TOKENS`] with spaces and collapse whitespace.
pub fn plain_text(content: &str) -> String {
    let replaced = STRIPPED_TOKENS
        .iter()
        .fold(content.to_string(), |acc, token| acc.replace(token, " "));
    WHITESPACE.replace_all(replaced.trim(), " ").into_owned()
}

/// Base URLs without a trailing slash would lose their last path segment on join.
fn normalize_base(raw: &str) -> Result<Url> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&with_slash).with_context(|| format!("invalid MASTODON_BASE_URL: {raw}"))
}

#[async_trait]
impl SourceAdapter for TruthSocialAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::TruthSocial
    }

    fn is_enabled(&self) -> bool {
        self.cfg.enabled
    }

    #[instrument(skip_all)]
    async fn poll(&self, ctx: &PollContext<'_>, out: &dyn BatchHandler) -> Result<usize> {
        if !self.cfg.enabled {
            return Ok(0);
        }
        let (Some(base), Some(token)) = (
            ctx.credentials.mastodon_base_url.as_deref(),
            ctx.credentials.mastodon_token.as_deref(),
        ) else {
            debug!("MASTODON_BASE_URL or MASTODON_ACCESS_TOKEN not set; truth social adapter inactive");
            return Ok(0);
        };
        let base = match normalize_base(base) {
            Ok(base) => base,
            Err(err) => {
                warn!(?err, "truth social adapter inactive");
                return Ok(0);
            }
        };

        let mut fresh = 0;
        for user in &self.cfg.users {
            let statuses = match self.fetch_statuses(&base, token, user).await {
                Ok(statuses) => statuses,
                Err(err) => {
                    warn!(?err, user = %user, "truth social fetch failed; skipping account");
                    continue;
                }
            };
            info!(user = %user, fetched = statuses.len(), "truth social statuses fetched");
            let batch = oldest_first(statuses, self.limit())
                .into_iter()
                .filter_map(|s| Self::to_item(user, s))
                .collect();
            fresh += out.handle(batch).await?;
        }
        Ok(fresh)
    }
}
