//! Source adapters: one per upstream kind.
//!
//! Every adapter turns its configured logical sources (accounts, pages,
//! feeds) into [`Item`]s ordered oldest to newest and hands each source's
//! batch to a [`BatchHandler`] before fetching the next one. Failures scoped
//! to one logical source are logged and skipped; store failures propagate and
//! stop the sources still pending.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::db::Store;
use crate::model::{Item, SourceKind};

pub mod facebook;
pub mod rss;
pub mod truth_social;
pub mod twitter;

pub use facebook::FacebookAdapter;
pub use rss::RssAdapter;
pub use truth_social::TruthSocialAdapter;
pub use twitter::TwitterAdapter;

const USER_AGENT: &str = "tg-feedwatch/0.1";

/// Per-cycle inputs handed to every adapter.
pub struct PollContext<'a> {
    pub store: &'a Store,
    pub credentials: &'a Credentials,
    pub now: DateTime<Utc>,
}

/// Receives one logical source's items, oldest first, as soon as they are
/// fetched. Returns how many were new.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, items: Vec<Item>) -> Result<usize>;
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Whether the config enables this adapter at all.
    fn is_enabled(&self) -> bool;

    /// Fetch every logical source in turn, passing each batch to `out`.
    /// Returns the total `out` reported as new.
    async fn poll(&self, ctx: &PollContext<'_>, out: &dyn BatchHandler) -> Result<usize>;
}

/// Upstream API credentials, read from the environment at the start of each
/// cycle. A missing credential makes the matching adapter inert.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub twitter_bearer: Option<String>,
    pub facebook_token: Option<String>,
    pub mastodon_base_url: Option<String>,
    pub mastodon_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("twitter_bearer", &self.twitter_bearer.is_some())
            .field("facebook_token", &self.facebook_token.is_some())
            .field("mastodon_base_url", &self.mastodon_base_url)
            .field("mastodon_token", &self.mastodon_token.is_some())
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; blank values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let facebook_token = get("FB_ACCESS_TOKEN").or_else(|| {
            match (get("FB_APP_ID"), get("FB_APP_SECRET")) {
                (Some(id), Some(secret)) => Some(format!("{id}|{secret}")),
                _ => None,
            }
        });
        Self {
            twitter_bearer: get("TWITTER_BEARER_TOKEN"),
            facebook_token,
            mastodon_base_url: get("MASTODON_BASE_URL"),
            mastodon_token: get("MASTODON_ACCESS_TOKEN"),
        }
    }
}

/// Shared HTTP client; `timeout` bounds every outbound request.
pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .context("failed to build http client")
}

/// Send `request`, require a 2xx status, and decode the JSON body.
pub(crate) async fn fetch_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    let res = request.send().await.context("request failed")?;
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(anyhow!("upstream error {}: {}", status, truncate(&body, 200)));
    }
    res.json::<T>().await.context("invalid json payload")
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Newest-first wire order to oldest-first emission order, keeping at most
/// `cap` of the newest entries.
pub(crate) fn oldest_first<T>(mut newest_first: Vec<T>, cap: usize) -> Vec<T> {
    newest_first.truncate(cap);
    newest_first.reverse();
    newest_first
}
