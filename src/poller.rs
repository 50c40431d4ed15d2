//! Polling orchestrator: fan out to adapters, dedup, deliver, sleep, repeat.
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::config::Config;
use crate::db::Store;
use crate::model::{AdapterOutcome, Item};
use crate::sink::{notify_best_effort, Notifier};
use crate::sources::{self, BatchHandler, Credentials, PollContext, SourceAdapter};

const SYSTEM_NOTICE_TITLE: &str = "Bot error";
const SYSTEM_NOTICE_URL: &str = "https://localhost/";
const SYSTEM_NOTICE_LABEL: &str = "System";

pub struct Orchestrator {
    store: Store,
    notifier: Arc<dyn Notifier>,
    adapters: Vec<Box<dyn SourceAdapter>>,
    interval: Duration,
}

impl Orchestrator {
    pub fn new(
        store: Store,
        notifier: Arc<dyn Notifier>,
        adapters: Vec<Box<dyn SourceAdapter>>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            adapters,
            interval,
        }
    }

    /// Wire up every source kind from `cfg` with a shared HTTP client.
    pub fn from_config(cfg: &Config, store: Store, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let http = sources::http_client(cfg.request_timeout())?;
        let adapters: Vec<Box<dyn SourceAdapter>> = vec![
            Box::new(sources::TwitterAdapter::new(cfg.twitter.clone(), http.clone())),
            Box::new(sources::FacebookAdapter::new(cfg.facebook.clone(), http.clone())),
            Box::new(sources::TruthSocialAdapter::new(cfg.truth_social.clone(), http.clone())),
            Box::new(sources::RssAdapter::new(cfg.rss.clone(), http)),
        ];
        Ok(Self::new(store, notifier, adapters, cfg.poll_interval()))
    }

    /// One POLLING + REDUCING pass over every enabled adapter.
    ///
    /// Adapters run concurrently and hand over each account or feed as soon as
    /// it is fetched, so a slow source never holds back a fast one. Failures are reported as a
    /// best-effort system notice and never abort the other adapters.
    #[instrument(skip_all)]
    pub async fn run_cycle(&self, credentials: &Credentials, now: DateTime<Utc>) -> Vec<AdapterOutcome> {
        let ctx = PollContext {
            store: &self.store,
            credentials,
            now,
        };
        let ctx = &ctx;
        let runs = self
            .adapters
            .iter()
            .filter(|adapter| adapter.is_enabled())
            .map(move |adapter| async move {
                let result = self.run_adapter(adapter.as_ref(), ctx).await;
                AdapterOutcome {
                    kind: adapter.kind(),
                    result,
                }
            });
        let outcomes = join_all(runs).await;

        for outcome in &outcomes {
            if let Err(err) = &outcome.result {
                let source = outcome.kind.as_str();
                error!(?err, source, "adapter failed");
                let notice = format!("{source}: {err:#}");
                notify_best_effort(
                    self.notifier.as_ref(),
                    SYSTEM_NOTICE_TITLE,
                    SYSTEM_NOTICE_URL,
                    SYSTEM_NOTICE_LABEL,
                    Some(&notice),
                )
                .await;
            }
        }
        outcomes
    }

    async fn run_adapter(&self, adapter: &dyn SourceAdapter, ctx: &PollContext<'_>) -> Result<usize> {
        adapter.poll(ctx, self).await
    }

    /// Forward unseen `items` in order, marking each seen right after the send.
    /// Returns how many were new. A store error stops this batch.
    async fn deliver(&self, items: &[Item]) -> Result<usize> {
        let mut fresh = 0;
        for item in items {
            let key = item.key();
            if self.store.has_seen(&key.source, &key.item_id).await? {
                continue;
            }
            notify_best_effort(
                self.notifier.as_ref(),
                &item.title,
                &item.url,
                &item.source_label,
                item.preview.as_deref(),
            )
            .await;
            self.store.mark_seen(&key.source, &key.item_id).await?;
            fresh += 1;
        }
        Ok(fresh)
    }

    /// Poll forever, sleeping `interval` between cycles, until `shutdown`
    /// resolves. A cycle in progress is always allowed to finish.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(interval_secs = self.interval.as_secs(), adapters = self.adapters.len(), "poller started");
        loop {
            let credentials = Credentials::from_env();
            let outcomes = self.run_cycle(&credentials, Utc::now()).await;
            log_summary(&outcomes);

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = &mut shutdown => {
                    info!("shutdown requested; poller stopping");
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl BatchHandler for Orchestrator {
    async fn handle(&self, items: Vec<Item>) -> Result<usize> {
        self.deliver(&items).await
    }
}

pub fn log_summary(outcomes: &[AdapterOutcome]) {
    let fresh: usize = outcomes.iter().map(AdapterOutcome::delivered).sum();
    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    info!(adapters = outcomes.len(), fresh, failed, "poll cycle finished");
}
