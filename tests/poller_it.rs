use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tg_feedwatch::db::Store;
use tg_feedwatch::hash;
use tg_feedwatch::model::{Item, SourceKind};
use tg_feedwatch::poller::Orchestrator;
use tg_feedwatch::sink::Notifier;
use tg_feedwatch::sources::{BatchHandler, Credentials, PollContext, SourceAdapter};
use tokio::sync::Mutex;

async fn setup_store() -> Store {
    Store::open("sqlite::memory:").await.unwrap()
}

#[derive(Debug, Clone, PartialEq)]
struct Sent {
    title: String,
    url: String,
    label: String,
    preview: Option<String>,
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    failures: Arc<Mutex<VecDeque<bool>>>,
    sent: Arc<Mutex<Vec<Sent>>>,
}

impl RecordingNotifier {
    /// `true` entries make the matching call fail; later calls succeed.
    fn with_failures(failures: Vec<bool>) -> Self {
        Self {
            failures: Arc::new(Mutex::new(VecDeque::from(failures))),
            ..Default::default()
        }
    }

    async fn sent(&self) -> Vec<Sent> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        title: &str,
        url: &str,
        source_label: &str,
        preview: Option<&str>,
    ) -> Result<()> {
        self.sent.lock().await.push(Sent {
            title: title.to_string(),
            url: url.to_string(),
            label: source_label.to_string(),
            preview: preview.map(str::to_string),
        });
        if self.failures.lock().await.pop_front().unwrap_or(false) {
            return Err(anyhow!("telegram unavailable"));
        }
        Ok(())
    }
}

struct StaticAdapter {
    kind: SourceKind,
    enabled: bool,
    items: Vec<Item>,
    fail: bool,
}

impl StaticAdapter {
    fn ok(kind: SourceKind, items: Vec<Item>) -> Self {
        Self {
            kind,
            enabled: true,
            items,
            fail: false,
        }
    }

    fn failing(kind: SourceKind) -> Self {
        Self {
            kind,
            enabled: true,
            items: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl SourceAdapter for StaticAdapter {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn poll(&self, _ctx: &PollContext<'_>, out: &dyn BatchHandler) -> Result<usize> {
        if self.fail {
            return Err(anyhow!("upstream exploded"));
        }
        out.handle(self.items.clone()).await
    }
}

fn item(source: &str, n: u32) -> Item {
    Item {
        source_name: source.to_string(),
        source_label: source.to_uppercase(),
        url: format!("https://{source}.example/posts/{n}"),
        title: format!("post {n}"),
        preview: Some(format!("body {n}")),
        published_at: None,
    }
}

fn orchestrator(
    store: &Store,
    notifier: &RecordingNotifier,
    adapters: Vec<Box<dyn SourceAdapter>>,
) -> Orchestrator {
    Orchestrator::new(
        store.clone(),
        Arc::new(notifier.clone()),
        adapters,
        Duration::from_secs(60),
    )
}

#[tokio::test]
async fn unseen_items_are_delivered_exactly_once() {
    let store = setup_store().await;
    let notifier = RecordingNotifier::default();
    let items = vec![item("twitter", 1), item("twitter", 2)];
    let orch = orchestrator(
        &store,
        &notifier,
        vec![Box::new(StaticAdapter::ok(SourceKind::Twitter, items))],
    );

    let creds = Credentials::default();
    let first = orch.run_cycle(&creds, Utc::now()).await;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].delivered(), 2);

    let second = orch.run_cycle(&creds, Utc::now()).await;
    assert_eq!(second[0].delivered(), 0);

    let sent = notifier.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].title, "post 1");
    assert_eq!(sent[0].label, "TWITTER");
    assert_eq!(sent[0].preview.as_deref(), Some("body 1"));
    assert_eq!(sent[1].url, "https://twitter.example/posts/2");

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seen WHERE source = 'twitter'")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(rows, 2);
    assert!(store
        .has_seen("twitter", &hash::content_hash("https://twitter.example/posts/1"))
        .await
        .unwrap());
}

#[tokio::test]
async fn emission_order_is_preserved() {
    let store = setup_store().await;
    let notifier = RecordingNotifier::default();
    let items = (1..=5).map(|n| item("rss-news", n)).collect();
    let orch = orchestrator(
        &store,
        &notifier,
        vec![Box::new(StaticAdapter::ok(SourceKind::Rss, items))],
    );

    orch.run_cycle(&Credentials::default(), Utc::now()).await;

    let titles: Vec<_> = notifier.sent().await.into_iter().map(|s| s.title).collect();
    assert_eq!(titles, vec!["post 1", "post 2", "post 3", "post 4", "post 5"]);
}

#[tokio::test]
async fn duplicate_items_in_one_batch_are_sent_once() {
    let store = setup_store().await;
    let notifier = RecordingNotifier::default();
    let items = vec![item("facebook", 7), item("facebook", 7)];
    let orch = orchestrator(
        &store,
        &notifier,
        vec![Box::new(StaticAdapter::ok(SourceKind::Facebook, items))],
    );

    let outcomes = orch.run_cycle(&Credentials::default(), Utc::now()).await;
    assert_eq!(outcomes[0].delivered(), 1);
    assert_eq!(notifier.sent().await.len(), 1);
}

#[tokio::test]
async fn same_url_in_different_namespaces_is_not_deduped() {
    let store = setup_store().await;
    let notifier = RecordingNotifier::default();
    let mut shared = item("Feed A", 1);
    shared.url = "https://news.example/story".into();
    let mut other = shared.clone();
    other.source_name = "Feed B".into();
    let orch = orchestrator(
        &store,
        &notifier,
        vec![Box::new(StaticAdapter::ok(SourceKind::Rss, vec![shared, other]))],
    );

    orch.run_cycle(&Credentials::default(), Utc::now()).await;
    assert_eq!(notifier.sent().await.len(), 2);
}

#[tokio::test]
async fn adapter_failure_is_isolated_and_reported() {
    let store = setup_store().await;
    let notifier = RecordingNotifier::default();
    let orch = orchestrator(
        &store,
        &notifier,
        vec![
            Box::new(StaticAdapter::failing(SourceKind::Facebook)),
            Box::new(StaticAdapter::ok(SourceKind::Rss, vec![item("news", 1)])),
        ],
    );

    let outcomes = orch.run_cycle(&Credentials::default(), Utc::now()).await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].result.is_err());
    assert_eq!(outcomes[0].kind, SourceKind::Facebook);
    assert_eq!(outcomes[1].delivered(), 1);

    let sent = notifier.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].title, "post 1");
    let notice = &sent[1];
    assert_eq!(notice.title, "Bot error");
    assert_eq!(notice.label, "System");
    assert_eq!(notice.url, "https://localhost/");
    assert!(notice
        .preview
        .as_deref()
        .unwrap()
        .contains("facebook: upstream exploded"));

    // The failure does not poison the next cycle.
    let again = orch.run_cycle(&Credentials::default(), Utc::now()).await;
    assert!(again[0].result.is_err());
    assert_eq!(again[1].delivered(), 0);
}

#[tokio::test]
async fn sink_failure_does_not_stop_the_batch() {
    let store = setup_store().await;
    let notifier = RecordingNotifier::with_failures(vec![true, false]);
    let orch = orchestrator(
        &store,
        &notifier,
        vec![Box::new(StaticAdapter::ok(
            SourceKind::TruthSocial,
            vec![item("truth", 1), item("truth", 2)],
        ))],
    );

    let outcomes = orch.run_cycle(&Credentials::default(), Utc::now()).await;
    assert!(outcomes[0].result.is_ok());
    assert_eq!(notifier.sent().await.len(), 2);

    // Best-effort: the failed send is not retried on the next cycle.
    orch.run_cycle(&Credentials::default(), Utc::now()).await;
    assert_eq!(notifier.sent().await.len(), 2);
}

#[tokio::test]
async fn disabled_adapters_are_not_polled() {
    let store = setup_store().await;
    let notifier = RecordingNotifier::default();
    let mut disabled = StaticAdapter::ok(SourceKind::Twitter, vec![item("twitter", 1)]);
    disabled.enabled = false;
    let orch = orchestrator(&store, &notifier, vec![Box::new(disabled)]);

    let outcomes = orch.run_cycle(&Credentials::default(), Utc::now()).await;
    assert!(outcomes.is_empty());
    assert!(notifier.sent().await.is_empty());
}

#[tokio::test]
async fn store_failure_fails_only_that_adapter() {
    let store = setup_store().await;
    let notifier = RecordingNotifier::default();
    let orch = orchestrator(
        &store,
        &notifier,
        vec![Box::new(StaticAdapter::ok(SourceKind::Rss, vec![item("news", 1)]))],
    );
    sqlx::query("DROP TABLE seen")
        .execute(store.pool())
        .await
        .unwrap();

    let outcomes = orch.run_cycle(&Credentials::default(), Utc::now()).await;
    assert!(outcomes[0].result.is_err());
    let sent = notifier.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].label, "System");
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let store = setup_store().await;
    let notifier = RecordingNotifier::default();
    let orch = orchestrator(
        &store,
        &notifier,
        vec![Box::new(StaticAdapter::ok(SourceKind::Rss, vec![item("news", 1)]))],
    );

    tokio::time::timeout(Duration::from_secs(5), orch.run(async {}))
        .await
        .expect("run should return once shutdown resolves");
    assert_eq!(notifier.sent().await.len(), 1);
}
