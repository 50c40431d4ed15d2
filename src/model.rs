use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Twitter,
    Facebook,
    TruthSocial,
    Rss,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Twitter => "twitter",
            SourceKind::Facebook => "facebook",
            SourceKind::TruthSocial => "truth_social",
            SourceKind::Rss => "rss",
        }
    }
}

/// A candidate notification produced by a source adapter.
///
/// `source_name` is the dedup namespace in the `seen` table; `source_label` is
/// what the sink shows. `url` is either the canonical link or a synthetic
/// fallback built by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub source_name: String,
    pub source_label: String,
    pub url: String,
    pub title: String,
    pub preview: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn key(&self) -> ItemKey {
        ItemKey {
            source: self.source_name.clone(),
            item_id: hash::content_hash(&self.url),
        }
    }
}

/// Dedup key: `(source, sha256(url))`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub source: String,
    pub item_id: String,
}

/// Result of one adapter's poll-and-deliver pass within a cycle.
#[derive(Debug)]
pub struct AdapterOutcome {
    pub kind: SourceKind,
    pub result: anyhow::Result<usize>,
}

impl AdapterOutcome {
    pub fn delivered(&self) -> usize {
        self.result.as_ref().copied().unwrap_or(0)
    }
}
