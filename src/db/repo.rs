use super::model::{OffsetRecord, SeenCount};
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

/// Durable dedup ledger and cursor table.
///
/// All access goes through a single pooled connection so writes are
/// serialized, and every statement commits before returning.
#[derive(Debug, Clone)]
pub struct Store {
    pool: Pool,
}

impl Store {
    /// Open (creating if needed) the database at `database_url` and apply
    /// migrations.
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = init_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn has_seen(&self, source: &str, item_id: &str) -> Result<bool> {
        let hit = sqlx::query_scalar::<_, i64>("SELECT 1 FROM seen WHERE source = ? AND item_id = ?")
            .bind(source)
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await
            .context("seen lookup failed")?;
        Ok(hit.is_some())
    }

    /// Record `item_id` as delivered. Repeated calls are no-ops.
    #[instrument(skip(self))]
    pub async fn mark_seen(&self, source: &str, item_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO seen (source, item_id, ts) VALUES (?, ?, ?)")
            .bind(source)
            .bind(item_id)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .context("mark_seen failed")?;
        Ok(())
    }

    /// `None` means the source has never completed a poll.
    #[instrument(skip(self))]
    pub async fn get_cursor(&self, source: &str) -> Result<Option<String>> {
        let cursor: Option<Option<String>> =
            sqlx::query_scalar("SELECT since_id FROM offsets WHERE source = ?")
                .bind(source)
                .fetch_optional(&self.pool)
                .await
                .context("cursor lookup failed")?;
        Ok(cursor.flatten().filter(|c| !c.is_empty()))
    }

    /// Upsert the cursor. Callers are responsible for only moving it forward.
    #[instrument(skip(self))]
    pub async fn set_cursor(&self, source: &str, cursor: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO offsets (source, since_id) VALUES (?, ?) \
             ON CONFLICT(source) DO UPDATE SET since_id = excluded.since_id",
        )
        .bind(source)
        .bind(cursor)
        .execute(&self.pool)
        .await
        .context("set_cursor failed")?;
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn list_cursors(&self) -> Result<Vec<OffsetRecord>> {
        let rows = sqlx::query_as::<_, OffsetRecord>(
            "SELECT source, since_id FROM offsets ORDER BY source",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    #[instrument(skip_all)]
    pub async fn seen_counts(&self) -> Result<Vec<SeenCount>> {
        let rows = sqlx::query_as::<_, SeenCount>(
            "SELECT source, COUNT(*) AS items, MAX(ts) AS last_seen FROM seen GROUP BY source ORDER BY source",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url: {normalized}"))?
        .create_if_missing(true)
        // Enable WAL and stricter durability.
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    // One connection: the ledger has a single writer and in-memory databases
    // live exactly as long as their connection.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .context("failed to open sqlite database")?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
