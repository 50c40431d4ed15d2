use anyhow::Result;
use chrono::{TimeZone, Utc};
use clap::Parser;
use std::path::PathBuf;
use tg_feedwatch::config;
use tg_feedwatch::db::Store;

#[derive(Parser, Debug)]
#[command(author, version, about = "Print stored cursors and delivered-item counts")]
struct Args {
    /// Path to YAML sources file (reads only `data_dir`)
    #[arg(long, default_value = "sources.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let cfg = config::load(Some(&args.config))?;
    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let store = Store::open(&database_url).await?;

    println!("Cursors:");
    for record in store.list_cursors().await? {
        println!(
            "  {} -> {}",
            record.source,
            record.since_id.as_deref().unwrap_or("-")
        );
    }

    println!("Seen items:");
    for count in store.seen_counts().await? {
        let last = Utc
            .timestamp_opt(count.last_seen, 0)
            .single()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| count.last_seen.to_string());
        println!("  {} -> {} (last {})", count.source, count.items, last);
    }

    store.close().await;
    Ok(())
}
