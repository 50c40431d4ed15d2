use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use tg_feedwatch::config;
use tg_feedwatch::db::Store;
use tg_feedwatch::poller::{self, Orchestrator};
use tg_feedwatch::sink::TelegramNotifier;
use tg_feedwatch::sources::Credentials;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML sources file
    #[arg(long, default_value = "sources.yaml")]
    config: PathBuf,

    /// Run a single polling cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            warn!(?err, "failed to load .env");
        }
    }

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    // The sink is mandatory; refuse to start without it.
    let notifier = Arc::new(TelegramNotifier::from_env()?);

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let store = Store::open(&database_url).await?;

    let orchestrator = Orchestrator::from_config(&cfg, store.clone(), notifier)?;

    if args.once {
        info!("running a single poll cycle");
        let outcomes = orchestrator
            .run_cycle(&Credentials::from_env(), Utc::now())
            .await;
        poller::log_summary(&outcomes);
    } else {
        orchestrator
            .run(async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(?err, "failed to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            })
            .await;
    }

    store.close().await;
    Ok(())
}
