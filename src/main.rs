use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use forum_mailer::app;
use forum_mailer::config::{self, Config};
use forum_mailer::db;
use forum_mailer::directory::StaticDirectory;
use forum_mailer::model::Event;
use forum_mailer::notifier::NotifyOutcome;
use forum_mailer::outbox::{self, OutboxScheduler, WorkerSettings};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve, compose and queue the batches for one forum event
    Notify {
        /// JSON file holding the event
        #[arg(long)]
        event: PathBuf,
        /// YAML file with users and subscriptions
        #[arg(long)]
        directory: PathBuf,
    },
    /// Deliver due outbox jobs until interrupted
    Worker,
    /// Deliver every due outbox job, then exit
    Drain,
    /// Print an example configuration
    ExampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    match args.command {
        Command::ExampleConfig => print!("{}", config::example()),
        Command::Notify { event, directory } => {
            let (cfg, pool) = open(&args.config).await?;
            let raw = std::fs::read_to_string(&event)
                .with_context(|| format!("failed to read event {}", event.display()))?;
            let event: Event = serde_json::from_str(&raw).context("invalid event JSON")?;
            let directory = StaticDirectory::load(&directory)?;
            let scheduler = Arc::new(OutboxScheduler::new(pool.clone()));
            let notifier = app::build_notifier(&cfg, Arc::new(directory), scheduler)?;
            match notifier.notify(&event).await? {
                NotifyOutcome::NoRecipients => info!("no recipients; nothing queued"),
                NotifyOutcome::Scheduled { recipients, jobs } => {
                    for job in &jobs {
                        info!(
                            job_id = %job.job_id,
                            due_at = %job.due_at,
                            recipients = job.recipients,
                            "batch queued"
                        );
                    }
                    info!(recipients, batches = jobs.len(), "event queued");
                }
            }
        }
        Command::Worker => {
            let (cfg, pool) = open(&args.config).await?;
            let dispatcher = app::build_dispatcher(&cfg)?;
            dispatcher.selector().prime_account_cache().await;
            let settings = WorkerSettings::from(&cfg.app);
            let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);
            info!("starting outbox worker");
            loop {
                match outbox::process_next_task(&pool, &dispatcher, &settings).await {
                    Ok(processed) => {
                        if !processed {
                            tokio::time::sleep(poll_sleep).await;
                        }
                    }
                    Err(err) => {
                        error!(?err, "outbox worker error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
        Command::Drain => {
            let (cfg, pool) = open(&args.config).await?;
            let dispatcher = app::build_dispatcher(&cfg)?;
            let settings = WorkerSettings::from(&cfg.app);
            let handled = outbox::drain(&pool, &dispatcher, &settings).await?;
            let remaining = db::count_outbox(&pool).await?;
            info!(handled, remaining, "outbox drained");
        }
    }

    Ok(())
}

async fn open(path: &Path) -> Result<(Config, db::Pool)> {
    let cfg = config::load(Some(path))?;
    cfg.ensure_dirs()?;
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    Ok((cfg, pool))
}
