//! SQLite-backed scheduling: jobs are written to the `outbox` table and a
//! single worker hands due rows to the dispatcher.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{error, info, instrument, warn};

use crate::config;
use crate::db;
use crate::dispatch::Dispatcher;
use crate::model::JOB_ID_KEY;
use crate::scheduler::Scheduler;

pub struct OutboxScheduler {
    pool: SqlitePool,
}

impl OutboxScheduler {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Scheduler for OutboxScheduler {
    async fn enqueue(&self, due_at: DateTime<Utc>, payload: Value) -> Result<()> {
        let job_id = payload
            .get("context")
            .and_then(|ctx| ctx.get(JOB_ID_KEY))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let id = db::enqueue_outbox(&self.pool, &job_id, &payload, due_at)
            .await
            .context("failed to write outbox row")?;
        info!(id, job_id, %due_at, "batch job queued");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub max_backoff_secs: i64,
    pub max_attempts: i32,
}

impl From<&config::App> for WorkerSettings {
    fn from(app: &config::App) -> Self {
        Self {
            max_backoff_secs: app.max_backoff_seconds as i64,
            max_attempts: app.max_attempts as i32,
        }
    }
}

/// Dispatches the next due job, if any. The row is deleted only after the
/// dispatcher returns, so a crash in between redelivers the job.
#[instrument(skip_all)]
pub async fn process_next_task(
    pool: &SqlitePool,
    dispatcher: &Dispatcher,
    settings: &WorkerSettings,
) -> Result<bool> {
    let Some(item) = db::next_due_outbox(pool, Utc::now()).await? else {
        return Ok(false);
    };

    let res: Result<_> = match serde_json::from_str::<Value>(&item.payload) {
        Ok(payload) => dispatcher.handle(&payload).await.map_err(Into::into),
        Err(err) => Err(err.into()),
    };

    match res {
        Ok(outcome) => {
            db::delete_outbox(pool, item.id).await?;
            info!(id = item.id, job_id = %item.job_id, ?outcome, "outbox job handled");
        }
        Err(err) if item.attempt + 1 >= settings.max_attempts => {
            error!(
                ?err,
                id = item.id,
                job_id = %item.job_id,
                attempt = item.attempt,
                "outbox job failed permanently; dropping"
            );
            db::delete_outbox(pool, item.id).await?;
        }
        Err(err) => {
            warn!(
                ?err,
                id = item.id,
                job_id = %item.job_id,
                attempt = item.attempt,
                "outbox job failed; backoff"
            );
            db::backoff_outbox_with_cap(pool, item.id, item.attempt, settings.max_backoff_secs)
                .await?;
        }
    }
    Ok(true)
}

/// Processes due jobs until none is left. Returns how many were handled.
pub async fn drain(
    pool: &SqlitePool,
    dispatcher: &Dispatcher,
    settings: &WorkerSettings,
) -> Result<usize> {
    let mut handled = 0;
    while process_next_task(pool, dispatcher, settings).await? {
        handled += 1;
    }
    Ok(handled)
}
