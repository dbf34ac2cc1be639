//! Deferred execution boundary.
//!
//! A scheduler takes `(due_at, payload)` pairs and, at or after `due_at`, hands
//! the payload to [`Dispatcher::handle`]. Delivery is at-least-once.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::dispatch::Dispatcher;

#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn enqueue(&self, due_at: DateTime<Utc>, payload: Value) -> Result<()>;
}

/// In-process scheduler backed by one tokio task per job. Pending jobs are
/// lost when the process exits.
pub struct TimerScheduler {
    dispatcher: Arc<Dispatcher>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TimerScheduler {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Jobs spawned but not yet finished.
    pub async fn pending(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        tasks.len()
    }

    /// Waits for every job still tracked. Returns how many finished.
    pub async fn drain(&self) -> usize {
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock().await);
        let mut finished = 0;
        for task in tasks {
            match task.await {
                Ok(()) => finished += 1,
                Err(err) => error!(?err, "scheduled dispatch task panicked"),
            }
        }
        finished
    }
}

#[async_trait]
impl Scheduler for TimerScheduler {
    async fn enqueue(&self, due_at: DateTime<Utc>, payload: Value) -> Result<()> {
        let delay = (due_at - Utc::now()).to_std().unwrap_or_default();
        let dispatcher = self.dispatcher.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match dispatcher.handle(&payload).await {
                Ok(outcome) => info!(job_id = outcome.job_id(), "scheduled job handled"),
                Err(err) => error!(?err, "scheduled job dropped"),
            }
        });
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
        Ok(())
    }
}
