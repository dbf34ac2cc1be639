//! Splits an event's recipients into batches and staggers their send times.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::config;
use crate::model::{BatchJob, Event, EventKind, MessageContent, RecipientSet, JOB_ID_KEY};
use crate::normalize::address::{clean_email_list, enforce_disjoint};
use crate::normalize::new_job_id;

pub const DEFAULT_TAG: &str = "forum-notification";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyContext {
    pub forum_id: u64,
    pub thread_id: u64,
    pub reply_id: Option<u64>,
    pub batch_index: usize,
    pub batch_count: usize,
}

/// Extra CC/BCC recipients for a batch. Asked once per batch.
pub trait RecipientPolicy: Send + Sync {
    fn cc(&self, kind: EventKind, ctx: &PolicyContext) -> Vec<String>;

    fn bcc(&self, kind: EventKind, ctx: &PolicyContext) -> Vec<String>;
}

pub struct NoExtraRecipients;

impl RecipientPolicy for NoExtraRecipients {
    fn cc(&self, _kind: EventKind, _ctx: &PolicyContext) -> Vec<String> {
        Vec::new()
    }

    fn bcc(&self, _kind: EventKind, _ctx: &PolicyContext) -> Vec<String> {
        Vec::new()
    }
}

/// The same configured lists for every batch.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicy {
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

impl From<&config::Policy> for StaticPolicy {
    fn from(cfg: &config::Policy) -> Self {
        Self {
            cc: cfg.cc.clone(),
            bcc: cfg.bcc.clone(),
        }
    }
}

impl RecipientPolicy for StaticPolicy {
    fn cc(&self, _kind: EventKind, _ctx: &PolicyContext) -> Vec<String> {
        self.cc.clone()
    }

    fn bcc(&self, _kind: EventKind, _ctx: &PolicyContext) -> Vec<String> {
        self.bcc.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerSettings {
    pub batch_size: usize,
    pub interval: Duration,
    pub max_jitter: Duration,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self::from(&config::Batching::default())
    }
}

impl From<&config::Batching> for PlannerSettings {
    fn from(cfg: &config::Batching) -> Self {
        Self {
            batch_size: cfg.batch_size,
            interval: bounded_secs(cfg.interval_seconds),
            max_jitter: bounded_secs(cfg.jitter_seconds),
        }
    }
}

fn bounded_secs(secs: u64) -> Duration {
    Duration::seconds(secs.min(config::MAX_BATCH_DELAY_SECS) as i64)
}

pub struct BatchPlanner {
    settings: PlannerSettings,
    policy: Arc<dyn RecipientPolicy>,
}

impl BatchPlanner {
    pub fn new(settings: PlannerSettings, policy: Arc<dyn RecipientPolicy>) -> Self {
        Self { settings, policy }
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    pub fn plan(
        &self,
        event: &Event,
        recipients: &RecipientSet,
        content: &MessageContent,
        headers: &[String],
        now: DateTime<Utc>,
    ) -> Vec<BatchJob> {
        let batches = partition(recipients.as_slice(), self.settings.batch_size);
        let offsets = schedule_offsets(
            batches.len(),
            self.settings.interval,
            self.settings.max_jitter,
            &mut rand::rng(),
        );
        let batch_count = batches.len();
        let scenario = event.kind.as_str();

        batches
            .into_iter()
            .zip(offsets)
            .enumerate()
            .map(|(batch_index, (batch, offset))| {
                let ctx = PolicyContext {
                    forum_id: event.forum_id,
                    thread_id: event.thread_id,
                    reply_id: event.reply_id,
                    batch_index,
                    batch_count,
                };
                let (cc, bcc) = enforce_disjoint(
                    &batch,
                    clean_email_list(self.policy.cc(event.kind, &ctx)),
                    clean_email_list(self.policy.bcc(event.kind, &ctx)),
                );

                let job_id = new_job_id();
                let mut context = Map::new();
                context.insert(JOB_ID_KEY.into(), Value::String(job_id.clone()));
                context.insert("scenario".into(), json!(scenario));
                context.insert("forum_id".into(), json!(event.forum_id));
                context.insert("thread_id".into(), json!(event.thread_id));
                context.insert("reply_id".into(), json!(event.reply_id));
                context.insert("batch_index".into(), json!(batch_index));

                let mut metadata = Map::new();
                metadata.insert("forum_id".into(), json!(event.forum_id));
                metadata.insert("thread_id".into(), json!(event.thread_id));
                metadata.insert("batch_index".into(), json!(batch_index));
                metadata.insert("batch_count".into(), json!(batch_count));

                let tags = BTreeSet::from([DEFAULT_TAG.to_string(), scenario.to_string()]);
                let scheduled_at = now + offset;
                debug!(job_id, batch_index, size = batch.len(), %scheduled_at, "planned batch");

                BatchJob {
                    recipients: batch,
                    cc,
                    bcc,
                    subject: content.subject.clone(),
                    html: content.html.clone(),
                    text: content.text.clone(),
                    headers: headers.to_vec(),
                    metadata,
                    tags,
                    context,
                    scheduled_at,
                }
            })
            .collect()
    }
}

/// Consecutive chunks of at most `batch_size` (clamped to 1).
pub fn partition(recipients: &[String], batch_size: usize) -> Vec<Vec<String>> {
    recipients
        .chunks(batch_size.max(1))
        .map(<[String]>::to_vec)
        .collect()
}

/// Cumulative offsets from the planning instant. Each step adds `interval`
/// plus a jitter drawn from `[0, max_jitter)`, so consecutive offsets are at
/// least `interval` apart.
pub fn schedule_offsets<R: Rng>(
    count: usize,
    interval: Duration,
    max_jitter: Duration,
    rng: &mut R,
) -> Vec<Duration> {
    let jitter_ms = max_jitter.num_milliseconds();
    let mut draw = || {
        if jitter_ms > 0 {
            Duration::milliseconds(rng.random_range(0..jitter_ms))
        } else {
            Duration::zero()
        }
    };

    let mut offsets = Vec::with_capacity(count);
    let mut current = Duration::zero();
    for index in 0..count {
        if index > 0 {
            current = current + interval;
        }
        current = current + draw();
        offsets.push(current);
    }
    offsets
}
