use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::compose::MessageComposer;
use crate::error::NotifyError;
use crate::model::Event;
use crate::planner::BatchPlanner;
use crate::recipients::RecipientResolver;
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub job_id: String,
    pub due_at: DateTime<Utc>,
    pub recipients: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    NoRecipients,
    Scheduled {
        recipients: usize,
        jobs: Vec<ScheduledJob>,
    },
}

/// Runs resolve, compose and plan for one event and hands the batch jobs to
/// the scheduler.
pub struct Notifier {
    resolver: RecipientResolver,
    composer: MessageComposer,
    planner: BatchPlanner,
    scheduler: Arc<dyn Scheduler>,
}

impl Notifier {
    pub fn new(
        resolver: RecipientResolver,
        composer: MessageComposer,
        planner: BatchPlanner,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            resolver,
            composer,
            planner,
            scheduler,
        }
    }

    pub async fn notify(&self, event: &Event) -> Result<NotifyOutcome, NotifyError> {
        self.notify_at(event, Utc::now()).await
    }

    #[instrument(skip_all, fields(kind = event.kind.as_str(), thread_id = event.thread_id))]
    pub async fn notify_at(
        &self,
        event: &Event,
        now: DateTime<Utc>,
    ) -> Result<NotifyOutcome, NotifyError> {
        let recipients = self
            .resolver
            .resolve(event)
            .await
            .map_err(NotifyError::Directory)?;
        if recipients.is_empty() {
            info!("no eligible recipients; nothing scheduled");
            return Ok(NotifyOutcome::NoRecipients);
        }

        let content = self.composer.compose(event)?;
        let headers = self.composer.headers(event);
        let jobs = self
            .planner
            .plan(event, &recipients, &content, &headers, now);

        let mut scheduled = Vec::with_capacity(jobs.len());
        for job in jobs {
            let payload = job.to_payload()?;
            let entry = ScheduledJob {
                job_id: job.job_id().unwrap_or_default().to_string(),
                due_at: job.scheduled_at,
                recipients: job.recipients.len(),
            };
            self.scheduler
                .enqueue(job.scheduled_at, payload)
                .await
                .map_err(NotifyError::Schedule)?;
            scheduled.push(entry);
        }
        info!(
            recipients = recipients.len(),
            batches = scheduled.len(),
            "notification scheduled"
        );
        Ok(NotifyOutcome::Scheduled {
            recipients: recipients.len(),
            jobs: scheduled,
        })
    }
}
