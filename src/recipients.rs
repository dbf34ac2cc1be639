use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::model::{Event, EventKind, RecipientSet, UserId};

/// Read-only view of the forum's subscription data.
#[async_trait]
pub trait ForumDirectory: Send + Sync {
    async fn forum_subscribers(&self, forum_id: u64) -> Result<Vec<UserId>>;

    async fn thread_subscribers(&self, thread_id: u64) -> Result<Vec<UserId>>;

    async fn email_of(&self, user_id: UserId) -> Result<Option<String>>;
}

pub struct RecipientResolver {
    directory: Arc<dyn ForumDirectory>,
}

impl RecipientResolver {
    pub fn new(directory: Arc<dyn ForumDirectory>) -> Self {
        Self { directory }
    }

    /// Subscribers of the forum (new topic) or thread (new reply), minus the
    /// actor. Users without a usable address are skipped.
    #[instrument(skip_all, fields(kind = event.kind.as_str()))]
    pub async fn resolve(&self, event: &Event) -> Result<RecipientSet> {
        let subscribers = match event.kind {
            EventKind::NewTopic => self.directory.forum_subscribers(event.forum_id).await?,
            EventKind::NewReply => self.directory.thread_subscribers(event.thread_id).await?,
        };

        let actor_email = match self.directory.email_of(event.actor_id).await {
            Ok(email) => email.as_deref().and_then(crate::normalize::address::clean_address),
            Err(err) => {
                warn!(?err, actor = event.actor_id, "failed to look up actor address");
                None
            }
        };

        let mut recipients = RecipientSet::new();
        for user_id in subscribers {
            if user_id == event.actor_id {
                continue;
            }
            let email = match self.directory.email_of(user_id).await {
                Ok(Some(email)) => email,
                Ok(None) => {
                    debug!(user_id, "subscriber has no address");
                    continue;
                }
                Err(err) => {
                    warn!(?err, user_id, "failed to look up subscriber address");
                    continue;
                }
            };
            if let Some(actor) = actor_email.as_deref() {
                if email.trim().eq_ignore_ascii_case(actor) {
                    continue;
                }
            }
            if !recipients.insert(&email) {
                debug!(user_id, "skipping invalid or duplicate address");
            }
        }
        debug!(count = recipients.len(), "resolved recipients");
        Ok(recipients)
    }
}
