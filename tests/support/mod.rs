#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use forum_mailer::compose::{BuiltinTemplates, MessageComposer};
use forum_mailer::dispatch::Dispatcher;
use forum_mailer::error::TransportError;
use forum_mailer::model::{Event, EventKind, NormalizedMessage};
use forum_mailer::normalize::PayloadNormalizer;
use forum_mailer::notifier::Notifier;
use forum_mailer::planner::{BatchPlanner, NoExtraRecipients, PlannerSettings, RecipientPolicy};
use forum_mailer::recipients::{ForumDirectory, RecipientResolver};
use forum_mailer::scheduler::Scheduler;
use forum_mailer::site::SiteProfile;
use forum_mailer::transport::{
    AccountProbe, ApiKeyInfo, LegacyMailer, SendReceipt, SendingDomain, Transport,
    TransportProvider, TransportSelector,
};

pub fn site() -> SiteProfile {
    SiteProfile {
        name: "Example Forum".into(),
        home_url: "https://forum.example.com".into(),
        from_email: None,
        logo_url: None,
    }
}

pub fn event(kind: EventKind, actor_id: u64) -> Event {
    Event {
        kind,
        actor_id,
        thread_id: 100,
        forum_id: 10,
        reply_id: match kind {
            EventKind::NewTopic => None,
            EventKind::NewReply => Some(555),
        },
        author_name: "Ann".into(),
        thread_title: "Welcome".into(),
        forum_title: "General".into(),
        body: "<p>Hello everyone</p>".into(),
        permalink: "https://forum.example.com/t/100".into(),
    }
}

#[derive(Clone, Default)]
pub struct RecordingScheduler {
    pub calls: Arc<Mutex<Vec<(DateTime<Utc>, Value)>>>,
}

impl RecordingScheduler {
    pub async fn calls(&self) -> Vec<(DateTime<Utc>, Value)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn enqueue(&self, due_at: DateTime<Utc>, payload: Value) -> Result<()> {
        self.calls.lock().await.push((due_at, payload));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyCall {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub headers: Vec<String>,
}

#[derive(Clone)]
pub struct RecordingMailer {
    pub calls: Arc<Mutex<Vec<LegacyCall>>>,
    pub accept: bool,
}

impl RecordingMailer {
    pub fn accepting() -> Self {
        Self {
            calls: Arc::default(),
            accept: true,
        }
    }

    pub fn rejecting() -> Self {
        Self {
            calls: Arc::default(),
            accept: false,
        }
    }

    pub async fn calls(&self) -> Vec<LegacyCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl LegacyMailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, html: &str, headers: &[String]) -> bool {
        self.calls.lock().await.push(LegacyCall {
            to: to.into(),
            subject: subject.into(),
            html: html.into(),
            headers: headers.to_vec(),
        });
        self.accept
    }
}

/// Transport that records messages and answers with a scripted result.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    pub sent: Arc<Mutex<Vec<NormalizedMessage>>>,
    pub fail_with: Option<&'static str>,
    pub account: Option<FakeAccount>,
}

impl RecordingTransport {
    pub fn failing(reason: &'static str) -> Self {
        Self {
            fail_with: Some(reason),
            ..Default::default()
        }
    }

    pub fn with_account(account: FakeAccount) -> Self {
        Self {
            account: Some(account),
            ..Default::default()
        }
    }

    pub async fn sent(&self) -> Vec<NormalizedMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: &NormalizedMessage) -> Result<SendReceipt, TransportError> {
        self.sent.lock().await.push(message.clone());
        match self.fail_with {
            Some(reason) => Err(TransportError::Other(anyhow!(reason))),
            None => Ok(SendReceipt {
                provider: "recording".into(),
                message_id: Some(format!("msg-{}", message.job_id)),
            }),
        }
    }

    fn account(&self) -> Option<&dyn AccountProbe> {
        self.account.as_ref().map(|a| a as &dyn AccountProbe)
    }
}

#[derive(Clone, Default)]
pub struct FakeAccount {
    pub domains: Vec<SendingDomain>,
    pub label: Option<String>,
    pub broken: bool,
    pub probes: Arc<AtomicUsize>,
}

#[async_trait]
impl AccountProbe for FakeAccount {
    async fn sending_domains(&self) -> Result<Vec<SendingDomain>, TransportError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(TransportError::Rejected {
                status: 500,
                body: "boom".into(),
            });
        }
        Ok(self.domains.clone())
    }

    async fn api_key_info(&self) -> Result<ApiKeyInfo, TransportError> {
        if self.broken {
            return Err(TransportError::InvalidResponse("garbage".into()));
        }
        Ok(ApiKeyInfo {
            label: self.label.clone(),
        })
    }
}

/// Provider hook counting how often it is consulted.
pub struct CountingProvider {
    pub calls: AtomicUsize,
    pub transport: Option<Arc<dyn Transport>>,
}

impl CountingProvider {
    pub fn new(transport: Option<Arc<dyn Transport>>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            transport,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportProvider for CountingProvider {
    fn name(&self) -> &str {
        "counting"
    }

    async fn provide(&self) -> Result<Option<Arc<dyn Transport>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.transport.clone())
    }
}

pub fn dispatcher(selector: TransportSelector, mailer: RecordingMailer) -> Dispatcher {
    Dispatcher::new(
        PayloadNormalizer::new(Arc::new(site())),
        Arc::new(selector),
        Arc::new(mailer),
    )
}

pub fn notifier(
    directory: Arc<dyn ForumDirectory>,
    settings: PlannerSettings,
    policy: Option<Arc<dyn RecipientPolicy>>,
    scheduler: Arc<dyn Scheduler>,
) -> Notifier {
    let composer = MessageComposer::new(Arc::new(BuiltinTemplates::new().unwrap()), site());
    let policy = policy.unwrap_or_else(|| Arc::new(NoExtraRecipients));
    Notifier::new(
        RecipientResolver::new(directory),
        composer,
        BatchPlanner::new(settings, policy),
        scheduler,
    )
}
