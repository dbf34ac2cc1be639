use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};

use crate::normalize::address::{clean_address, clean_email_list};

/// Context key carrying the idempotency token of a batch job.
pub const JOB_ID_KEY: &str = "job_id";

pub type UserId = u64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewTopic,
    NewReply,
}

impl EventKind {
    /// Scenario tag handed to policies and stamped on jobs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewTopic => "new_topic",
            EventKind::NewReply => "new_reply",
        }
    }
}

/// Discussion activity raised by the forum platform. Read-only to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub actor_id: UserId,
    pub thread_id: u64,
    pub forum_id: u64,
    #[serde(default)]
    pub reply_id: Option<u64>,
    pub author_name: String,
    pub thread_title: String,
    pub forum_title: String,
    #[serde(default)]
    pub body: String,
    pub permalink: String,
}

/// Insertion-ordered set of cleaned addresses. Equality of addresses is
/// case-insensitive; the first spelling seen is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientSet {
    addresses: Vec<String>,
    seen: HashSet<String>,
}

impl RecipientSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cleans `raw` and adds it. Returns false for malformed or already
    /// present addresses.
    pub fn insert(&mut self, raw: &str) -> bool {
        let Some(address) = clean_address(raw) else {
            return false;
        };
        if !self.seen.insert(address.to_ascii_lowercase()) {
            return false;
        }
        self.addresses.push(address);
        true
    }

    pub fn contains(&self, address: &str) -> bool {
        self.seen.contains(&address.trim().to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.addresses.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.addresses
    }
}

impl<S: AsRef<str>> FromIterator<S> for RecipientSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = RecipientSet::new();
        for raw in iter {
            set.insert(raw.as_ref());
        }
        set
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageContent {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// One scheduled unit of work. Serialized as the scheduler payload and read
/// back by the dispatcher as a [`RawJob`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchJob {
    #[serde(rename = "to")]
    pub recipients: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
    pub headers: Vec<String>,
    pub metadata: Map<String, Value>,
    pub tags: BTreeSet<String>,
    pub context: Map<String, Value>,
    pub scheduled_at: DateTime<Utc>,
}

impl BatchJob {
    pub fn job_id(&self) -> Option<&str> {
        self.context.get(JOB_ID_KEY).and_then(Value::as_str)
    }

    pub fn to_payload(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Address field as it may arrive in a payload: a list, or a single string
/// that can itself hold several delimited addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddressInput {
    List(Vec<String>),
    Text(String),
}

impl AddressInput {
    pub fn clean(&self) -> Vec<String> {
        match self {
            AddressInput::List(items) => clean_email_list(items),
            AddressInput::Text(text) => clean_email_list([text]),
        }
    }
}

impl From<Vec<String>> for AddressInput {
    fn from(items: Vec<String>) -> Self {
        AddressInput::List(items)
    }
}

impl From<&str> for AddressInput {
    fn from(text: &str) -> Self {
        AddressInput::Text(text.to_string())
    }
}

/// Header field as it may arrive in a payload: a raw multi-line block or a
/// list of lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderInput {
    Lines(Vec<String>),
    Block(String),
}

/// Lenient wire form accepted by the dispatcher. Also understands the older
/// `batch` / `message` / `text_message` field names.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawJob {
    #[serde(default, alias = "recipients", alias = "batch")]
    pub to: Option<AddressInput>,
    #[serde(default)]
    pub cc: Option<AddressInput>,
    #[serde(default)]
    pub bcc: Option<AddressInput>,
    #[serde(default)]
    pub subject: String,
    #[serde(default, alias = "message")]
    pub html: String,
    #[serde(default, alias = "text_message")]
    pub text: String,
    #[serde(default)]
    pub headers: Option<HeaderInput>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub context: Option<Map<String, Value>>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl RawJob {
    /// Decodes a scheduled payload. Only JSON objects are accepted.
    pub fn from_payload(payload: &Value) -> Result<Self, serde_json::Error> {
        if !payload.is_object() {
            return Err(serde::de::Error::custom("batch job payload must be a JSON object"));
        }
        RawJob::deserialize(payload)
    }
}

impl From<BatchJob> for RawJob {
    fn from(job: BatchJob) -> Self {
        RawJob {
            to: Some(AddressInput::List(job.recipients)),
            cc: Some(AddressInput::List(job.cc)),
            bcc: Some(AddressInput::List(job.bcc)),
            subject: job.subject,
            html: job.html,
            text: job.text,
            headers: Some(HeaderInput::Lines(job.headers)),
            metadata: Some(job.metadata),
            tags: Some(job.tags.into_iter().collect()),
            context: Some(job.context),
            scheduled_at: Some(job.scheduled_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Mailbox {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    pub fn named(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: Some(name.into()),
        }
    }

    /// `Name <email>` when a name is known, bare email otherwise.
    pub fn formatted(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => format!("{} <{}>", name, self.email),
            _ => self.email.clone(),
        }
    }
}

/// Account-level facts discovered from the preferred transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountCapabilities {
    pub domains_available: Option<Vec<String>>,
    pub has_verified_domain: Option<bool>,
    pub api_key_label: Option<String>,
}

/// Transport-ready message. Built once by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedMessage {
    pub from: Mailbox,
    pub reply_to: Mailbox,
    pub to: Vec<Mailbox>,
    pub cc: Vec<Mailbox>,
    pub bcc: Vec<Mailbox>,
    pub subject: String,
    pub html: String,
    pub text: String,
    pub headers: Vec<String>,
    pub metadata: Map<String, Value>,
    pub tags: Vec<String>,
    pub context: Map<String, Value>,
    pub job_id: String,
}

impl NormalizedMessage {
    pub fn to_addresses(&self) -> impl Iterator<Item = &str> {
        self.to.iter().map(|m| m.email.as_str())
    }

    /// Returns a copy whose metadata carries the known account facts. Keys
    /// already present in the metadata win.
    pub fn with_account(self, account: &AccountCapabilities) -> Self {
        let mut metadata = self.metadata;
        if let Some(domains) = &account.domains_available {
            metadata
                .entry("sending_domains")
                .or_insert_with(|| Value::from(domains.clone()));
        }
        if let Some(verified) = account.has_verified_domain {
            metadata
                .entry("has_verified_domain")
                .or_insert(Value::Bool(verified));
        }
        if let Some(label) = &account.api_key_label {
            metadata
                .entry("api_key_label")
                .or_insert_with(|| Value::String(label.clone()));
        }
        Self { metadata, ..self }
    }
}
