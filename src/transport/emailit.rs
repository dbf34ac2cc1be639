use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use super::model::{ApiKeyInfo, SendEmailResponse, SendingDomain, SendingDomainsResp};
use super::{AccountProbe, SendReceipt, Transport};
use crate::error::TransportError;
use crate::model::{Mailbox, NormalizedMessage};

const EMAILIT_API_BASE: &str = "https://api.emailit.com/";

/// Headers carried as structured fields of the request body instead.
const RESERVED_HEADERS: &[&str] = &[
    "from",
    "reply-to",
    "to",
    "cc",
    "bcc",
    "subject",
    "content-type",
];

#[derive(Clone)]
pub struct EmailItClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for EmailItClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailItClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl EmailItClient {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, TransportError> {
        let base_url = Url::parse(EMAILIT_API_BASE)
            .map_err(|err| TransportError::Endpoint(err.to_string()))?;
        Self::with_base_url(api_key, base_url, timeout)
    }

    pub fn with_base_url(
        api_key: String,
        base_url: Url,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let http = Client::builder()
            .user_agent(concat!("forum-mailer/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path)
            .map_err(|err| TransportError::Endpoint(format!("{path}: {err}")))
    }

    pub fn build_request(
        &self,
        message: &NormalizedMessage,
    ) -> Result<reqwest::Request, TransportError> {
        let body = build_send_request(message);
        Ok(self
            .http
            .post(self.endpoint("v1/emails")?)
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", &message.job_id)
            .json(&body)
            .build()?)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::Request,
    ) -> Result<T, TransportError> {
        debug!(method=%request.method(), url=%request.url(), "sending emailit request");
        let res = self.http.execute(request).await?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::RateLimited(body));
        }
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Rejected { status, body });
        }

        let text = res.text().await?;
        if text.trim().is_empty() {
            return serde_json::from_str("{}")
                .map_err(|err| TransportError::InvalidResponse(err.to_string()));
        }
        serde_json::from_str(&text).map_err(|err| TransportError::InvalidResponse(err.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let request = self
            .http
            .request(Method::GET, self.endpoint(path)?)
            .bearer_auth(&self.api_key)
            .build()?;
        self.execute(request).await
    }
}

#[async_trait]
impl Transport for EmailItClient {
    fn name(&self) -> &str {
        "emailit"
    }

    async fn send(&self, message: &NormalizedMessage) -> Result<SendReceipt, TransportError> {
        if message.to.is_empty() {
            return Err(TransportError::Unsupported("message has no primary recipients"));
        }
        let request = self.build_request(message)?;
        let payload: SendEmailResponse = self.execute(request).await?;
        Ok(SendReceipt {
            provider: self.name().to_string(),
            message_id: payload.id,
        })
    }

    fn account(&self) -> Option<&dyn AccountProbe> {
        Some(self)
    }
}

#[async_trait]
impl AccountProbe for EmailItClient {
    async fn sending_domains(&self) -> Result<Vec<SendingDomain>, TransportError> {
        let resp: SendingDomainsResp = self.get("v1/sending-domains").await?;
        Ok(resp.data)
    }

    async fn api_key_info(&self) -> Result<ApiKeyInfo, TransportError> {
        self.get("v1/api-keys/current").await
    }
}

fn emails(list: &[Mailbox]) -> Vec<String> {
    list.iter().map(|m| m.email.clone()).collect()
}

/// JSON body of a send call.
pub fn build_send_request(message: &NormalizedMessage) -> Value {
    let mut body = Map::new();
    body.insert("from".into(), json!(message.from.formatted()));
    body.insert("reply_to".into(), json!(message.reply_to.formatted()));
    body.insert("to".into(), json!(emails(&message.to)));
    if !message.cc.is_empty() {
        body.insert("cc".into(), json!(emails(&message.cc)));
    }
    if !message.bcc.is_empty() {
        body.insert("bcc".into(), json!(emails(&message.bcc)));
    }
    body.insert("subject".into(), json!(message.subject));
    body.insert("html".into(), json!(message.html));
    body.insert("text".into(), json!(message.text));

    let mut headers = Map::new();
    for line in &message.headers {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || RESERVED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        headers.insert(name.to_string(), json!(value.trim()));
    }
    if !headers.is_empty() {
        body.insert("headers".into(), Value::Object(headers));
    }

    if !message.metadata.is_empty() {
        body.insert("metadata".into(), Value::Object(message.metadata.clone()));
    }
    if !message.tags.is_empty() {
        body.insert("tags".into(), json!(message.tags));
    }
    Value::Object(body)
}
