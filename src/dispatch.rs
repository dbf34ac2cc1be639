//! Batch job delivery: preferred transport first, per-recipient fallback after.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{DispatchError, TransportError};
use crate::model::{NormalizedMessage, RawJob};
use crate::normalize::PayloadNormalizer;
use crate::transport::{LegacyMailer, SendReceipt, TransportSelector};

/// Header carrying the base64 plain-text body on the fallback path.
pub const TEXT_BODY_HEADER: &str = "X-Text-Body-Base64";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    TransportUnavailable,
    TransportSendFailed(String),
    Unsupported(String),
}

impl From<&TransportError> for FallbackReason {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::Unsupported(what) => FallbackReason::Unsupported((*what).to_string()),
            other => FallbackReason::TransportSendFailed(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    NothingToSend {
        job_id: String,
    },
    SentViaPrimary {
        job_id: String,
        receipt: SendReceipt,
    },
    /// `attempted` is the number of legacy calls, `accepted` how many returned true.
    SentViaFallback {
        job_id: String,
        reason: FallbackReason,
        attempted: usize,
        accepted: usize,
    },
}

impl DispatchOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            DispatchOutcome::NothingToSend { job_id }
            | DispatchOutcome::SentViaPrimary { job_id, .. }
            | DispatchOutcome::SentViaFallback { job_id, .. } => job_id,
        }
    }
}

pub struct Dispatcher {
    normalizer: PayloadNormalizer,
    selector: Arc<TransportSelector>,
    fallback: Arc<dyn LegacyMailer>,
}

impl Dispatcher {
    pub fn new(
        normalizer: PayloadNormalizer,
        selector: Arc<TransportSelector>,
        fallback: Arc<dyn LegacyMailer>,
    ) -> Self {
        Self {
            normalizer,
            selector,
            fallback,
        }
    }

    pub fn selector(&self) -> &TransportSelector {
        &self.selector
    }

    /// Entry point for a scheduled payload. Only an undecodable payload errors;
    /// transport failures end in the fallback path.
    pub async fn handle(&self, payload: &Value) -> Result<DispatchOutcome, DispatchError> {
        let raw = RawJob::from_payload(payload)?;
        Ok(self.handle_job(raw).await)
    }

    #[instrument(skip_all)]
    pub async fn handle_job(&self, raw: RawJob) -> DispatchOutcome {
        let message = self.normalizer.normalize(raw);
        let job_id = message.job_id.clone();
        if message.to.is_empty() {
            info!(job_id, "batch job has no valid recipients; nothing to send");
            return DispatchOutcome::NothingToSend { job_id };
        }

        let Some(transport) = self.selector.resolve().await else {
            return self
                .send_fallback(&message, FallbackReason::TransportUnavailable)
                .await;
        };

        let account = self.selector.account_capabilities().await;
        let message = message.with_account(&account);
        match transport.send(&message).await {
            Ok(receipt) => {
                info!(
                    job_id,
                    provider = %receipt.provider,
                    message_id = receipt.message_id.as_deref().unwrap_or("-"),
                    recipients = message.to.len(),
                    "batch delivered"
                );
                DispatchOutcome::SentViaPrimary { job_id, receipt }
            }
            Err(err) => {
                warn!(?err, job_id, transport = transport.name(), "primary send failed; falling back");
                self.send_fallback(&message, FallbackReason::from(&err)).await
            }
        }
    }

    async fn send_fallback(
        &self,
        message: &NormalizedMessage,
        reason: FallbackReason,
    ) -> DispatchOutcome {
        let headers = fallback_headers(message);
        if !message.cc.is_empty() || !message.bcc.is_empty() {
            debug!(
                job_id = %message.job_id,
                cc = message.cc.len(),
                bcc = message.bcc.len(),
                "fallback delivers primary recipients only"
            );
        }

        let mut attempted = 0;
        let mut accepted = 0;
        for to in message.to_addresses() {
            attempted += 1;
            if self
                .fallback
                .send(to, &message.subject, &message.html, &headers)
                .await
            {
                accepted += 1;
            } else {
                warn!(job_id = %message.job_id, to, "fallback send rejected");
            }
        }
        info!(job_id = %message.job_id, ?reason, attempted, accepted, "batch delivered via fallback");
        DispatchOutcome::SentViaFallback {
            job_id: message.job_id.clone(),
            reason,
            attempted,
            accepted,
        }
    }
}

/// Original header lines plus the base64 plain-text body.
pub fn fallback_headers(message: &NormalizedMessage) -> Vec<String> {
    let mut headers = message.headers.clone();
    headers.push(format!("{TEXT_BODY_HEADER}: {}", STANDARD.encode(&message.text)));
    headers
}
