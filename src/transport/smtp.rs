//! Per-recipient fallback mailer.
//!
//! The legacy contract is deliberately narrow: one address, a subject, an HTML
//! body and raw header lines in, a success flag out.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::{ContentType, HeaderName, HeaderValue};
use lettre::message::Mailbox as LettreMailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config;
use crate::model::Mailbox;
use crate::normalize::headers::{header_value, parse_mailbox};

/// Longest header line segment emitted for unbroken values.
const FOLD_WIDTH: usize = 76;

/// Headers the message builder sets itself.
const MANAGED_HEADERS: &[&str] = &[
    "from",
    "reply-to",
    "to",
    "cc",
    "bcc",
    "subject",
    "content-type",
    "content-transfer-encoding",
    "mime-version",
    "date",
    "message-id",
];

#[async_trait]
pub trait LegacyMailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str, headers: &[String]) -> bool;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    default_from: Mailbox,
}

impl SmtpMailer {
    pub fn from_settings(smtp: &config::Smtp, default_from: Mailbox) -> Result<Self> {
        let builder = if smtp.tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
                .with_context(|| format!("invalid SMTP relay {}", smtp.host))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
        };
        let builder = builder
            .port(smtp.port)
            .timeout(Some(Duration::from_secs(smtp.timeout_seconds)));
        let builder = if smtp.username.is_empty() {
            builder
        } else {
            builder.credentials(Credentials::new(
                smtp.username.clone(),
                smtp.password.clone(),
            ))
        };
        Ok(Self {
            transport: builder.build(),
            default_from,
        })
    }

    pub fn build_message(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        headers: &[String],
    ) -> Result<Message> {
        build_message(&self.default_from, to, subject, html, headers)
    }
}

#[async_trait]
impl LegacyMailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, html: &str, headers: &[String]) -> bool {
        let message = match self.build_message(to, subject, html, headers) {
            Ok(message) => message,
            Err(err) => {
                warn!(?err, to, "failed to build fallback message");
                return false;
            }
        };
        match self.transport.send(message).await {
            Ok(response) => {
                debug!(to, code = %response.code(), "fallback message accepted");
                true
            }
            Err(err) => {
                warn!(?err, to, "fallback SMTP send failed");
                false
            }
        }
    }
}

fn to_lettre(mailbox: &Mailbox) -> Result<LettreMailbox> {
    let address: Address = mailbox
        .email
        .parse()
        .with_context(|| format!("invalid address {}", mailbox.email))?;
    Ok(LettreMailbox::new(mailbox.name.clone(), address))
}

/// lettre folds only at whitespace, so long unbroken ASCII values (base64
/// bodies) are split into continuation lines here.
fn header_value_folded(name: HeaderName, value: &str) -> HeaderValue {
    if value.len() <= FOLD_WIDTH || !value.is_ascii() || value.contains(char::is_whitespace) {
        return HeaderValue::new(name, value.to_string());
    }
    let folded = value
        .as_bytes()
        .chunks(FOLD_WIDTH)
        .map(|chunk| String::from_utf8_lossy(chunk))
        .collect::<Vec<_>>()
        .join("\r\n ");
    HeaderValue::dangerous_new_pre_encoded(name, value.to_string(), folded)
}

/// Build the MIME message for one recipient. From and Reply-To come from the
/// header lines when present; other custom headers pass through verbatim.
pub fn build_message(
    default_from: &Mailbox,
    to: &str,
    subject: &str,
    html: &str,
    headers: &[String],
) -> Result<Message> {
    let from = header_value(headers, "From")
        .and_then(parse_mailbox)
        .unwrap_or_else(|| default_from.clone());
    let recipient: Address = to
        .trim()
        .parse()
        .with_context(|| format!("invalid recipient {to}"))?;

    let mut builder = Message::builder()
        .from(to_lettre(&from)?)
        .to(LettreMailbox::new(None, recipient))
        .subject(subject)
        .header(ContentType::TEXT_HTML);
    if let Some(reply_to) = header_value(headers, "Reply-To").and_then(parse_mailbox) {
        builder = builder.reply_to(to_lettre(&reply_to)?);
    }

    for line in headers {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || MANAGED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        let header = HeaderName::new_from_ascii(name.to_string())
            .with_context(|| format!("invalid header name {name}"))?;
        builder = builder.raw_header(header_value_folded(header, value.trim()));
    }

    builder
        .body(html.to_string())
        .context("failed to build fallback message")
}
