use thiserror::Error;

/// Failure of the preferred transport. Every variant leads to the fallback
/// path; none of them reaches the triggering event.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport cannot send: {0}")]
    Unsupported(&'static str),
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("rate limited by provider: {0}")]
    RateLimited(String),
    #[error("provider error {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed job payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("subscriber lookup failed: {0:#}")]
    Directory(anyhow::Error),
    #[error("template rendering failed: {0:#}")]
    Render(anyhow::Error),
    #[error("failed to encode batch job: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to schedule batch job: {0:#}")]
    Schedule(anyhow::Error),
}
