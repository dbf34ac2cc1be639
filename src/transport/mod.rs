//! Preferred transport resolution.
//!
//! A [`TransportSelector`] walks an ordered registry of [`TransportProvider`]s
//! once and caches the outcome, including "nothing available", for its whole
//! lifetime. Account facts are probed through the optional [`AccountProbe`]
//! capability and cached the same way.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config;
use crate::error::TransportError;
use crate::model::{AccountCapabilities, NormalizedMessage};

pub mod emailit;
pub mod model;
pub mod smtp;

pub use emailit::EmailItClient;
pub use model::{ApiKeyInfo, SendingDomain};
pub use smtp::{LegacyMailer, SmtpMailer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub provider: String,
    pub message_id: Option<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &NormalizedMessage) -> Result<SendReceipt, TransportError>;

    /// Account metadata capability, for transports that have one.
    fn account(&self) -> Option<&dyn AccountProbe> {
        None
    }
}

#[async_trait]
pub trait AccountProbe: Send + Sync {
    async fn sending_domains(&self) -> Result<Vec<SendingDomain>, TransportError>;

    async fn api_key_info(&self) -> Result<ApiKeyInfo, TransportError>;
}

/// Source of a ready transport. `Ok(None)` means "not configured here".
#[async_trait]
pub trait TransportProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn provide(&self) -> Result<Option<Arc<dyn Transport>>>;
}

/// An already-configured client handed over by a higher-level mail service.
pub struct FacadeProvider {
    client: Arc<dyn Transport>,
}

impl FacadeProvider {
    pub fn new(client: Arc<dyn Transport>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TransportProvider for FacadeProvider {
    fn name(&self) -> &str {
        "facade"
    }

    async fn provide(&self) -> Result<Option<Arc<dyn Transport>>> {
        Ok(Some(self.client.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeySettings {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl From<&config::Transport> for ApiKeySettings {
    fn from(cfg: &config::Transport) -> Self {
        Self {
            api_key: cfg.api_key.clone(),
            base_url: cfg.base_url.clone(),
            timeout: Duration::from_secs(cfg.timeout_seconds),
        }
    }
}

/// Builds an [`EmailItClient`] straight from the configured credential.
pub struct ApiKeyProvider {
    settings: ApiKeySettings,
}

impl ApiKeyProvider {
    pub fn new(settings: ApiKeySettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl TransportProvider for ApiKeyProvider {
    fn name(&self) -> &str {
        "api-key"
    }

    async fn provide(&self) -> Result<Option<Arc<dyn Transport>>> {
        if self.settings.api_key.trim().is_empty() {
            return Ok(None);
        }
        let base_url = reqwest::Url::parse(&self.settings.base_url)?;
        let client = EmailItClient::with_base_url(
            self.settings.api_key.clone(),
            base_url,
            self.settings.timeout,
        )?;
        Ok(Some(Arc::new(client)))
    }
}

pub struct TransportSelector {
    providers: Vec<Arc<dyn TransportProvider>>,
    handle: OnceCell<Option<Arc<dyn Transport>>>,
    account: OnceCell<AccountCapabilities>,
}

impl TransportSelector {
    /// Providers are consulted in the given order; the first transport wins.
    pub fn new(providers: Vec<Arc<dyn TransportProvider>>) -> Self {
        Self {
            providers,
            handle: OnceCell::new(),
            account: OnceCell::new(),
        }
    }

    pub fn builder() -> TransportSelectorBuilder {
        TransportSelectorBuilder::default()
    }

    /// The cached transport handle, resolving it on first use.
    pub async fn resolve(&self) -> Option<Arc<dyn Transport>> {
        self.handle
            .get_or_init(|| self.probe_providers())
            .await
            .clone()
    }

    async fn probe_providers(&self) -> Option<Arc<dyn Transport>> {
        for provider in &self.providers {
            match provider.provide().await {
                Ok(Some(transport)) => {
                    info!(
                        provider = provider.name(),
                        transport = transport.name(),
                        "resolved mail transport"
                    );
                    return Some(transport);
                }
                Ok(None) => debug!(provider = provider.name(), "provider has no transport"),
                Err(err) => warn!(?err, provider = provider.name(), "transport provider failed"),
            }
        }
        warn!("no mail transport available; deliveries will use the fallback mailer");
        None
    }

    /// Fill the account cache ahead of the first send. Never fails.
    pub async fn prime_account_cache(&self) {
        let account = self.account_capabilities().await;
        debug!(?account, "account cache primed");
    }

    pub async fn account_capabilities(&self) -> AccountCapabilities {
        self.account
            .get_or_init(|| async {
                match self.resolve().await {
                    Some(transport) => probe_account(transport.as_ref()).await,
                    None => AccountCapabilities::default(),
                }
            })
            .await
            .clone()
    }
}

async fn probe_account(transport: &dyn Transport) -> AccountCapabilities {
    let mut account = AccountCapabilities::default();
    let Some(probe) = transport.account() else {
        return account;
    };
    match probe.sending_domains().await {
        Ok(domains) => {
            account.has_verified_domain = Some(domains.iter().any(|d| d.verified));
            account.domains_available = Some(domains.into_iter().map(|d| d.name).collect());
        }
        Err(err) => warn!(?err, transport = transport.name(), "failed to probe sending domains"),
    }
    match probe.api_key_info().await {
        Ok(info) => account.api_key_label = info.label,
        Err(err) => warn!(?err, transport = transport.name(), "failed to probe api key"),
    }
    account
}

/// Registry in resolution order: facade, registered hooks, API credential.
#[derive(Default)]
pub struct TransportSelectorBuilder {
    facade: Option<Arc<dyn TransportProvider>>,
    hooks: Vec<Arc<dyn TransportProvider>>,
    api_key: Option<Arc<dyn TransportProvider>>,
}

impl TransportSelectorBuilder {
    pub fn with_facade(mut self, client: Arc<dyn Transport>) -> Self {
        self.facade = Some(Arc::new(FacadeProvider::new(client)));
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn TransportProvider>) -> Self {
        self.hooks.push(provider);
        self
    }

    pub fn with_api_key(mut self, settings: ApiKeySettings) -> Self {
        self.api_key = Some(Arc::new(ApiKeyProvider::new(settings)));
        self
    }

    pub fn build(self) -> TransportSelector {
        let providers = self
            .facade
            .into_iter()
            .chain(self.hooks)
            .chain(self.api_key)
            .collect();
        TransportSelector::new(providers)
    }
}
