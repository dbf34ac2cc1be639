//! Builds the pipeline from a loaded [`Config`].

use anyhow::Result;
use std::sync::Arc;

use crate::compose::{BuiltinTemplates, MessageComposer};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::normalize::PayloadNormalizer;
use crate::notifier::Notifier;
use crate::planner::{BatchPlanner, PlannerSettings, StaticPolicy};
use crate::recipients::{ForumDirectory, RecipientResolver};
use crate::scheduler::Scheduler;
use crate::site::SiteProfile;
use crate::transport::{ApiKeySettings, SmtpMailer, TransportSelector};

pub fn build_selector(cfg: &Config) -> TransportSelector {
    TransportSelector::builder()
        .with_api_key(ApiKeySettings::from(&cfg.transport))
        .build()
}

pub fn build_dispatcher(cfg: &Config) -> Result<Dispatcher> {
    let site = SiteProfile::from_config(&cfg.site);
    let fallback = SmtpMailer::from_settings(&cfg.smtp, site.sender())?;
    Ok(Dispatcher::new(
        PayloadNormalizer::new(Arc::new(site)),
        Arc::new(build_selector(cfg)),
        Arc::new(fallback),
    ))
}

pub fn build_notifier(
    cfg: &Config,
    directory: Arc<dyn ForumDirectory>,
    scheduler: Arc<dyn Scheduler>,
) -> Result<Notifier> {
    let site = SiteProfile::from_config(&cfg.site);
    let composer = MessageComposer::new(Arc::new(BuiltinTemplates::new()?), site);
    let planner = BatchPlanner::new(
        PlannerSettings::from(&cfg.batching),
        Arc::new(StaticPolicy::from(&cfg.policy)),
    );
    Ok(Notifier::new(
        RecipientResolver::new(directory),
        composer,
        planner,
        scheduler,
    ))
}
