//! Payload normalization: turns a raw batch job into a [`NormalizedMessage`].
//!
//! Every step is a pure function over the job. The only outside input is the
//! site identity used when headers carry no usable `From:`, and it is injected
//! through [`SiteIdentity`].

pub mod address;
pub mod headers;

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::model::{AddressInput, Mailbox, NormalizedMessage, RawJob, JOB_ID_KEY};
use address::enforce_disjoint;
use headers::{header_value, normalize_headers, parse_mailbox};

/// Site-wide sender identity.
pub trait SiteIdentity: Send + Sync {
    fn default_from_name(&self) -> String;
    fn default_from_email(&self) -> String;
}

#[derive(Clone)]
pub struct PayloadNormalizer {
    site: Arc<dyn SiteIdentity>,
}

impl PayloadNormalizer {
    pub fn new(site: Arc<dyn SiteIdentity>) -> Self {
        Self { site }
    }

    pub fn normalize(&self, raw: RawJob) -> NormalizedMessage {
        let to = clean_input(raw.to.as_ref());
        let (cc, bcc) = enforce_disjoint(
            &to,
            clean_input(raw.cc.as_ref()),
            clean_input(raw.bcc.as_ref()),
        );
        let headers = normalize_headers(raw.headers.as_ref());
        let (from, reply_to) = self.identities(&headers);

        let mut context = raw.context.unwrap_or_default();
        let job_id = ensure_job_id(&mut context);

        NormalizedMessage {
            from,
            reply_to,
            to: to.into_iter().map(Mailbox::new).collect(),
            cc: cc.into_iter().map(Mailbox::new).collect(),
            bcc: bcc.into_iter().map(Mailbox::new).collect(),
            subject: raw.subject,
            html: raw.html,
            text: raw.text,
            headers,
            metadata: raw.metadata.unwrap_or_default(),
            tags: clean_tags(raw.tags.unwrap_or_default()),
            context,
            job_id,
        }
    }

    /// `From:`/`Reply-To:` from the headers, falling back to the site identity.
    fn identities(&self, headers: &[String]) -> (Mailbox, Mailbox) {
        let from = match header_value(headers, "From").and_then(parse_mailbox) {
            Some(mut mailbox) => {
                if mailbox.name.is_none() {
                    mailbox.name = Some(self.site.default_from_name());
                }
                mailbox
            }
            None => {
                debug!("no usable From header; using site identity");
                Mailbox::named(self.site.default_from_email(), self.site.default_from_name())
            }
        };
        let reply_to = match header_value(headers, "Reply-To").and_then(parse_mailbox) {
            Some(mut mailbox) => {
                if mailbox.name.is_none() {
                    mailbox.name = from.name.clone();
                }
                mailbox
            }
            None => from.clone(),
        };
        (from, reply_to)
    }
}

fn clean_input(input: Option<&AddressInput>) -> Vec<String> {
    input.map(AddressInput::clean).unwrap_or_default()
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

/// Returns the job id held in `context`, assigning a fresh one when it is
/// missing, null or blank. An existing id is left untouched.
pub fn ensure_job_id(context: &mut Map<String, Value>) -> String {
    match context.get(JOB_ID_KEY) {
        Some(Value::String(id)) if !id.trim().is_empty() => return id.clone(),
        Some(Value::Number(n)) => return n.to_string(),
        _ => {}
    }
    let id = new_job_id();
    context.insert(JOB_ID_KEY.to_string(), Value::String(id.clone()));
    id
}

pub fn new_job_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HeaderInput;
    use serde_json::json;

    struct FixedSite;

    impl SiteIdentity for FixedSite {
        fn default_from_name(&self) -> String {
            "Default Site".into()
        }
        fn default_from_email(&self) -> String {
            "noreply@site.example".into()
        }
    }

    fn normalizer() -> PayloadNormalizer {
        PayloadNormalizer::new(Arc::new(FixedSite))
    }

    #[test]
    fn derives_identities_from_header_block() {
        let raw = RawJob {
            to: Some("x@y.com".into()),
            headers: Some(HeaderInput::Block("From: Site <a@b.com>\nReply-To: c@d.com".into())),
            ..Default::default()
        };
        let message = normalizer().normalize(raw);
        assert_eq!(message.from, Mailbox::named("a@b.com", "Site"));
        assert_eq!(message.reply_to, Mailbox::named("c@d.com", "Site"));
    }

    #[test]
    fn falls_back_to_site_identity() {
        let raw = RawJob {
            headers: Some(HeaderInput::Lines(vec!["From: garbage".into()])),
            ..Default::default()
        };
        let message = normalizer().normalize(raw);
        let expected = Mailbox::named("noreply@site.example", "Default Site");
        assert_eq!(message.from, expected);
        assert_eq!(message.reply_to, expected);
    }

    #[test]
    fn bare_from_takes_site_name() {
        let raw = RawJob {
            headers: Some(HeaderInput::Lines(vec!["From: ops@b.com".into()])),
            ..Default::default()
        };
        let message = normalizer().normalize(raw);
        assert_eq!(message.from, Mailbox::named("ops@b.com", "Default Site"));
    }

    #[test]
    fn defaults_absent_containers() {
        let message = normalizer().normalize(RawJob::default());
        assert!(message.to.is_empty());
        assert!(message.metadata.is_empty());
        assert!(message.tags.is_empty());
        assert!(message.headers.is_empty());
        assert!(!message.job_id.is_empty());
        assert_eq!(message.context[JOB_ID_KEY], json!(message.job_id));
    }

    #[test]
    fn preserves_existing_job_id() {
        let mut context = Map::new();
        context.insert(JOB_ID_KEY.into(), json!("job-42"));
        let raw = RawJob {
            context: Some(context),
            ..Default::default()
        };
        let message = normalizer().normalize(raw);
        assert_eq!(message.job_id, "job-42");
        assert_eq!(message.context[JOB_ID_KEY], "job-42");
    }

    #[test]
    fn blank_job_id_is_replaced() {
        let mut context = Map::new();
        context.insert(JOB_ID_KEY.into(), json!("  "));
        let id = ensure_job_id(&mut context);
        assert_eq!(id.len(), 32);
        assert_eq!(context[JOB_ID_KEY], json!(id));
    }

    #[test]
    fn fresh_job_ids_differ() {
        let a = normalizer().normalize(RawJob::default()).job_id;
        let b = normalizer().normalize(RawJob::default()).job_id;
        assert_ne!(a, b);
    }

    fn emails(list: &[Mailbox]) -> Vec<String> {
        list.iter().map(|m| m.email.clone()).collect()
    }

    #[test]
    fn cleans_and_separates_recipient_lists() {
        let raw = RawJob {
            to: Some("a@x.com; B@X.com, junk".into()),
            cc: Some(AddressInput::List(vec!["b@x.com".into(), "c@x.com".into()])),
            bcc: Some("c@x.com, a@x.com, d@x.com".into()),
            tags: Some(vec!["forum".into(), " forum ".into(), "".into(), "reply".into()]),
            ..Default::default()
        };
        let message = normalizer().normalize(raw);
        assert_eq!(emails(&message.to), ["a@x.com", "B@x.com"]);
        assert_eq!(emails(&message.cc), ["c@x.com"]);
        assert_eq!(emails(&message.bcc), ["d@x.com"]);
        assert_eq!(message.tags, ["forum", "reply"]);
    }
}
