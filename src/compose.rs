//! Per-event message content: subject, HTML and plain-text bodies, default headers.

use anyhow::{Context, Result};
use minijinja::Environment;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

use crate::error::NotifyError;
use crate::model::{Event, EventKind, MessageContent};
use crate::site::SiteProfile;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

/// Everything a template may reference.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TemplateData {
    pub kind: &'static str,
    pub site_name: String,
    pub logo_url: Option<String>,
    pub forum_title: String,
    pub thread_title: String,
    pub author_name: String,
    pub body: String,
    pub permalink: String,
}

pub trait TemplateRenderer: Send + Sync {
    fn render_html(&self, data: &TemplateData) -> Result<String>;

    fn render_text(&self, data: &TemplateData) -> Result<String>;
}

const LAYOUT_HTML: &str = r#"<!DOCTYPE html>
<html>
<body style="font-family: sans-serif; color: #222;">
{% if logo_url %}<p><img src="{{ logo_url }}" alt="{{ site_name }}" style="max-height: 48px;"></p>
{% endif %}{% block content %}{% endblock %}
<hr>
<p style="font-size: 12px; color: #777;">You are receiving this because you subscribed to updates on {{ site_name }}.</p>
</body>
</html>
"#;

const NEW_TOPIC_HTML: &str = r#"{% extends "layout.html" %}{% block content %}<h2>{{ thread_title }}</h2>
<p><strong>{{ author_name }}</strong> started a new topic in <em>{{ forum_title }}</em>:</p>
<div>{{ body|safe }}</div>
<p><a href="{{ permalink }}">Read the topic</a></p>
{% endblock %}"#;

const NEW_REPLY_HTML: &str = r#"{% extends "layout.html" %}{% block content %}<h2>{{ thread_title }}</h2>
<p><strong>{{ author_name }}</strong> replied in <em>{{ forum_title }}</em>:</p>
<div>{{ body|safe }}</div>
<p><a href="{{ permalink }}">Read the reply</a></p>
{% endblock %}"#;

const NEW_TOPIC_TXT: &str = "{{ author_name }} started a new topic in {{ forum_title }}: {{ thread_title }}

{{ body|strip_tags }}

Read the topic: {{ permalink }}

You are receiving this because you subscribed to updates on {{ site_name }}.
";

const NEW_REPLY_TXT: &str = "{{ author_name }} replied to {{ thread_title }} in {{ forum_title }}

{{ body|strip_tags }}

Read the reply: {{ permalink }}

You are receiving this because you subscribed to updates on {{ site_name }}.
";

fn strip_tags(value: String) -> String {
    decode_entities(TAG_RE.replace_all(&value, "").trim())
}

/// Built-in minijinja templates. `.html` templates auto-escape; the post
/// body is trusted markup.
pub struct BuiltinTemplates {
    env: Environment<'static>,
}

impl BuiltinTemplates {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_filter("strip_tags", strip_tags);
        for (name, source) in [
            ("layout.html", LAYOUT_HTML),
            ("new_topic.html", NEW_TOPIC_HTML),
            ("new_reply.html", NEW_REPLY_HTML),
            ("new_topic.txt", NEW_TOPIC_TXT),
            ("new_reply.txt", NEW_REPLY_TXT),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("invalid template {name}"))?;
        }
        Ok(Self { env })
    }

    fn render(&self, name: &str, data: &TemplateData) -> Result<String> {
        self.env
            .get_template(name)
            .and_then(|tmpl| tmpl.render(data))
            .with_context(|| format!("failed to render {name}"))
    }
}

impl TemplateRenderer for BuiltinTemplates {
    fn render_html(&self, data: &TemplateData) -> Result<String> {
        self.render(&format!("{}.html", data.kind), data)
    }

    fn render_text(&self, data: &TemplateData) -> Result<String> {
        self.render(&format!("{}.txt", data.kind), data)
    }
}

pub struct MessageComposer {
    renderer: Arc<dyn TemplateRenderer>,
    site: SiteProfile,
}

impl MessageComposer {
    pub fn new(renderer: Arc<dyn TemplateRenderer>, site: SiteProfile) -> Self {
        Self { renderer, site }
    }

    #[instrument(skip_all, fields(kind = event.kind.as_str()))]
    pub fn compose(&self, event: &Event) -> Result<MessageContent, NotifyError> {
        let data = self.template_data(event);
        let html = self
            .renderer
            .render_html(&data)
            .map_err(NotifyError::Render)?;
        let text = self
            .renderer
            .render_text(&data)
            .map_err(NotifyError::Render)?;
        Ok(MessageContent {
            subject: subject(event),
            html,
            text,
        })
    }

    pub fn template_data(&self, event: &Event) -> TemplateData {
        TemplateData {
            kind: event.kind.as_str(),
            site_name: self.site.name.clone(),
            logo_url: self.site.logo_url.clone(),
            forum_title: event.forum_title.clone(),
            thread_title: event.thread_title.clone(),
            author_name: event.author_name.clone(),
            body: event.body.clone(),
            permalink: event.permalink.clone(),
        }
    }

    /// Default header block shared by every batch of an event.
    pub fn headers(&self, event: &Event) -> Vec<String> {
        vec![
            "Content-Type: text/html; charset=UTF-8".to_string(),
            format!("X-Forum-Mailer: {}", event.kind.as_str()),
            format!("From: {}", self.site.sender().formatted()),
        ]
    }
}

pub fn subject(event: &Event) -> String {
    let forum = decode_entities(&event.forum_title);
    match event.kind {
        EventKind::NewTopic => format!("[{forum}] New Topic: {}", event.thread_title),
        EventKind::NewReply => format!("[{forum}] {}", event.thread_title),
    }
}

/// Decodes the entities HTML escaping produces for titles.
pub fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}
