mod support;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use forum_mailer::dispatch::{DispatchOutcome, FallbackReason};
use forum_mailer::error::DispatchError;
use forum_mailer::model::Mailbox;
use forum_mailer::transport::{SendingDomain, TransportSelector};
use support::{CountingProvider, FakeAccount, RecordingMailer, RecordingTransport};

fn job() -> serde_json::Value {
    json!({
        "to": ["a@example.com", "B@Example.COM", "a@example.com", "junk"],
        "cc": "c@example.com; a@example.com",
        "bcc": ["d@example.com", "c@example.com"],
        "subject": "[General] Welcome",
        "html": "<p>Hi</p>",
        "text": "Hi",
        "headers": "Content-Type: text/html; charset=UTF-8\nX-Forum-Mailer: new_reply\nFrom: Board <board@example.com>",
        "metadata": {"forum_id": 10},
        "tags": ["forum-notification"],
        "context": {"job_id": "job-42"}
    })
}

fn emails(list: &[Mailbox]) -> Vec<String> {
    list.iter().map(|m| m.email.clone()).collect()
}

fn selector_with(transport: RecordingTransport) -> TransportSelector {
    TransportSelector::builder()
        .with_facade(Arc::new(transport))
        .build()
}

#[tokio::test]
async fn primary_failure_falls_back_per_primary_recipient() {
    let transport = RecordingTransport::failing("provider down");
    let mailer = RecordingMailer::accepting();
    let dispatcher = support::dispatcher(selector_with(transport.clone()), mailer.clone());

    let outcome = dispatcher.handle(&job()).await.unwrap();
    match outcome {
        DispatchOutcome::SentViaFallback {
            job_id,
            reason: FallbackReason::TransportSendFailed(cause),
            attempted,
            accepted,
        } => {
            assert_eq!(job_id, "job-42");
            assert!(cause.contains("provider down"));
            assert_eq!((attempted, accepted), (2, 2));
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    assert_eq!(transport.sent().await.len(), 1);
    let calls = mailer.calls().await;
    let to: Vec<_> = calls.iter().map(|c| c.to.as_str()).collect();
    assert_eq!(to, vec!["a@example.com", "B@example.com"]);
    let encoded = format!("X-Text-Body-Base64: {}", STANDARD.encode("Hi"));
    for call in &calls {
        assert_eq!(call.subject, "[General] Welcome");
        assert_eq!(call.html, "<p>Hi</p>");
        assert_eq!(call.headers.last(), Some(&encoded));
        assert!(call.headers.contains(&"From: Board <board@example.com>".to_string()));
    }
}

#[tokio::test]
async fn unavailable_transport_calls_fallback_once_per_address() {
    let hook = Arc::new(CountingProvider::new(None));
    let selector = TransportSelector::builder().with_provider(hook.clone()).build();
    let mailer = RecordingMailer::rejecting();
    let dispatcher = support::dispatcher(selector, mailer.clone());

    let outcome = dispatcher.handle(&job()).await.unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::SentViaFallback {
            job_id: "job-42".into(),
            reason: FallbackReason::TransportUnavailable,
            attempted: 2,
            accepted: 0,
        }
    );
    assert_eq!(mailer.calls().await.len(), 2);

    dispatcher.handle(&job()).await.unwrap();
    assert_eq!(hook.calls(), 1, "absence must be cached");
}

#[tokio::test]
async fn primary_success_sends_normalized_message() {
    let transport = RecordingTransport::default();
    let mailer = RecordingMailer::accepting();
    let dispatcher = support::dispatcher(selector_with(transport.clone()), mailer.clone());

    let outcome = dispatcher.handle(&job()).await.unwrap();
    let DispatchOutcome::SentViaPrimary { job_id, receipt } = outcome else {
        panic!("expected primary delivery");
    };
    assert_eq!(job_id, "job-42");
    assert_eq!(receipt.message_id.as_deref(), Some("msg-job-42"));
    assert!(mailer.calls().await.is_empty());

    let sent = transport.sent().await;
    let message = &sent[0];
    assert_eq!(emails(&message.to), vec!["a@example.com", "B@example.com"]);
    assert_eq!(emails(&message.cc), vec!["c@example.com"]);
    assert_eq!(emails(&message.bcc), vec!["d@example.com"]);
    assert_eq!(message.from.formatted(), "Board <board@example.com>");
    assert_eq!(message.reply_to.formatted(), "Board <board@example.com>");
}

#[tokio::test]
async fn empty_recipients_end_without_transport_calls() {
    let hook = Arc::new(CountingProvider::new(None));
    let selector = TransportSelector::builder().with_provider(hook.clone()).build();
    let mailer = RecordingMailer::accepting();
    let dispatcher = support::dispatcher(selector, mailer.clone());

    let outcome = dispatcher
        .handle(&json!({"to": "nobody, also-nobody", "subject": "x"}))
        .await
        .unwrap();
    assert!(matches!(outcome, DispatchOutcome::NothingToSend { ref job_id } if !job_id.is_empty()));
    assert_eq!(hook.calls(), 0);
    assert!(mailer.calls().await.is_empty());
}

#[tokio::test]
async fn account_facts_enrich_metadata_once() {
    let account = FakeAccount {
        domains: vec![
            SendingDomain {
                name: "example.com".into(),
                verified: true,
            },
            SendingDomain {
                name: "pending.example".into(),
                verified: false,
            },
        ],
        label: Some("production".into()),
        ..Default::default()
    };
    let probes = account.probes.clone();
    let transport = RecordingTransport::with_account(account);
    let dispatcher = support::dispatcher(
        selector_with(transport.clone()),
        RecordingMailer::accepting(),
    );

    dispatcher.handle(&job()).await.unwrap();
    dispatcher.handle(&job()).await.unwrap();

    let sent = transport.sent().await;
    assert_eq!(sent.len(), 2);
    let metadata = &sent[0].metadata;
    assert_eq!(metadata["forum_id"], 10);
    assert_eq!(metadata["sending_domains"], json!(["example.com", "pending.example"]));
    assert_eq!(metadata["has_verified_domain"], true);
    assert_eq!(metadata["api_key_label"], "production");
    assert_eq!(probes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_account_probe_is_swallowed() {
    let transport = RecordingTransport::with_account(FakeAccount {
        broken: true,
        ..Default::default()
    });
    let selector = selector_with(transport.clone());
    selector.prime_account_cache().await;
    let dispatcher = support::dispatcher(selector, RecordingMailer::accepting());

    let outcome = dispatcher.handle(&job()).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::SentViaPrimary { .. }));
    let metadata = &transport.sent().await[0].metadata;
    assert!(metadata.get("sending_domains").is_none());
    assert!(metadata.get("api_key_label").is_none());
}

#[tokio::test]
async fn legacy_payload_field_names_are_accepted() {
    let transport = RecordingTransport::default();
    let dispatcher = support::dispatcher(
        selector_with(transport.clone()),
        RecordingMailer::accepting(),
    );
    let payload = json!({
        "batch": "x@example.com,y@example.com",
        "subject": "Legacy",
        "message": "<b>old</b>",
        "text_message": "old",
        "headers": ["Reply-To: replies@example.com"]
    });

    let outcome = dispatcher.handle(&payload).await.unwrap();
    let DispatchOutcome::SentViaPrimary { job_id, .. } = outcome else {
        panic!("expected primary delivery");
    };
    assert_eq!(job_id.len(), 32);

    let message = &transport.sent().await[0];
    assert_eq!(message.to.len(), 2);
    assert_eq!(message.html, "<b>old</b>");
    assert_eq!(message.text, "old");
    assert_eq!(message.from.formatted(), "Example Forum <noreply@forum.example.com>");
    assert_eq!(message.reply_to.formatted(), "Example Forum <replies@example.com>");
    assert_eq!(message.context["job_id"], job_id.as_str());
}

#[tokio::test]
async fn malformed_payload_is_rejected() {
    let dispatcher = support::dispatcher(
        TransportSelector::new(vec![]),
        RecordingMailer::accepting(),
    );
    let err = dispatcher.handle(&json!(["not", "a", "job"])).await.unwrap_err();
    assert!(matches!(err, DispatchError::MalformedPayload(_)));
}
