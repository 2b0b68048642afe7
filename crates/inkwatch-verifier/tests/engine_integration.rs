//! Integration tests for the verification engine.
//!
//! These drive a real engine against an in-process chat document, with
//! short real-time timeouts.

use inkwatch_core::{LogLevel, Surface, VerifierConfig};
use inkwatch_dom::{
    append_message, build_chat_document, build_page_without_container, DocumentHandle, NodeId,
    Transcript, TranscriptMessage,
};
use inkwatch_verifier::VerificationEngine;
use std::time::{Duration, Instant};

fn quiet_config() -> VerifierConfig {
    VerifierConfig {
        verbose: false,
        retry_delay_ms: 20,
        poll_interval_ms: 10,
        ..VerifierConfig::default()
    }
}

fn chat(messages: Vec<TranscriptMessage>) -> (DocumentHandle, NodeId) {
    let (doc, container) = build_chat_document(&Transcript { messages }).unwrap();
    (DocumentHandle::new(doc), container)
}

/// An engine whose feed is attached as soon as `init` returns
fn started_engine(document: &DocumentHandle) -> VerificationEngine {
    let engine = VerificationEngine::new(document.clone(), quiet_config()).unwrap();
    engine.init();
    engine
}

async fn wait_until_active(engine: &VerificationEngine) {
    for _ in 0..200 {
        if engine.status().observer_active {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("change feed never attached");
}

fn append(document: &DocumentHandle, container: NodeId, message: TranscriptMessage) -> NodeId {
    document
        .mutate(|doc| append_message(doc, container, &message))
        .unwrap()
}

fn log_messages(engine: &VerificationEngine) -> Vec<String> {
    engine.logs(None).into_iter().map(|e| e.message).collect()
}

#[tokio::test]
async fn test_absent_fragment_is_not_found() {
    let (document, _) = chat(vec![
        TranscriptMessage::new("first"),
        TranscriptMessage::new("second").with_raw("**second**"),
    ]);
    let engine = VerificationEngine::new(document, quiet_config()).unwrap();

    for fragment in ["third", "firsts", "***"] {
        let report = engine.check_dom_now(fragment);
        assert!(!report.found, "{} should not be found", fragment);
        assert!(report.locations.is_empty());
    }
}

#[tokio::test]
async fn test_expectation_resolves_when_message_arrives() {
    let (document, container) = chat(vec![]);
    let engine = started_engine(&document);
    let timeout = Duration::from_secs(2);

    let pending = engine.expect_message("deploy finished", Some(timeout)).unwrap();
    let id = pending.id();
    let node = append(
        &document,
        container,
        TranscriptMessage::new("The deploy finished at noon"),
    );

    let result = pending.await;
    assert!(result.verified);
    assert!(!result.timed_out);
    assert_eq!(result.id, Some(id));
    assert_eq!(result.found_in, Some(Surface::MessageBody));
    assert_eq!(result.node, Some(node));
    assert!(result.duration_ms < timeout.as_millis() as u64);
    assert_eq!(engine.status().pending_verifications, 0);
    assert!(log_messages(&engine)
        .iter()
        .any(|m| m.starts_with(&format!("FOUND expected message #{}", id))));
}

#[tokio::test]
async fn test_message_right_after_init_is_verified() {
    let (document, container) = chat(vec![]);
    let engine = VerificationEngine::new(document.clone(), quiet_config()).unwrap();
    engine.init();
    assert!(engine.status().observer_active);

    let pending = engine
        .expect_message("first reply", Some(Duration::from_secs(2)))
        .unwrap();
    append(&document, container, TranscriptMessage::new("first reply"));

    let result = pending.await;
    assert!(result.verified, "{:?}", result);
    assert!(!result.timed_out);
}

#[tokio::test]
async fn test_message_right_after_restart_is_verified() {
    let (document, old) = chat(vec![]);
    let engine = started_engine(&document);

    let replacement = document
        .mutate(|doc| {
            let parent = doc.parent(old)?;
            let fresh = doc.create_element_with_class("div", "messages");
            doc.replace_child(parent, fresh, old).ok()?;
            Some(fresh)
        })
        .unwrap();
    engine.restart();
    assert!(engine.status().observer_active);

    let pending = engine
        .expect_message("fresh thread", Some(Duration::from_secs(2)))
        .unwrap();
    append(&document, replacement, TranscriptMessage::new("fresh thread"));

    let result = pending.await;
    assert!(result.verified, "{:?}", result);
    assert_eq!(result.found_in, Some(Surface::MessageBody));
}

#[tokio::test]
async fn test_expectation_times_out_no_earlier_than_deadline() {
    let (document, container) = chat(vec![]);
    let engine = started_engine(&document);
    let timeout = Duration::from_millis(120);

    let started = Instant::now();
    let pending = engine.expect_message("never sent", Some(timeout)).unwrap();
    append(&document, container, TranscriptMessage::new("something else"));

    let result = pending.await;
    assert!(!result.verified);
    assert!(result.timed_out);
    assert!(started.elapsed() >= timeout);
    assert!(result.duration_ms >= timeout.as_millis() as u64);

    let warnings: Vec<_> = engine
        .logs(None)
        .into_iter()
        .filter(|e| e.level == LogLevel::Warn)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.starts_with("TIMEOUT waiting for message #"));
}

#[tokio::test]
async fn test_match_and_timeout_resolve_once() {
    let (document, container) = chat(vec![]);
    let engine = started_engine(&document);

    let pending = engine
        .expect_message("racing", Some(Duration::from_millis(60)))
        .unwrap();
    append(&document, container, TranscriptMessage::new("racing ahead"));
    // Let the timer deadline pass before awaiting
    tokio::time::sleep(Duration::from_millis(150)).await;

    let result = pending.await;
    assert!(result.verified);
    assert!(!result.timed_out);
    assert!(!log_messages(&engine)
        .iter()
        .any(|m| m.starts_with("TIMEOUT")));
}

#[tokio::test]
async fn test_one_message_satisfies_overlapping_expectations() {
    let (document, container) = chat(vec![]);
    let engine = started_engine(&document);

    let short = engine.expect_message("order", None).unwrap();
    let long = engine.expect_message("order #1234 shipped", None).unwrap();
    let other = engine
        .expect_message("refund", Some(Duration::from_millis(80)))
        .unwrap();

    append(
        &document,
        container,
        TranscriptMessage::new("Your order #1234 shipped today"),
    );

    assert!(short.await.verified);
    assert!(long.await.verified);
    assert!(other.await.timed_out);
}

#[tokio::test]
async fn test_text_edit_resolves_expectation() {
    let (document, container) = chat(vec![]);
    let engine = started_engine(&document);
    let message = append(&document, container, TranscriptMessage::new("typing..."));

    let pending = engine
        .expect_message("final answer", Some(Duration::from_secs(2)))
        .unwrap();
    let body = document.read(|doc| doc.children(message)[0]);
    document
        .mutate(|doc| doc.set_text_content(body, "The final answer is 7"))
        .unwrap();

    let result = pending.await;
    assert!(result.verified);
    assert_eq!(result.node, Some(body));
}

#[tokio::test]
async fn test_raw_only_match_reports_data_raw() {
    let (document, container) = chat(vec![TranscriptMessage::new("hello")]);
    let engine = started_engine(&document);

    let pending = engine
        .expect_message("token-xyz", Some(Duration::from_secs(2)))
        .unwrap();
    append(
        &document,
        container,
        TranscriptMessage::new("rendered without the token").with_raw("raw token-xyz source"),
    );

    let result = pending.await;
    assert!(result.verified);
    assert_eq!(result.found_in, Some(Surface::DataRaw));

    let report = engine.check_dom_now("token-xyz");
    assert!(report.found);
    assert_eq!(report.locations.len(), 1);
    assert_eq!(report.locations[0].surface, Surface::DataRaw);

    let raw = engine.check_data_raw("token-xyz");
    assert!(raw.found);
    assert_eq!(raw.index, Some(0));
}

#[tokio::test]
async fn test_count_monitor_sees_single_insert() {
    let (document, container) = chat(vec![]);
    let engine = VerificationEngine::new(document.clone(), quiet_config()).unwrap();

    let monitor = engine.create_count_monitor();
    assert_eq!(monitor.initial_count(), 0);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        append(&document, container, TranscriptMessage::new("one more"));
    });

    let outcome = monitor
        .verify(Some(1), Some(Duration::from_millis(2000)))
        .await;
    assert!(outcome.verified);
    assert!(!outcome.timed_out);
    assert_eq!(outcome.actual_increase, 1);
    assert_eq!(outcome.final_count, 1);
    assert!(outcome.duration_ms < 2000);
    assert_eq!(monitor.current_increase(), 1);
}

#[tokio::test]
async fn test_count_monitor_times_out_without_growth() {
    let (document, _) = chat(vec![TranscriptMessage::new("only")]);
    let engine = VerificationEngine::new(document, quiet_config()).unwrap();

    let outcome = engine
        .create_count_monitor()
        .verify(None, Some(Duration::from_millis(60)))
        .await;
    assert!(!outcome.verified);
    assert!(outcome.timed_out);
    assert_eq!(outcome.initial_count, 1);
    assert_eq!(outcome.actual_increase, 0);
}

#[tokio::test]
async fn test_stop_prevents_feed_resolution() {
    let (document, container) = chat(vec![]);
    let engine = started_engine(&document);

    let pending = engine
        .expect_message("after stop", Some(Duration::from_millis(150)))
        .unwrap();
    engine.stop();
    assert!(!engine.status().observer_active);

    append(&document, container, TranscriptMessage::new("after stop"));

    let result = pending.await;
    assert!(!result.verified);
    assert!(result.timed_out);

    // Polling still sees the message
    let polled = engine
        .wait_for_message("after stop", Some(Duration::from_millis(200)), None)
        .await;
    assert!(polled.verified);
}

#[tokio::test]
async fn test_feed_waits_for_late_container() {
    let (doc, chat) = build_page_without_container().unwrap();
    let document = DocumentHandle::new(doc);
    let engine = VerificationEngine::new(document.clone(), quiet_config()).unwrap();
    engine.init();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!engine.status().observer_active);
    assert!(engine
        .logs(None)
        .iter()
        .any(|e| e.level == LogLevel::Warn && e.message.contains("container not found")));

    let container = document
        .mutate(|doc| {
            let container = doc.create_element_with_class("div", "messages");
            doc.append_child(chat, container).map(|_| container)
        })
        .unwrap();
    wait_until_active(&engine).await;

    let pending = engine
        .expect_message("late hello", Some(Duration::from_secs(2)))
        .unwrap();
    append(&document, container, TranscriptMessage::new("late hello"));
    assert!(pending.await.verified);
}

#[tokio::test]
async fn test_restart_follows_replaced_container() {
    let (document, old) = chat(vec![TranscriptMessage::new("old history")]);
    let engine = started_engine(&document);

    let replacement = document
        .mutate(|doc| {
            let parent = doc.parent(old)?;
            let fresh = doc.create_element_with_class("div", "messages");
            doc.replace_child(parent, fresh, old).ok()?;
            Some(fresh)
        })
        .unwrap();

    let missed = engine
        .expect_message("new chat", Some(Duration::from_millis(100)))
        .unwrap();
    append(&document, replacement, TranscriptMessage::new("new chat started"));
    assert!(missed.await.timed_out);

    engine.restart();

    let pending = engine
        .expect_message("second message", Some(Duration::from_secs(2)))
        .unwrap();
    append(&document, replacement, TranscriptMessage::new("second message"));
    assert!(pending.await.verified);
    assert_eq!(engine.message_count(), 2);
}

#[tokio::test]
async fn test_comprehensive_quorum_on_live_document() {
    let (document, container) = chat(vec![]);
    let engine = started_engine(&document);

    let baseline = engine.create_count_monitor();
    append(
        &document,
        container,
        TranscriptMessage::new("Result: 42").with_raw("Result: **42**"),
    );

    let verdict = engine
        .comprehensive_verify_with_baseline("Result:", Some(Duration::from_millis(200)), &baseline)
        .await;
    assert_eq!(verdict.confirmations, 4);
    assert!(verdict.overall_verified);

    // Baseline taken after the message arrived: count gives no confirmation
    let verdict = engine
        .comprehensive_verify("Result:", Some(Duration::from_millis(200)))
        .await;
    assert_eq!(verdict.confirmations, 3);
    assert!(!verdict.methods.count.verified);
    assert!(verdict.overall_verified);

    // Present on both surfaces
    let verdict = engine
        .comprehensive_verify("42", Some(Duration::from_millis(200)))
        .await;
    assert!(verdict.methods.immediate.found);
    assert!(verdict.methods.wait_for.verified);
    assert!(verdict.methods.data_raw.found);

    let verdict = engine
        .comprehensive_verify("missing", Some(Duration::from_millis(100)))
        .await;
    assert_eq!(verdict.confirmations, 0);
    assert!(!verdict.overall_verified);
    assert!(verdict.methods.wait_for.timed_out);
    assert!(log_messages(&engine)
        .iter()
        .any(|m| m == "Comprehensive verification: 0/4 confirmations - NOT VERIFIED"));
}

#[tokio::test]
async fn test_engines_on_one_document_are_independent() {
    let (document, container) = chat(vec![]);
    let first = started_engine(&document);
    let second = started_engine(&document);
    assert_ne!(first.session_id(), second.session_id());

    let a = first
        .expect_message("shared text", Some(Duration::from_secs(2)))
        .unwrap();
    second.check_dom_now("nothing");

    append(&document, container, TranscriptMessage::new("shared text"));
    assert!(a.await.verified);
    assert_eq!(second.status().pending_verifications, 0);
    assert!(!log_messages(&second)
        .iter()
        .any(|m| m.starts_with("FOUND expected message")));
}

#[tokio::test]
async fn test_configured_default_timeout_applies() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("inkwatch.toml");
    std::fs::write(
        &path,
        "default_timeout_ms = 80\nverbose = false\n\n[selectors]\ncontainer = \"#chat\"\n",
    )
    .unwrap();
    let config = VerifierConfig::load_or_default(&path).unwrap();
    assert_eq!(config.selectors.container, "#chat");

    let (document, container) = chat(vec![]);
    let engine = VerificationEngine::new(document.clone(), config).unwrap();
    engine.init();
    assert!(engine.status().observer_active);

    let started = Instant::now();
    let result = engine.expect_message("never", None).unwrap().await;
    assert!(result.timed_out);
    assert!(started.elapsed() >= Duration::from_millis(80));

    // Observing #chat still covers messages below it
    let pending = engine
        .expect_message("nested", Some(Duration::from_secs(2)))
        .unwrap();
    append(&document, container, TranscriptMessage::new("nested"));
    assert!(pending.await.verified);
}
