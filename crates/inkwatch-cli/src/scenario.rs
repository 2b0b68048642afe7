//! Scripted verification scenarios
//!
//! A scenario starts from a transcript, plays a timed script of page edits
//! against it, and runs verification checks concurrently with the script.
//! Times are milliseconds from the start of the run.
//!
//! ```json
//! {
//!   "transcript": {"messages": [{"text": "hello"}]},
//!   "events": [{"at_ms": 50, "action": "append_message", "text": "pong", "raw": "**pong**"}],
//!   "checks": [{"kind": "expect", "fragment": "pong", "timeout_ms": 500, "should_verify": true}]
//! }
//! ```

use anyhow::{Context, Result};
use futures::future::join_all;
use inkwatch_core::{InkwatchError, LogEntry, VerifierConfig};
use inkwatch_dom::{
    append_message, build_chat_document, build_page_without_container, Document, DocumentHandle,
    NodeId, Selector, Transcript, TranscriptMessage,
};
use inkwatch_verifier::{EngineStatus, VerificationEngine};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub transcript: Transcript,
    /// Start with the message container on the page
    #[serde(default = "default_true")]
    pub container_present: bool,
    #[serde(default)]
    pub events: Vec<TimedEvent>,
    #[serde(default)]
    pub checks: Vec<Check>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse scenario {}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedEvent {
    #[serde(default)]
    pub at_ms: u64,
    #[serde(flatten)]
    pub event: Event,
}

/// Page edits a script can make
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Event {
    AppendMessage {
        text: String,
        #[serde(default)]
        raw: Option<String>,
        #[serde(default)]
        role: Option<String>,
    },
    /// Replace the text of the last rendered body
    EditLastMessage { text: String },
    /// Set the raw-source attribute of the message at `index`
    SetRaw { index: usize, raw: String },
    /// Add an empty element matching the container selector to `#chat`,
    /// or to `body` when the page has no `#chat`
    InsertContainer,
    /// Swap the container for an empty element matching the container selector
    ReplaceContainer,
    StopFeed,
    RestartFeed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub at_ms: u64,
    /// Expected outcome; the run fails when the check disagrees
    #[serde(default)]
    pub should_verify: Option<bool>,
    #[serde(flatten)]
    pub kind: CheckKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckKind {
    Expect {
        fragment: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Wait {
        fragment: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        poll_ms: Option<u64>,
    },
    Scan {
        fragment: String,
    },
    DataRaw {
        fragment: String,
    },
    Count {
        #[serde(default)]
        expected_increase: Option<usize>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Comprehensive {
        fragment: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
}

impl CheckKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Expect { .. } => "expect",
            Self::Wait { .. } => "wait",
            Self::Scan { .. } => "scan",
            Self::DataRaw { .. } => "data_raw",
            Self::Count { .. } => "count",
            Self::Comprehensive { .. } => "comprehensive",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub name: String,
    pub kind: &'static str,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub should_verify: Option<bool>,
    pub passed: bool,
    pub detail: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub passed: bool,
    pub checks: Vec<CheckOutcome>,
    pub status: EngineStatus,
    pub logs: Vec<LogEntry>,
}

impl ScenarioReport {
    pub fn failures(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }
}

/// Selectors the script uses to find things on the page
struct Layout {
    container: Selector,
    message: Selector,
    body: Selector,
    chat: Selector,
    page_body: Selector,
    raw_attribute: String,
}

impl Layout {
    fn from_config(config: &VerifierConfig) -> Result<Self> {
        let selectors = &config.selectors;
        Ok(Self {
            container: Selector::parse(&selectors.container)?,
            message: Selector::parse(&selectors.message)?,
            body: Selector::parse(&selectors.body)?,
            chat: Selector::parse("#chat")?,
            page_body: Selector::parse("body")?,
            raw_attribute: selectors.raw_attribute.clone(),
        })
    }

    fn container(&self, doc: &Document) -> inkwatch_core::Result<NodeId> {
        doc.query_selector(&self.container).ok_or_else(|| {
            InkwatchError::Other(format!("{} container not found", self.container))
        })
    }

    fn apply(&self, doc: &mut Document, event: &Event) -> inkwatch_core::Result<()> {
        match event {
            Event::AppendMessage { text, raw, role } => {
                let container = self.container(doc)?;
                let message = TranscriptMessage {
                    text: text.clone(),
                    raw: raw.clone(),
                    role: role.clone(),
                };
                append_message(doc, container, &message)?;
            }
            Event::EditLastMessage { text } => {
                let container = self.container(doc)?;
                let body = doc
                    .query_selector_all_within(container, &self.body)
                    .last()
                    .copied()
                    .ok_or_else(|| InkwatchError::Other("No message to edit".to_string()))?;
                doc.set_text_content(body, text)?;
            }
            Event::SetRaw { index, raw } => {
                let container = self.container(doc)?;
                let message = doc
                    .query_selector_all_within(container, &self.message)
                    .get(*index)
                    .copied()
                    .ok_or_else(|| InkwatchError::Other(format!("No message at index {}", index)))?;
                doc.set_attribute(message, &self.raw_attribute, raw)?;
            }
            Event::InsertContainer => {
                let parent = doc
                    .query_selector(&self.chat)
                    .or_else(|| doc.query_selector(&self.page_body))
                    .ok_or_else(|| InkwatchError::Other("#chat not found".to_string()))?;
                let container = doc.create_matching_element(&self.container);
                doc.append_child(parent, container)?;
            }
            Event::ReplaceContainer => {
                let old = self.container(doc)?;
                let parent = doc.parent(old).ok_or_else(|| {
                    InkwatchError::InvalidHierarchy("container has no parent".to_string())
                })?;
                let fresh = doc.create_matching_element(&self.container);
                doc.replace_child(parent, fresh, old)?;
            }
            Event::StopFeed | Event::RestartFeed => {}
        }
        Ok(())
    }
}

async fn play_events(
    engine: &VerificationEngine,
    layout: &Layout,
    events: &[TimedEvent],
    start: Instant,
) -> Result<()> {
    let mut ordered: Vec<&TimedEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.at_ms);

    for timed in ordered {
        tokio::time::sleep_until(start + Duration::from_millis(timed.at_ms)).await;
        match &timed.event {
            Event::StopFeed => engine.stop(),
            Event::RestartFeed => engine.restart(),
            event => engine
                .document()
                .mutate(|doc| layout.apply(doc, event))
                .with_context(|| format!("Event at {}ms failed", timed.at_ms))?,
        }
        debug!("Applied {:?} at {}ms", timed.event, timed.at_ms);
    }
    Ok(())
}

fn millis(value: Option<u64>) -> Option<Duration> {
    value.map(Duration::from_millis)
}

fn to_detail<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

async fn run_check(
    engine: &VerificationEngine,
    index: usize,
    check: &Check,
    start: Instant,
) -> CheckOutcome {
    tokio::time::sleep_until(start + Duration::from_millis(check.at_ms)).await;

    let (verified, detail) = match &check.kind {
        CheckKind::Expect {
            fragment,
            timeout_ms,
        } => match engine.expect_message(fragment, millis(*timeout_ms)) {
            Ok(pending) => {
                let result = pending.await;
                (result.verified, to_detail(&result))
            }
            Err(e) => (false, json!({ "error": e.to_string() })),
        },
        CheckKind::Wait {
            fragment,
            timeout_ms,
            poll_ms,
        } => {
            let result = engine
                .wait_for_message(fragment, millis(*timeout_ms), millis(*poll_ms))
                .await;
            (result.verified, to_detail(&result))
        }
        CheckKind::Scan { fragment } => {
            let report = engine.check_dom_now(fragment);
            (report.found, to_detail(&report))
        }
        CheckKind::DataRaw { fragment } => {
            let hit = engine.check_data_raw(fragment);
            (hit.found, to_detail(&hit))
        }
        CheckKind::Count {
            expected_increase,
            timeout_ms,
        } => {
            let outcome = engine
                .create_count_monitor()
                .verify(*expected_increase, millis(*timeout_ms))
                .await;
            (outcome.verified, to_detail(&outcome))
        }
        CheckKind::Comprehensive {
            fragment,
            timeout_ms,
        } => {
            let verdict = engine
                .comprehensive_verify(fragment, millis(*timeout_ms))
                .await;
            (verdict.overall_verified, to_detail(&verdict))
        }
    };

    CheckOutcome {
        name: check
            .name
            .clone()
            .unwrap_or_else(|| format!("check-{}", index + 1)),
        kind: check.kind.label(),
        verified,
        should_verify: check.should_verify,
        passed: check.should_verify.map_or(true, |expected| expected == verified),
        detail,
    }
}

/// Run a scenario against a fresh engine
pub async fn run(scenario: &Scenario, config: VerifierConfig) -> Result<ScenarioReport> {
    let layout = Layout::from_config(&config)?;

    let doc = if scenario.container_present {
        build_chat_document(&scenario.transcript)?.0
    } else {
        if !scenario.transcript.messages.is_empty() {
            warn!("Transcript ignored: scenario starts without a container");
        }
        build_page_without_container()?.0
    };

    let engine = VerificationEngine::new(DocumentHandle::new(doc), config)?;
    engine.init();
    info!(
        "Running scenario with {} event(s) and {} check(s)",
        scenario.events.len(),
        scenario.checks.len()
    );

    let start = Instant::now();
    let script = play_events(&engine, &layout, &scenario.events, start);
    let checks = join_all(
        scenario
            .checks
            .iter()
            .enumerate()
            .map(|(index, check)| run_check(&engine, index, check, start)),
    );
    let (script, checks) = tokio::join!(script, checks);
    script?;

    let passed = checks.iter().all(|c| c.passed);
    Ok(ScenarioReport {
        name: scenario.name.clone(),
        passed,
        checks,
        status: engine.status(),
        logs: engine.logs(None),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> VerifierConfig {
        VerifierConfig {
            verbose: false,
            retry_delay_ms: 20,
            poll_interval_ms: 10,
            ..VerifierConfig::default()
        }
    }

    fn parse(json: &str) -> Scenario {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_scenario() {
        let scenario = parse(
            r#"{
                "transcript": {"messages": [{"text": "hi"}]},
                "events": [
                    {"at_ms": 10, "action": "append_message", "text": "pong", "raw": "**pong**"},
                    {"at_ms": 20, "action": "stop_feed"}
                ],
                "checks": [
                    {"kind": "expect", "fragment": "pong", "timeout_ms": 300, "should_verify": true},
                    {"name": "count", "kind": "count"}
                ]
            }"#,
        );
        assert!(scenario.container_present);
        assert_eq!(scenario.events[1].event, Event::StopFeed);
        assert_eq!(
            scenario.checks[0].kind,
            CheckKind::Expect {
                fragment: "pong".to_string(),
                timeout_ms: Some(300)
            }
        );
        assert_eq!(scenario.checks[1].kind.label(), "count");
        assert_eq!(scenario.checks[1].should_verify, None);
    }

    #[tokio::test]
    async fn test_run_reports_each_check() {
        let scenario = parse(
            r#"{
                "transcript": {"messages": [{"text": "hello"}]},
                "events": [
                    {"at_ms": 40, "action": "append_message", "text": "pong", "raw": "raw token-xyz"},
                    {"at_ms": 60, "action": "edit_last_message", "text": "pong edited"}
                ],
                "checks": [
                    {"at_ms": 10, "kind": "expect", "fragment": "pong", "timeout_ms": 1000, "should_verify": true},
                    {"at_ms": 10, "kind": "count", "timeout_ms": 1000, "should_verify": true},
                    {"at_ms": 10, "kind": "expect", "fragment": "never", "timeout_ms": 80, "should_verify": false},
                    {"at_ms": 150, "kind": "scan", "fragment": "pong edited", "should_verify": true},
                    {"at_ms": 150, "kind": "data_raw", "fragment": "token-xyz", "should_verify": true}
                ]
            }"#,
        );

        let report = run(&scenario, quiet()).await.unwrap();
        assert!(report.passed, "{:#?}", report.checks);
        assert_eq!(report.checks.len(), 5);
        assert_eq!(report.checks[0].name, "check-1");
        assert_eq!(report.checks[2].detail["timed_out"], true);
        assert_eq!(report.status.message_count, 2);
    }

    #[tokio::test]
    async fn test_mismatch_fails_run() {
        let scenario = parse(
            r#"{"checks": [{"kind": "scan", "fragment": "absent", "should_verify": true}]}"#,
        );
        let report = run(&scenario, quiet()).await.unwrap();
        assert!(!report.passed);
        assert_eq!(report.failures(), 1);
    }

    #[tokio::test]
    async fn test_container_inserted_later() {
        let scenario = parse(
            r#"{
                "container_present": false,
                "events": [
                    {"at_ms": 50, "action": "insert_container"},
                    {"at_ms": 150, "action": "append_message", "text": "arrived"}
                ],
                "checks": [
                    {"at_ms": 120, "kind": "expect", "fragment": "arrived", "timeout_ms": 1000, "should_verify": true}
                ]
            }"#,
        );
        let report = run(&scenario, quiet()).await.unwrap();
        assert!(report.passed, "{:#?}", report.checks);
        assert!(report
            .logs
            .iter()
            .any(|e| e.message.contains("container not found - will retry")));
    }

    #[tokio::test]
    async fn test_replace_then_restart() {
        let scenario = parse(
            r#"{
                "events": [
                    {"at_ms": 20, "action": "replace_container"},
                    {"at_ms": 40, "action": "append_message", "text": "missed"},
                    {"at_ms": 60, "action": "restart_feed"},
                    {"at_ms": 120, "action": "append_message", "text": "seen"}
                ],
                "checks": [
                    {"at_ms": 30, "kind": "expect", "fragment": "missed", "timeout_ms": 60, "should_verify": false},
                    {"at_ms": 100, "kind": "expect", "fragment": "seen", "timeout_ms": 1000, "should_verify": true}
                ]
            }"#,
        );
        let report = run(&scenario, quiet()).await.unwrap();
        assert!(report.passed, "{:#?}", report.checks);
    }

    #[test]
    fn test_inserted_container_follows_configured_selector() {
        let mut config = quiet();
        config.selectors.container = "section.transcript".to_string();
        let layout = Layout::from_config(&config).unwrap();
        let (mut doc, _) = build_page_without_container().unwrap();

        assert!(layout.container(&doc).is_err());
        layout.apply(&mut doc, &Event::InsertContainer).unwrap();
        let container = layout.container(&doc).unwrap();
        assert_eq!(doc.element(container).unwrap().tag, "section");

        layout.apply(&mut doc, &Event::ReplaceContainer).unwrap();
        let replacement = layout.container(&doc).unwrap();
        assert_ne!(replacement, container);
        assert!(!doc.is_connected(container));
    }

    #[tokio::test]
    async fn test_replace_then_restart_with_custom_container() {
        let mut config = quiet();
        config.selectors.container = "#chat".to_string();
        let scenario = parse(
            r#"{
                "events": [
                    {"at_ms": 20, "action": "replace_container"},
                    {"at_ms": 40, "action": "restart_feed"},
                    {"at_ms": 40, "action": "append_message", "text": "after swap"}
                ],
                "checks": [
                    {"at_ms": 30, "kind": "expect", "fragment": "after swap", "timeout_ms": 1000, "should_verify": true}
                ]
            }"#,
        );
        let report = run(&scenario, config).await.unwrap();
        assert!(report.passed, "{:#?}", report.checks);
    }

    #[tokio::test]
    async fn test_bad_event_is_an_error() {
        let scenario = parse(
            r#"{"events": [{"action": "set_raw", "index": 3, "raw": "x"}]}"#,
        );
        assert!(run(&scenario, quiet()).await.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scenario.json");
        std::fs::write(&path, r#"{"name": "smoke"}"#).unwrap();
        assert_eq!(Scenario::load(&path).unwrap().name.as_deref(), Some("smoke"));
        assert!(Scenario::load(&dir.path().join("missing.json")).is_err());
    }
}
