//! The verification engine
//!
//! One engine instance owns all state for a monitoring session: the
//! expectation registry, the change feed, and the diagnostic log. Several
//! engines can watch the same document independently.

use chrono::Utc;
use inkwatch_core::{truncate_chars, InkwatchError, LogEntry, LogLevel, Result, VerifierConfig};
use inkwatch_dom::{DocumentHandle, NodeId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;
use uuid::Uuid;

use crate::comprehensive::{ComprehensiveVerdict, VerificationMethods, METHOD_COUNT};
use crate::count::CountMonitor;
use crate::feed::{AffectedBatch, ChangeFeed};
use crate::log_sink::LogSink;
use crate::registry::Registry;
use crate::result::VerificationResult;
use crate::scanner::{LastMessage, RawMatch, ScanReport, SnapshotScanner};

/// State shared between the engine, its background tasks and count monitors
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) document: DocumentHandle,
    pub(crate) config: VerifierConfig,
    pub(crate) scanner: SnapshotScanner,
    pub(crate) registry: Registry,
    pub(crate) log: Arc<LogSink>,
}

impl Shared {
    pub(crate) fn scan(&self, fragment: &str) -> ScanReport {
        self.document.read(|doc| self.scanner.scan(doc, fragment))
    }

    pub(crate) fn scan_raw(&self, fragment: &str) -> RawMatch {
        self.document.read(|doc| self.scanner.scan_raw(doc, fragment))
    }

    pub(crate) fn message_count(&self) -> usize {
        self.document.read(|doc| self.scanner.message_count(doc))
    }

    pub(crate) fn preview<'a>(&self, fragment: &'a str) -> &'a str {
        truncate_chars(fragment, self.config.preview_chars)
    }

    /// Match affected elements against pending expectations
    fn process_nodes(&self, nodes: &[NodeId]) {
        for &node in nodes {
            if self.registry.is_empty() {
                return;
            }
            let (text, raw) = self
                .document
                .read(|doc| self.scanner.element_surfaces(doc, node));

            for matched in self.registry.settle_matches(node, &text, &raw) {
                self.log.info(format!(
                    "FOUND expected message #{}: \"{}\"",
                    matched.id,
                    self.preview(&matched.fragment)
                ));
            }
        }
    }
}

/// Pending result of [`VerificationEngine::expect_message`]
///
/// Resolves exactly once, either when the change feed sees the fragment or
/// when the timeout fires. If the engine is dropped first the result is
/// unverified without a timeout flag.
#[derive(Debug)]
#[must_use = "an expectation does nothing unless awaited"]
pub struct Expectation {
    id: u64,
    receiver: oneshot::Receiver<VerificationResult>,
}

impl Expectation {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for Expectation {
    type Output = VerificationResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let id = this.id;
        Pin::new(&mut this.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| VerificationResult::abandoned(id)))
    }
}

/// Snapshot of engine state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub session_id: Uuid,
    pub observer_active: bool,
    pub pending_verifications: usize,
    pub message_count: usize,
    pub log_count: usize,
}

/// Confirms that expected messages appear in a live chat transcript
#[derive(Debug)]
pub struct VerificationEngine {
    shared: Arc<Shared>,
    feed: ChangeFeed,
    session_id: Uuid,
    batches: Mutex<Option<mpsc::UnboundedReceiver<AffectedBatch>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl VerificationEngine {
    /// Create an engine over `document`; nothing runs until [`Self::init`]
    pub fn new(document: DocumentHandle, config: VerifierConfig) -> Result<Self> {
        config.validate()?;
        let scanner = SnapshotScanner::from_config(&config)?;
        let log = Arc::new(LogSink::new(config.verbose));

        let (tx, rx) = mpsc::unbounded_channel();
        let feed = ChangeFeed::new(
            document.clone(),
            scanner.container_selector().clone(),
            config.retry_delay(),
            Arc::clone(&log),
            tx,
        );

        Ok(Self {
            shared: Arc::new(Shared {
                document,
                config,
                scanner,
                registry: Registry::new(),
                log,
            }),
            feed,
            session_id: Uuid::new_v4(),
            batches: Mutex::new(Some(rx)),
            consumer: Mutex::new(None),
        })
    }

    /// Start the change feed and the task that matches its batches
    ///
    /// Must be called inside a Tokio runtime. Calling it again only restarts
    /// a stopped feed.
    pub fn init(&self) -> &Self {
        let receiver = self
            .batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(receiver) = receiver {
            self.shared.log.info("Verification engine initializing...");
            let shared = Arc::clone(&self.shared);
            let feed = self.feed.clone();
            let task = tokio::spawn(async move {
                let mut batches = UnboundedReceiverStream::new(receiver);
                while let Some(batch) = batches.next().await {
                    if batch.generation != feed.current_generation() {
                        debug!("Dropping stale batch from generation {}", batch.generation);
                        continue;
                    }
                    shared.process_nodes(&batch.nodes);
                }
            });
            *self.consumer.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
            self.feed.start();
            self.shared.log.info("Verification engine ready");
        } else {
            self.feed.start();
        }
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.shared.config
    }

    pub fn document(&self) -> &DocumentHandle {
        &self.shared.document
    }

    /// Register an expectation that `fragment` will appear
    ///
    /// The returned future resolves when the change feed sees the fragment in
    /// an added or edited element, or when `timeout` (default from config)
    /// elapses. Content already on the page does not count; use
    /// [`Self::check_dom_now`] for that.
    pub fn expect_message(&self, fragment: &str, timeout: Option<Duration>) -> Result<Expectation> {
        if fragment.is_empty() {
            self.shared
                .log
                .warn("Rejected expectation with empty text");
            return Err(InkwatchError::EmptyFragment);
        }

        let timeout = self.shared.config.timeout_or_default(timeout);
        let (id, receiver) = self.shared.registry.register(fragment);
        self.shared.log.info(format!(
            "Expecting message #{}: \"{}\"",
            id,
            self.shared.preview(fragment)
        ));

        let shared = Arc::clone(&self.shared);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if shared.registry.expire(id).is_some() {
                shared
                    .log
                    .warn(format!("TIMEOUT waiting for message #{}", id));
            }
        });
        self.shared.registry.attach_timer(id, timer.abort_handle());

        Ok(Expectation { id, receiver })
    }

    /// Scan the document right now
    pub fn check_dom_now(&self, fragment: &str) -> ScanReport {
        self.shared.log.info(format!(
            "Checking DOM for: \"{}\"",
            self.shared.preview(fragment)
        ));
        let report = self.shared.scan(fragment);
        if report.found {
            self.shared
                .log
                .info(format!("FOUND in {} location(s)", report.locations.len()));
        } else {
            self.shared.log.info("NOT FOUND");
        }
        report
    }

    /// First message whose raw-source attribute contains `fragment`
    pub fn check_data_raw(&self, fragment: &str) -> RawMatch {
        let hit = self.shared.scan_raw(fragment);
        if let Some(index) = hit.index {
            self.shared
                .log
                .info(format!("FOUND in raw source of message {}", index));
        }
        hit
    }

    /// Poll the document until `fragment` appears or `timeout` elapses
    ///
    /// Works without the change feed, so it also runs before `init`.
    pub async fn wait_for_message(
        &self,
        fragment: &str,
        timeout: Option<Duration>,
        poll: Option<Duration>,
    ) -> VerificationResult {
        let timeout = self.shared.config.timeout_or_default(timeout);
        let poll = self.shared.config.poll_or_default(poll);
        let started = Instant::now();

        self.shared.log.info(format!(
            "Waiting for message: \"{}\"",
            self.shared.preview(fragment)
        ));

        loop {
            let report = self.shared.scan(fragment);
            let elapsed = started.elapsed();

            if report.found {
                self.shared
                    .log
                    .info(format!("FOUND after {}ms", elapsed.as_millis()));
                return VerificationResult::found(report, elapsed);
            }
            if elapsed >= timeout {
                self.shared
                    .log
                    .warn(format!("TIMEOUT after {}ms", timeout.as_millis()));
                return VerificationResult::timed_out(None, elapsed);
            }

            tokio::time::sleep(poll.min(timeout - elapsed)).await;
        }
    }

    /// Capture the current message count as a baseline
    pub fn create_count_monitor(&self) -> CountMonitor {
        CountMonitor::new(Arc::clone(&self.shared))
    }

    /// Run all four methods, with the count baseline taken now
    pub async fn comprehensive_verify(
        &self,
        fragment: &str,
        timeout: Option<Duration>,
    ) -> ComprehensiveVerdict {
        let baseline = self.create_count_monitor();
        self.comprehensive_verify_with_baseline(fragment, timeout, &baseline)
            .await
    }

    /// Run all four methods against a caller-supplied count baseline
    ///
    /// The polled wait gets half of `timeout`; the other methods are
    /// instantaneous. The count method is checked after the wait finishes.
    pub async fn comprehensive_verify_with_baseline(
        &self,
        fragment: &str,
        timeout: Option<Duration>,
        baseline: &CountMonitor,
    ) -> ComprehensiveVerdict {
        let timeout = self.shared.config.timeout_or_default(timeout);
        let started_at = Utc::now();
        let started = Instant::now();

        self.shared.log.info(format!(
            "Starting comprehensive verification for: \"{}\"",
            self.shared.preview(fragment)
        ));

        let immediate = self.shared.scan(fragment);
        let wait_for = self
            .wait_for_message(fragment, Some(timeout / 2), None)
            .await;
        let count = baseline.check_now();
        let data_raw = self.shared.scan_raw(fragment);

        let methods = VerificationMethods {
            immediate,
            wait_for,
            count,
            data_raw,
        };
        let verdict =
            ComprehensiveVerdict::from_methods(fragment, started_at, methods, started.elapsed());

        let level = if verdict.overall_verified {
            LogLevel::Info
        } else {
            LogLevel::Warn
        };
        self.shared.log.record(
            level,
            format!(
                "Comprehensive verification: {}/{} confirmations - {}",
                verdict.confirmations,
                METHOD_COUNT,
                verdict.label()
            ),
        );
        verdict
    }

    pub fn message_count(&self) -> usize {
        self.shared.message_count()
    }

    pub fn last_message(&self) -> Option<LastMessage> {
        self.shared
            .document
            .read(|doc| self.shared.scanner.last_message(doc))
    }

    /// Log entries, the last `count` of them when given
    pub fn logs(&self, count: Option<usize>) -> Vec<LogEntry> {
        self.shared.log.recent(count)
    }

    pub fn clear_logs(&self) {
        self.shared.log.clear();
    }

    pub fn set_verbose(&self, verbose: bool) {
        self.shared.log.set_verbose(verbose);
    }

    /// Stop the change feed
    ///
    /// Pending expectations keep their timers and still time out; polled
    /// waits keep polling.
    pub fn stop(&self) {
        self.feed.stop();
    }

    /// Resubscribe, picking up a replaced container
    pub fn restart(&self) {
        self.feed.restart();
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            session_id: self.session_id,
            observer_active: self.feed.is_active(),
            pending_verifications: self.shared.registry.len(),
            message_count: self.shared.message_count(),
            log_count: self.shared.log.len(),
        }
    }
}

impl Drop for VerificationEngine {
    fn drop(&mut self) {
        self.feed.stop();
        if let Some(task) = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}
