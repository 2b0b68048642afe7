//! Change feed over the message container
//!
//! Subscribes to structural and text changes below the container and turns
//! each mutation batch into the list of elements whose content may now hold
//! an expected fragment. When the container is not on the page yet the feed
//! retries after the configured delay until it appears or the feed is
//! stopped.
//!
//! Every start bumps a generation counter and every forwarded batch carries
//! the generation it was produced under, so consumers can drop batches that
//! were already in flight when the feed was stopped.

use inkwatch_dom::{
    Document, DocumentHandle, MutationBatch, MutationRecord, NodeId, ObserveOptions, ObserverId,
    Selector,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::log_sink::LogSink;

/// Elements affected by one mutation batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffectedBatch {
    pub generation: u64,
    pub nodes: Vec<NodeId>,
}

#[derive(Debug, Default)]
struct FeedState {
    observer: Option<ObserverId>,
    task: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct FeedInner {
    document: DocumentHandle,
    container: Selector,
    retry_delay: Duration,
    log: Arc<LogSink>,
    output: mpsc::UnboundedSender<AffectedBatch>,
    generation: AtomicU64,
    state: Mutex<FeedState>,
}

impl FeedInner {
    fn state(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Register an observer on the container if it is on the page
    ///
    /// Runs under the state lock so a concurrent stop either sees the new
    /// observer or prevents it from being registered.
    fn attach(&self, state: &mut FeedState, sender: mpsc::UnboundedSender<MutationBatch>) -> bool {
        let observer = self.document.mutate(|doc| {
            if let Some(stale) = state.observer.take() {
                doc.disconnect(stale);
            }
            let container = doc.query_selector(&self.container)?;
            doc.observe(container, ObserveOptions::subtree_content(), sender)
                .ok()
        });

        match observer {
            Some(id) => {
                state.observer = Some(id);
                self.log
                    .info(format!("Change feed started on {} container", self.container));
                true
            }
            None => false,
        }
    }

    fn warn_missing(&self) {
        self.log.warn(format!(
            "{} container not found - will retry",
            self.container
        ));
    }

    /// Retry until the container appears, then forward its batches
    async fn acquire(
        self: Arc<Self>,
        generation: u64,
        sender: mpsc::UnboundedSender<MutationBatch>,
        receiver: mpsc::UnboundedReceiver<MutationBatch>,
    ) {
        loop {
            tokio::time::sleep(self.retry_delay).await;
            {
                let mut state = self.state();
                if !self.is_current(generation) {
                    return;
                }
                if self.attach(&mut state, sender.clone()) {
                    break;
                }
            }
            self.warn_missing();
        }
        // The document holds the only sender now; disconnecting closes the channel
        drop(sender);
        self.forward(generation, receiver).await;
    }

    async fn forward(
        self: Arc<Self>,
        generation: u64,
        mut receiver: mpsc::UnboundedReceiver<MutationBatch>,
    ) {
        while let Some(batch) = receiver.recv().await {
            if !self.is_current(generation) {
                break;
            }
            let nodes = self.document.read(|doc| affected_nodes(doc, &batch));
            if nodes.is_empty() {
                continue;
            }
            debug!("Forwarding {} affected element(s)", nodes.len());
            if self
                .output
                .send(AffectedBatch { generation, nodes })
                .is_err()
            {
                self.log
                    .error("Change feed consumer is gone - no further changes will be matched");
                break;
            }
        }
    }
}

/// Elements whose content a batch may have changed
///
/// Added elements are reported as-is. Added text nodes and edited text nodes
/// are reported through their nearest element. Attribute records carry no
/// new content and are skipped. Order follows the batch, without repeats.
pub fn affected_nodes(doc: &Document, batch: &[MutationRecord]) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = Vec::new();
    let mut push = |node: Option<NodeId>| {
        if let Some(node) = node {
            if !nodes.contains(&node) {
                nodes.push(node);
            }
        }
    };

    for record in batch {
        match record {
            MutationRecord::ChildList { added, .. } => {
                for &node in added {
                    if doc.is_element(node) {
                        push(Some(node));
                    } else {
                        push(doc.parent(node).and_then(|p| doc.nearest_element(p)));
                    }
                }
            }
            MutationRecord::CharacterData { target } => push(doc.nearest_element(*target)),
            MutationRecord::Attributes { .. } => {}
        }
    }
    nodes
}

/// Subscription to container changes, restartable
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

impl ChangeFeed {
    pub fn new(
        document: DocumentHandle,
        container: Selector,
        retry_delay: Duration,
        log: Arc<LogSink>,
        output: mpsc::UnboundedSender<AffectedBatch>,
    ) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                document,
                container,
                retry_delay,
                log,
                output,
                generation: AtomicU64::new(0),
                state: Mutex::new(FeedState::default()),
            }),
        }
    }

    /// Subscribe to the container
    ///
    /// When the container is on the page the observer is registered before
    /// this returns, so edits made right afterwards are seen. Otherwise a
    /// retry loop is spawned. A running feed is left alone.
    pub fn start(&self) {
        let mut state = self.inner.state();
        if state.task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::clone(&self.inner);

        let task = if self.inner.attach(&mut state, tx.clone()) {
            drop(tx);
            tokio::spawn(inner.forward(generation, rx))
        } else {
            self.inner.warn_missing();
            tokio::spawn(inner.acquire(generation, tx, rx))
        };
        state.task = Some(task);
    }

    /// Disconnect from the document and cancel any pending retry
    ///
    /// Batches produced before this call are marked stale.
    pub fn stop(&self) {
        let mut state = self.inner.state();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(task) = state.task.take() {
            task.abort();
        }
        match state.observer.take() {
            Some(observer) => {
                self.inner.document.mutate(|doc| doc.disconnect(observer));
                self.inner.log.info("Change feed stopped");
            }
            None => self.inner.log.info("Change feed acquisition cancelled"),
        }
    }

    /// Stop, then start against whatever container is present now
    pub fn restart(&self) {
        self.stop();
        self.start();
    }

    /// Whether the feed is subscribed to a container
    pub fn is_active(&self) -> bool {
        self.inner.state().observer.is_some()
    }

    /// Generation batches must carry to count
    pub fn current_generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }
}
