//! Expectation registry
//!
//! Pending expectations keyed by a monotonically increasing id. Settling an
//! expectation removes its entry under the registry lock and only then hands
//! the result to the waiting caller, so a match and a timeout racing for the
//! same id can never both resolve it: whichever removes the entry first wins
//! and the other finds nothing.

use inkwatch_core::Surface;
use inkwatch_dom::NodeId;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::result::VerificationResult;

/// How an expectation came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Matched {
        found_in: Option<Surface>,
        node: NodeId,
    },
    TimedOut,
}

/// One in-flight expectation
#[derive(Debug)]
struct PendingVerification {
    fragment: String,
    created_at: Instant,
    resolver: oneshot::Sender<VerificationResult>,
    timer: Option<AbortHandle>,
}

impl PendingVerification {
    /// Consume the entry and deliver its result
    fn finish(self, id: u64, settlement: Settlement) -> VerificationResult {
        let elapsed = self.created_at.elapsed();
        let result = match settlement {
            Settlement::Matched { found_in, node } => {
                if let Some(timer) = &self.timer {
                    timer.abort();
                }
                VerificationResult::matched(id, found_in, node, elapsed)
            }
            Settlement::TimedOut => VerificationResult::timed_out(Some(id), elapsed),
        };
        // The caller may have dropped its future; the entry is gone either way
        let _ = self.resolver.send(result.clone());
        result
    }
}

/// A change-feed match, for logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedExpectation {
    pub id: u64,
    pub fragment: String,
    pub result: VerificationResult,
}

/// Mapping from expectation id to pending verification
#[derive(Debug)]
pub struct Registry {
    next_id: AtomicU64,
    pending: Mutex<BTreeMap<u64, PendingVerification>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, PendingVerification>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new expectation and return its id and result receiver
    pub fn register(&self, fragment: &str) -> (u64, oneshot::Receiver<VerificationResult>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (resolver, receiver) = oneshot::channel();
        self.lock().insert(
            id,
            PendingVerification {
                fragment: fragment.to_string(),
                created_at: Instant::now(),
                resolver,
                timer: None,
            },
        );
        (id, receiver)
    }

    /// Attach the timeout task to a pending entry
    ///
    /// If the entry already settled the timer is aborted on the spot and
    /// `false` is returned.
    pub fn attach_timer(&self, id: u64, timer: AbortHandle) -> bool {
        let mut pending = self.lock();
        match pending.get_mut(&id) {
            Some(entry) => {
                if let Some(previous) = entry.timer.replace(timer) {
                    previous.abort();
                }
                true
            }
            None => {
                timer.abort();
                false
            }
        }
    }

    /// Settle one expectation; `None` when it was already settled
    pub fn settle(&self, id: u64, settlement: Settlement) -> Option<VerificationResult> {
        let entry = self.lock().remove(&id)?;
        Some(entry.finish(id, settlement))
    }

    /// Settle an expectation as timed out
    pub fn expire(&self, id: u64) -> Option<VerificationResult> {
        self.settle(id, Settlement::TimedOut)
    }

    /// Test an element's content against every pending fragment
    ///
    /// The rendered text and raw-source value are joined with a space and each
    /// pending fragment, in registration order, is checked for containment.
    /// Every matching expectation is removed and resolved.
    pub fn settle_matches(&self, node: NodeId, text: &str, raw: &str) -> Vec<MatchedExpectation> {
        let combined = format!("{} {}", text, raw);

        let taken: Vec<(u64, PendingVerification)> = {
            let mut pending = self.lock();
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, entry)| combined.contains(&entry.fragment))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        taken
            .into_iter()
            .map(|(id, entry)| {
                let found_in = if text.contains(&entry.fragment) {
                    Some(Surface::MessageBody)
                } else if raw.contains(&entry.fragment) {
                    Some(Surface::DataRaw)
                } else {
                    None
                };
                let fragment = entry.fragment.clone();
                let result = entry.finish(id, Settlement::Matched { found_in, node });
                MatchedExpectation {
                    id,
                    fragment,
                    result,
                }
            })
            .collect()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
