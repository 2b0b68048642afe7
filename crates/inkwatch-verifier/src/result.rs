//! Verification result values
//!
//! Every public verification path resolves to one of these. Not finding the
//! fragment, or running out of time, is a result and not an error.

use inkwatch_core::Surface;
use inkwatch_dom::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::scanner::{ScanLocation, ScanReport};

/// Outcome of `expect_message` or `wait_for_message`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verified: bool,
    /// Expectation id (change-feed path only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub timed_out: bool,
    pub duration_ms: u64,
    /// Surface that satisfied a change-feed match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub found_in: Option<Surface>,
    /// Element whose change satisfied a change-feed match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,
    /// Scan locations (polling path only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<ScanLocation>,
}

impl VerificationResult {
    /// Change-feed match
    pub fn matched(id: u64, found_in: Option<Surface>, node: NodeId, elapsed: Duration) -> Self {
        Self {
            verified: true,
            id: Some(id),
            duration_ms: millis(elapsed),
            found_in,
            node: Some(node),
            ..Self::default()
        }
    }

    /// Snapshot poll that found the fragment
    pub fn found(report: ScanReport, elapsed: Duration) -> Self {
        Self {
            verified: report.found,
            duration_ms: millis(elapsed),
            locations: report.locations,
            ..Self::default()
        }
    }

    pub fn timed_out(id: Option<u64>, elapsed: Duration) -> Self {
        Self {
            verified: false,
            id,
            timed_out: true,
            duration_ms: millis(elapsed),
            ..Self::default()
        }
    }

    /// The engine went away before the expectation settled
    pub fn abandoned(id: u64) -> Self {
        Self {
            verified: false,
            id: Some(id),
            ..Self::default()
        }
    }
}

pub(crate) fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
