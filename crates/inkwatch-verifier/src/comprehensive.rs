//! Multi-method verification verdicts
//!
//! A comprehensive verification runs four independent checks and accepts the
//! message when at least [`QUORUM`] of them agree. Every method runs to
//! completion so the verdict records how the message was confirmed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::count::CountCheck;
use crate::result::{millis, VerificationResult};
use crate::scanner::{RawMatch, ScanReport};

/// Confirmations needed for an overall verified verdict
pub const QUORUM: usize = 2;

/// Number of methods a verdict aggregates
pub const METHOD_COUNT: usize = 4;

/// Outcome of each method
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationMethods {
    /// Snapshot scan at the start
    pub immediate: ScanReport,
    /// Polled wait with half the budget
    pub wait_for: VerificationResult,
    /// Message count growth since the baseline
    pub count: CountCheck,
    /// Raw-source attribute probe
    pub data_raw: RawMatch,
}

impl VerificationMethods {
    /// Success flags in method order
    pub fn outcomes(&self) -> [bool; METHOD_COUNT] {
        [
            self.immediate.found,
            self.wait_for.verified,
            self.count.verified,
            self.data_raw.found,
        ]
    }

    pub fn confirmations(&self) -> usize {
        self.outcomes().iter().filter(|ok| **ok).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComprehensiveVerdict {
    pub expected_text: String,
    pub started_at: DateTime<Utc>,
    pub methods: VerificationMethods,
    pub confirmations: usize,
    pub overall_verified: bool,
    pub duration_ms: u64,
}

impl ComprehensiveVerdict {
    pub fn from_methods(
        expected_text: &str,
        started_at: DateTime<Utc>,
        methods: VerificationMethods,
        elapsed: Duration,
    ) -> Self {
        let confirmations = methods.confirmations();
        Self {
            expected_text: expected_text.to_string(),
            started_at,
            methods,
            confirmations,
            overall_verified: confirmations >= QUORUM,
            duration_ms: millis(elapsed),
        }
    }

    /// `VERIFIED` or `NOT VERIFIED`
    pub fn label(&self) -> &'static str {
        if self.overall_verified {
            "VERIFIED"
        } else {
            "NOT VERIFIED"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::ScanLocation;
    use inkwatch_core::Surface;

    fn found_scan() -> ScanReport {
        ScanReport {
            found: true,
            locations: vec![ScanLocation {
                surface: Surface::MessageBody,
                index: 0,
                excerpt: "hello".to_string(),
            }],
        }
    }

    fn verdict(methods: VerificationMethods) -> ComprehensiveVerdict {
        ComprehensiveVerdict::from_methods("hello", Utc::now(), methods, Duration::from_millis(5))
    }

    #[test]
    fn test_two_of_four_is_verified() {
        let methods = VerificationMethods {
            immediate: found_scan(),
            data_raw: RawMatch {
                found: true,
                index: Some(0),
                excerpt: Some("hello".to_string()),
            },
            ..VerificationMethods::default()
        };
        let verdict = verdict(methods);
        assert_eq!(verdict.confirmations, 2);
        assert!(verdict.overall_verified);
        assert_eq!(verdict.label(), "VERIFIED");
    }

    #[test]
    fn test_one_of_four_is_not_verified() {
        let methods = VerificationMethods {
            count: CountCheck::new(0, 1),
            ..VerificationMethods::default()
        };
        let verdict = verdict(methods);
        assert_eq!(verdict.confirmations, 1);
        assert!(!verdict.overall_verified);
        assert_eq!(verdict.label(), "NOT VERIFIED");
    }

    #[test]
    fn test_all_methods_counted() {
        let methods = VerificationMethods {
            immediate: found_scan(),
            wait_for: VerificationResult {
                verified: true,
                ..VerificationResult::default()
            },
            count: CountCheck::new(4, 6),
            data_raw: RawMatch {
                found: true,
                ..RawMatch::default()
            },
        };
        assert_eq!(methods.outcomes(), [true; METHOD_COUNT]);
        assert_eq!(verdict(methods).confirmations, METHOD_COUNT);
    }

    #[test]
    fn test_verdict_serializes_snake_case() {
        let json = serde_json::to_value(verdict(VerificationMethods::default())).unwrap();
        assert_eq!(json["overall_verified"], false);
        assert_eq!(json["methods"]["wait_for"]["verified"], false);
        assert!(json["started_at"].is_string());
    }
}
