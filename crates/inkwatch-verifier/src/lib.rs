//! Message verification for live chat transcripts
//!
//! Confirms that an expected piece of text actually shows up in the message
//! list of a chat UI, as rendered text or as the raw source a message element
//! carries. Several independent signals are available and can be combined
//! into a quorum verdict.
//!
//! # Example
//!
//! ```no_run
//! use inkwatch_core::VerifierConfig;
//! use inkwatch_dom::{build_chat_document, DocumentHandle, Transcript};
//! use inkwatch_verifier::VerificationEngine;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> inkwatch_core::Result<()> {
//!     let (doc, _container) = build_chat_document(&Transcript::default())?;
//!     let engine = VerificationEngine::new(DocumentHandle::new(doc), VerifierConfig::default())?;
//!     engine.init();
//!
//!     let pending = engine.expect_message("hello", Some(Duration::from_secs(5)))?;
//!     // ... the UI appends a message ...
//!     let result = pending.await;
//!     println!("verified: {}", result.verified);
//!
//!     let verdict = engine.comprehensive_verify("hello", None).await;
//!     println!("{}/4 confirmations", verdict.confirmations);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`engine`]: [`VerificationEngine`], the per-session entry point
//! - [`scanner`]: snapshot scans of both content surfaces
//! - [`feed`]: change feed over the message container
//! - [`registry`]: pending expectations and single resolution
//! - [`count`]: message count baselines
//! - [`comprehensive`]: four-method quorum verdicts
//! - [`log_sink`]: the engine's diagnostic log
//! - [`error`]: error types

pub mod comprehensive;
pub mod count;
pub mod engine;
pub mod error;
pub mod feed;
pub mod log_sink;
pub mod registry;
pub mod result;
pub mod scanner;

// Re-export commonly used types
pub use comprehensive::{ComprehensiveVerdict, VerificationMethods, QUORUM};
pub use count::{CountCheck, CountMonitor, CountVerification};
pub use engine::{EngineStatus, Expectation, VerificationEngine};
pub use error::{Result, VerifierError};
pub use feed::{AffectedBatch, ChangeFeed};
pub use log_sink::LogSink;
pub use registry::{MatchedExpectation, Registry, Settlement};
pub use result::VerificationResult;
pub use scanner::{LastMessage, RawMatch, ScanLocation, ScanReport, SnapshotScanner};
