//! Verifier error types - re-exports unified InkwatchError from inkwatch-core
//!
//! Verification itself never fails: a missing fragment or an expired timeout
//! is reported through the result types. Errors cover setup problems only:
//! - UnsupportedSelector(String) - a configured selector could not be parsed
//! - EmptyFragment - an expectation was registered for empty text
//! - Config(String) - configuration values the engine cannot run with

pub use inkwatch_core::{InkwatchError, Result};

// Shorthand used across the verifier
pub type VerifierError = InkwatchError;
