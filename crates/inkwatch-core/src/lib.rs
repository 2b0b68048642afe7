//! # inkwatch-core
//!
//! Core types for the Inkwatch message verification engine.
//!
//! Inkwatch answers one question with bounded latency: has an expected text
//! fragment actually shown up in a live, constantly mutating chat transcript?
//!
//! ## Contents
//!
//! - [`InkwatchError`] and the crate-wide [`Result`] alias
//! - [`VerifierConfig`] loaded from TOML
//! - Shared value types: log levels and entries, content surfaces

pub mod config;
mod error;
mod types;

pub use config::{SelectorConfig, VerifierConfig};
pub use error::{InkwatchError, Result};
pub use types::*;
