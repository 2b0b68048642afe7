//! In-process document tree for Inkwatch
//!
//! The verification engine watches a chat transcript rendered as a document
//! tree. This crate is that tree: an arena of element and text nodes, a small
//! CSS selector engine, and a mutation-observation primitive that delivers
//! batched change records to subscribers.
//!
//! # Architecture
//!
//! - [`document`]: node arena, tree edits, text and attribute access
//! - [`selector`]: selector parsing and matching
//! - [`observer`]: mutation records, observer options and registrations
//! - [`handle`]: shared [`DocumentHandle`] that flushes one batch per edit
//! - [`fixture`]: chat transcript layouts used by the CLI and tests

pub mod document;
pub mod fixture;
pub mod handle;
pub mod observer;
pub mod selector;

pub use document::{Document, Element, NodeData, NodeId};
pub use fixture::{
    append_message, build_chat_document, build_page_without_container, create_message, Transcript,
    TranscriptMessage,
};
pub use handle::DocumentHandle;
pub use observer::{MutationBatch, MutationRecord, ObserveOptions, ObserverId};
pub use selector::Selector;
