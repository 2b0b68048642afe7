//! Mutation observation primitives
//!
//! Observers register on a target node with a set of options. Every edit made
//! through the document queues a [`MutationRecord`]; queued records are
//! delivered to interested observers as a single [`MutationBatch`] when the
//! document is flushed.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::document::NodeId;

/// Identifier of an observer registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObserverId(pub(crate) u64);

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// What kinds of changes an observer wants to hear about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObserveOptions {
    /// Children added to or removed from the target
    pub child_list: bool,
    /// Text node data edits
    pub character_data: bool,
    /// Attribute changes
    pub attributes: bool,
    /// Extend observation to every descendant of the target
    pub subtree: bool,
}

impl ObserveOptions {
    /// Structural and text changes anywhere below the target
    pub fn subtree_content() -> Self {
        Self {
            child_list: true,
            character_data: true,
            attributes: false,
            subtree: true,
        }
    }

    pub fn with_attributes(mut self) -> Self {
        self.attributes = true;
        self
    }

    /// Whether a record kind is covered by these options
    pub fn wants(&self, record: &MutationRecord) -> bool {
        match record {
            MutationRecord::ChildList { .. } => self.child_list,
            MutationRecord::CharacterData { .. } => self.character_data,
            MutationRecord::Attributes { .. } => self.attributes,
        }
    }
}

/// A single low-level change notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MutationRecord {
    /// Children of `target` changed
    ChildList {
        target: NodeId,
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    /// Data of the text node `target` changed
    CharacterData { target: NodeId },
    /// Attribute `name` of `target` changed
    Attributes { target: NodeId, name: String },
}

impl MutationRecord {
    pub fn target(&self) -> NodeId {
        match self {
            Self::ChildList { target, .. }
            | Self::CharacterData { target }
            | Self::Attributes { target, .. } => *target,
        }
    }
}

/// Records delivered together to one observer
pub type MutationBatch = Vec<MutationRecord>;

/// A live observer registration held by the document
#[derive(Debug)]
pub(crate) struct Registration {
    pub(crate) id: ObserverId,
    pub(crate) target: NodeId,
    pub(crate) options: ObserveOptions,
    pub(crate) sender: mpsc::UnboundedSender<MutationBatch>,
}
