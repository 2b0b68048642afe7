//! Arena-backed document tree
//!
//! Nodes live in a `Vec` and are addressed by [`NodeId`]. Removed nodes stay
//! in the arena (detached), so ids handed to observers remain readable after
//! the node leaves the tree.

use inkwatch_core::{InkwatchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::observer::{MutationBatch, MutationRecord, ObserveOptions, ObserverId, Registration};
use crate::selector::{Combinator, Part, Selector, Step};

/// Index of a node in the document arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Element payload: tag name and attributes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
}

impl Element {
    /// Whitespace-separated entries of the `class` attribute
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .get("class")
            .map(String::as_str)
            .unwrap_or("")
            .split_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: NodeData,
}

/// A mutable document tree with observer support
#[derive(Debug)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    observers: Vec<Registration>,
    next_observer: u64,
    queued: Vec<MutationRecord>,
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                data: NodeData::Document,
            }],
            root: NodeId(0),
            observers: Vec::new(),
            next_observer: 1,
            queued: Vec::new(),
        }
    }

    /// The document node
    pub fn root(&self) -> NodeId {
        self.root
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(InkwatchError::NodeNotFound(id.0))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .ok_or(InkwatchError::NodeNotFound(id.0))
    }

    fn push_node(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            data,
        });
        id
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Create a detached element
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push_node(NodeData::Element(Element {
            tag: tag.to_ascii_lowercase(),
            attributes: BTreeMap::new(),
        }))
    }

    /// Create a detached element with a class list
    pub fn create_element_with_class(&mut self, tag: &str, class: &str) -> NodeId {
        let id = self.create_element(tag);
        if let Some(NodeData::Element(element)) = self.nodes.get_mut(id.0).map(|n| &mut n.data) {
            element
                .attributes
                .insert("class".to_string(), class.to_string());
        }
        id
    }

    /// Create a detached element that the selector's rightmost compound matches
    ///
    /// Uses the first group. The tag defaults to `div` when the compound names
    /// none, and attributes required without a value are set empty. Ancestor
    /// compounds are not built, so the element only matches the whole
    /// selector once it is placed under matching ancestors.
    pub fn create_matching_element(&mut self, selector: &Selector) -> NodeId {
        let step = selector
            .groups()
            .first()
            .and_then(|parts| parts.last())
            .map(|part| &part.step);

        let mut attributes = BTreeMap::new();
        let mut tag = "div";
        if let Some(step) = step {
            if let Some(name) = step.tag.as_deref() {
                tag = name;
            }
            if let Some(id) = &step.id {
                attributes.insert("id".to_string(), id.clone());
            }
            if !step.classes.is_empty() {
                attributes.insert("class".to_string(), step.classes.join(" "));
            }
            for attr in &step.attrs {
                attributes.insert(attr.name.clone(), attr.value.clone().unwrap_or_default());
            }
        }

        self.push_node(NodeData::Element(Element {
            tag: tag.to_ascii_lowercase(),
            attributes,
        }))
    }

    /// Create a detached text node
    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push_node(NodeData::Text(text.to_string()))
    }

    // ------------------------------------------------------------------
    // Tree edits
    // ------------------------------------------------------------------

    /// Append `child` as the last child of `parent`
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` before `reference` (or at the end when `None`)
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<()> {
        self.check_insertable(parent, child)?;

        if let Some(old_parent) = self.node(child)?.parent {
            self.detach(old_parent, child)?;
            self.queue(MutationRecord::ChildList {
                target: old_parent,
                added: vec![],
                removed: vec![child],
            });
        }

        let position = match reference {
            Some(reference) => self
                .node(parent)?
                .children
                .iter()
                .position(|c| *c == reference)
                .ok_or_else(|| {
                    InkwatchError::InvalidHierarchy(format!(
                        "{} is not a child of {}",
                        reference, parent
                    ))
                })?,
            None => self.node(parent)?.children.len(),
        };

        self.node_mut(parent)?.children.insert(position, child);
        self.node_mut(child)?.parent = Some(parent);
        self.queue(MutationRecord::ChildList {
            target: parent,
            added: vec![child],
            removed: vec![],
        });
        Ok(())
    }

    /// Remove `child` from `parent`
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.detach(parent, child)?;
        self.queue(MutationRecord::ChildList {
            target: parent,
            added: vec![],
            removed: vec![child],
        });
        Ok(())
    }

    /// Replace `old` (a child of `parent`) with `new`
    pub fn replace_child(&mut self, parent: NodeId, new: NodeId, old: NodeId) -> Result<()> {
        if new == old {
            return Ok(());
        }
        self.check_insertable(parent, new)?;
        if self.node(old)?.parent != Some(parent) {
            return Err(InkwatchError::InvalidHierarchy(format!(
                "{} is not a child of {}",
                old, parent
            )));
        }

        if let Some(old_parent) = self.node(new)?.parent {
            self.detach(old_parent, new)?;
            self.queue(MutationRecord::ChildList {
                target: old_parent,
                added: vec![],
                removed: vec![new],
            });
        }

        let position = self
            .node(parent)?
            .children
            .iter()
            .position(|c| *c == old)
            .ok_or(InkwatchError::NodeNotFound(old.0))?;
        self.node_mut(parent)?.children[position] = new;
        self.node_mut(old)?.parent = None;
        self.node_mut(new)?.parent = Some(parent);
        self.queue(MutationRecord::ChildList {
            target: parent,
            added: vec![new],
            removed: vec![old],
        });
        Ok(())
    }

    /// Replace the data of a text node
    pub fn set_text(&mut self, text_node: NodeId, text: &str) -> Result<()> {
        match &mut self.node_mut(text_node)?.data {
            NodeData::Text(data) => {
                *data = text.to_string();
            }
            _ => {
                return Err(InkwatchError::InvalidHierarchy(format!(
                    "{} is not a text node",
                    text_node
                )))
            }
        }
        self.queue(MutationRecord::CharacterData { target: text_node });
        Ok(())
    }

    /// Replace all children of an element with a single text node
    pub fn set_text_content(&mut self, element: NodeId, text: &str) -> Result<()> {
        self.element(element)?;
        let removed = std::mem::take(&mut self.node_mut(element)?.children);
        for child in &removed {
            self.node_mut(*child)?.parent = None;
        }

        let mut added = Vec::new();
        if !text.is_empty() {
            let text_node = self.create_text(text);
            self.node_mut(element)?.children.push(text_node);
            self.node_mut(text_node)?.parent = Some(element);
            added.push(text_node);
        }

        self.queue(MutationRecord::ChildList {
            target: element,
            added,
            removed,
        });
        Ok(())
    }

    pub fn set_attribute(&mut self, element: NodeId, name: &str, value: &str) -> Result<()> {
        self.element_mut(element)?
            .attributes
            .insert(name.to_string(), value.to_string());
        self.queue(MutationRecord::Attributes {
            target: element,
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn remove_attribute(&mut self, element: NodeId, name: &str) -> Result<()> {
        if self.element_mut(element)?.attributes.remove(name).is_some() {
            self.queue(MutationRecord::Attributes {
                target: element,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn check_insertable(&self, parent: NodeId, child: NodeId) -> Result<()> {
        match &self.node(parent)?.data {
            NodeData::Document | NodeData::Element(_) => {}
            NodeData::Text(_) => {
                return Err(InkwatchError::InvalidHierarchy(format!(
                    "text node {} cannot have children",
                    parent
                )))
            }
        }
        if matches!(self.node(child)?.data, NodeData::Document) {
            return Err(InkwatchError::InvalidHierarchy(
                "the document node cannot be inserted".to_string(),
            ));
        }
        if self.contains(child, parent) {
            return Err(InkwatchError::InvalidHierarchy(format!(
                "{} would become its own ancestor",
                child
            )));
        }
        Ok(())
    }

    fn detach(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let children = &mut self.node_mut(parent)?.children;
        let position = children.iter().position(|c| *c == child).ok_or_else(|| {
            InkwatchError::InvalidHierarchy(format!("{} is not a child of {}", child, parent))
        })?;
        children.remove(position);
        self.node_mut(child)?.parent = None;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Access
    // ------------------------------------------------------------------

    pub fn data(&self, id: NodeId) -> Result<&NodeData> {
        Ok(&self.node(id)?.data)
    }

    pub fn element(&self, id: NodeId) -> Result<&Element> {
        match &self.node(id)?.data {
            NodeData::Element(element) => Ok(element),
            _ => Err(InkwatchError::InvalidHierarchy(format!(
                "{} is not an element",
                id
            ))),
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut Element> {
        match &mut self.node_mut(id)?.data {
            NodeData::Element(element) => Ok(element),
            _ => Err(InkwatchError::InvalidHierarchy(format!(
                "{} is not an element",
                id
            ))),
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.node(id).map(|n| &n.data), Ok(NodeData::Element(_)))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    /// Nearest element at or above `id`
    pub fn nearest_element(&self, id: NodeId) -> Option<NodeId> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if self.is_element(current) {
                return Some(current);
            }
            cursor = self.parent(current);
        }
        None
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.0)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)
            .ok()
            .and_then(|e| e.attributes.get(name))
            .map(String::as_str)
    }

    /// Concatenated text of all descendant text nodes, in document order
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.nodes.get(id.0) else {
            return;
        };
        match &node.data {
            NodeData::Text(text) => out.push_str(text),
            NodeData::Document | NodeData::Element(_) => {
                for child in &node.children {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    /// First text node at or below `id`, in document order
    pub fn first_text_descendant(&self, id: NodeId) -> Option<NodeId> {
        let node = self.nodes.get(id.0)?;
        if matches!(node.data, NodeData::Text(_)) {
            return Some(id);
        }
        node.children
            .iter()
            .find_map(|child| self.first_text_descendant(*child))
    }

    /// Whether `node` is `ancestor` or one of its descendants
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// Whether the node is attached to the document
    pub fn is_connected(&self, id: NodeId) -> bool {
        self.contains(self.root, id)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// First matching element in the document
    pub fn query_selector(&self, selector: &Selector) -> Option<NodeId> {
        self.query_selector_all(selector).into_iter().next()
    }

    /// All matching elements in the document, in document order
    pub fn query_selector_all(&self, selector: &Selector) -> Vec<NodeId> {
        let mut candidates = Vec::new();
        self.collect_elements(self.root, &mut candidates);
        candidates.retain(|id| self.matches(*id, selector));
        candidates
    }

    /// First matching descendant of `root`
    pub fn query_selector_within(&self, root: NodeId, selector: &Selector) -> Option<NodeId> {
        self.query_selector_all_within(root, selector)
            .into_iter()
            .next()
    }

    /// All matching descendants of `root` (excluding `root`), in document order
    pub fn query_selector_all_within(&self, root: NodeId, selector: &Selector) -> Vec<NodeId> {
        let mut candidates = Vec::new();
        for child in self.children(root) {
            self.collect_elements(*child, &mut candidates);
        }
        candidates.retain(|id| self.matches(*id, selector));
        candidates
    }

    /// Whether the element matches any group of the selector
    pub fn matches(&self, id: NodeId, selector: &Selector) -> bool {
        self.is_element(id)
            && selector
                .groups()
                .iter()
                .any(|parts| self.matches_chain(id, parts))
    }

    fn collect_elements(&self, id: NodeId, out: &mut Vec<NodeId>) {
        if self.is_element(id) {
            out.push(id);
        }
        for child in self.children(id) {
            self.collect_elements(*child, out);
        }
    }

    fn matches_chain(&self, id: NodeId, parts: &[Part]) -> bool {
        let Some((last, rest)) = parts.split_last() else {
            return false;
        };
        if !self.matches_step(id, &last.step) {
            return false;
        }
        match last.combinator {
            None => rest.is_empty(),
            Some(Combinator::Child) => self
                .parent(id)
                .is_some_and(|parent| self.matches_chain(parent, rest)),
            Some(Combinator::Descendant) => {
                let mut cursor = self.parent(id);
                while let Some(ancestor) = cursor {
                    if self.matches_chain(ancestor, rest) {
                        return true;
                    }
                    cursor = self.parent(ancestor);
                }
                false
            }
        }
    }

    fn matches_step(&self, id: NodeId, step: &Step) -> bool {
        let Ok(element) = self.element(id) else {
            return false;
        };
        if let Some(tag) = &step.tag {
            if &element.tag != tag {
                return false;
            }
        }
        if let Some(expected) = &step.id {
            if element.attributes.get("id") != Some(expected) {
                return false;
            }
        }
        if !step.classes.iter().all(|class| element.has_class(class)) {
            return false;
        }
        step.attrs.iter().all(|cond| {
            match (element.attributes.get(&cond.name), &cond.value) {
                (Some(_), None) => true,
                (Some(actual), Some(expected)) => actual == expected,
                (None, _) => false,
            }
        })
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Register an observer on `target`
    pub fn observe(
        &mut self,
        target: NodeId,
        options: ObserveOptions,
        sender: mpsc::UnboundedSender<MutationBatch>,
    ) -> Result<ObserverId> {
        self.node(target)?;
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push(Registration {
            id,
            target,
            options,
            sender,
        });
        debug!("Registered {} on {}", id, target);
        Ok(id)
    }

    /// Remove an observer; returns `false` when it was not registered
    pub fn disconnect(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|r| r.id != id);
        self.observers.len() != before
    }

    pub fn is_observing(&self, id: ObserverId) -> bool {
        self.observers.iter().any(|r| r.id == id)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn queue(&mut self, record: MutationRecord) {
        if !self.observers.is_empty() {
            self.queued.push(record);
        }
    }

    /// Deliver queued records to interested observers, one batch each
    ///
    /// Observers whose receiver has gone away are dropped. Returns the number
    /// of batches delivered.
    pub fn flush_mutations(&mut self) -> usize {
        if self.queued.is_empty() {
            return 0;
        }
        let records = std::mem::take(&mut self.queued);
        let mut delivered = 0;
        let mut closed = Vec::new();

        for registration in &self.observers {
            let batch: MutationBatch = records
                .iter()
                .filter(|record| registration.options.wants(record))
                .filter(|record| {
                    let target = record.target();
                    target == registration.target
                        || (registration.options.subtree
                            && self.contains(registration.target, target))
                })
                .cloned()
                .collect();

            if batch.is_empty() {
                continue;
            }
            if registration.sender.send(batch).is_err() {
                closed.push(registration.id);
            } else {
                delivered += 1;
            }
        }

        if !closed.is_empty() {
            self.observers.retain(|r| !closed.contains(&r.id));
        }
        delivered
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}
