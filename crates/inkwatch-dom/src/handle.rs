//! Shared document handle
//!
//! Every component that touches the document goes through a
//! [`DocumentHandle`]. Edits made inside one [`DocumentHandle::mutate`] call
//! reach observers as a single batch once the closure returns, the way a host
//! page coalesces DOM changes before notifying observers.

use std::sync::{Arc, PoisonError, RwLock};

use crate::document::Document;

/// Cloneable, thread-safe handle to a [`Document`]
#[derive(Debug, Clone, Default)]
pub struct DocumentHandle {
    inner: Arc<RwLock<Document>>,
}

impl DocumentHandle {
    pub fn new(document: Document) -> Self {
        Self {
            inner: Arc::new(RwLock::new(document)),
        }
    }

    /// Run a read-only closure against the document
    pub fn read<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Run an editing closure, then deliver the queued mutation records
    ///
    /// Delivery happens before the write lock is released, so observers see
    /// batches in the order the edits were made.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut guard);
        guard.flush_mutations();
        result
    }
}

impl From<Document> for DocumentHandle {
    fn from(document: Document) -> Self {
        Self::new(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::ObserveOptions;
    use tokio::sync::mpsc;

    #[test]
    fn test_mutate_delivers_one_batch_per_call() {
        let handle = DocumentHandle::default();
        let container = handle.mutate(|doc| {
            let container = doc.create_element_with_class("div", "messages");
            doc.append_child(doc.root(), container).map(|_| container)
        });
        let container = container.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        handle
            .mutate(|doc| doc.observe(container, ObserveOptions::subtree_content(), tx))
            .unwrap();

        handle
            .mutate(|doc| -> inkwatch_core::Result<()> {
                for text in ["one", "two", "three"] {
                    let node = doc.create_text(text);
                    doc.append_child(container, node)?;
                }
                Ok(())
            })
            .unwrap();

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.len(), 3);
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.read(|doc| doc.text_content(container)), "onetwothree");
    }

    #[test]
    fn test_clones_share_the_document() {
        let handle = DocumentHandle::default();
        let other = handle.clone();
        other.mutate(|doc| {
            let node = doc.create_element("main");
            doc.append_child(doc.root(), node)
        })
        .unwrap();
        assert_eq!(handle.read(|doc| doc.children(doc.root()).len()), 1);
    }
}
