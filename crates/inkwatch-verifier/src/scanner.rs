//! Snapshot scans of the current transcript
//!
//! A scan looks at the document as it is right now. It checks both content
//! surfaces (rendered message bodies, then the raw-source attribute) and
//! reports every location that contains the fragment.

use inkwatch_core::{truncate_chars, Result, Surface, VerifierConfig};
use inkwatch_dom::{Document, NodeId, Selector};
use serde::{Deserialize, Serialize};

/// One place a fragment was found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanLocation {
    /// Which surface matched
    pub surface: Surface,
    /// Position among the elements of that surface
    pub index: usize,
    /// Leading part of the matched content
    pub excerpt: String,
}

/// Outcome of a snapshot scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub found: bool,
    pub locations: Vec<ScanLocation>,
}

impl ScanReport {
    pub fn not_found() -> Self {
        Self::default()
    }

    /// Locations on a given surface
    pub fn on_surface(&self, surface: Surface) -> impl Iterator<Item = &ScanLocation> {
        self.locations.iter().filter(move |l| l.surface == surface)
    }
}

/// First raw-source match, if any
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMatch {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// The most recent rendered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub text: String,
    pub index: usize,
}

/// Stateless scanner over the transcript layout described by the config
#[derive(Debug, Clone)]
pub struct SnapshotScanner {
    container: Selector,
    message: Selector,
    body: Selector,
    raw: Selector,
    raw_attribute: String,
    excerpt_chars: usize,
}

impl SnapshotScanner {
    /// Parse the configured selectors
    pub fn from_config(config: &VerifierConfig) -> Result<Self> {
        let selectors = &config.selectors;
        Ok(Self {
            container: Selector::parse(&selectors.container)?,
            message: Selector::parse(&selectors.message)?,
            body: Selector::parse(&selectors.body)?,
            raw: Selector::parse(&selectors.raw)?,
            raw_attribute: selectors.raw_attribute.clone(),
            excerpt_chars: config.excerpt_chars,
        })
    }

    pub fn container_selector(&self) -> &Selector {
        &self.container
    }

    pub fn raw_attribute(&self) -> &str {
        &self.raw_attribute
    }

    /// The observed container, if the page has one
    pub fn container(&self, doc: &Document) -> Option<NodeId> {
        doc.query_selector(&self.container)
    }

    fn excerpt(&self, text: &str) -> String {
        truncate_chars(text, self.excerpt_chars).to_string()
    }

    /// Scan both surfaces for `fragment`
    ///
    /// An empty fragment or a missing container yields an empty report.
    pub fn scan(&self, doc: &Document, fragment: &str) -> ScanReport {
        let Some(container) = self.container(doc) else {
            return ScanReport::not_found();
        };
        if fragment.is_empty() {
            return ScanReport::not_found();
        }

        let mut locations = Vec::new();

        for (index, body) in doc
            .query_selector_all_within(container, &self.body)
            .into_iter()
            .enumerate()
        {
            let text = doc.text_content(body);
            if text.contains(fragment) {
                locations.push(ScanLocation {
                    surface: Surface::MessageBody,
                    index,
                    excerpt: self.excerpt(&text),
                });
            }
        }

        for (index, message) in doc
            .query_selector_all_within(container, &self.raw)
            .into_iter()
            .enumerate()
        {
            if let Some(raw) = doc.attribute(message, &self.raw_attribute) {
                if raw.contains(fragment) {
                    locations.push(ScanLocation {
                        surface: Surface::DataRaw,
                        index,
                        excerpt: self.excerpt(raw),
                    });
                }
            }
        }

        ScanReport {
            found: !locations.is_empty(),
            locations,
        }
    }

    /// First message whose raw-source attribute contains `fragment`
    pub fn scan_raw(&self, doc: &Document, fragment: &str) -> RawMatch {
        let Some(container) = self.container(doc) else {
            return RawMatch::default();
        };
        if fragment.is_empty() {
            return RawMatch::default();
        }

        doc.query_selector_all_within(container, &self.raw)
            .into_iter()
            .enumerate()
            .find_map(|(index, message)| {
                let raw = doc.attribute(message, &self.raw_attribute)?;
                raw.contains(fragment).then(|| RawMatch {
                    found: true,
                    index: Some(index),
                    excerpt: Some(self.excerpt(raw)),
                })
            })
            .unwrap_or_default()
    }

    /// Number of message elements currently in the container
    pub fn message_count(&self, doc: &Document) -> usize {
        self.container(doc)
            .map(|container| {
                doc.query_selector_all_within(container, &self.message)
                    .len()
            })
            .unwrap_or(0)
    }

    /// Text and position of the last rendered body
    pub fn last_message(&self, doc: &Document) -> Option<LastMessage> {
        let container = self.container(doc)?;
        let bodies = doc.query_selector_all_within(container, &self.body);
        let index = bodies.len().checked_sub(1)?;
        Some(LastMessage {
            text: doc.text_content(bodies[index]),
            index,
        })
    }

    /// Rendered text and raw-source value of one element
    pub fn element_surfaces(&self, doc: &Document, node: NodeId) -> (String, String) {
        let text = doc.text_content(node);
        let raw = doc
            .attribute(node, &self.raw_attribute)
            .unwrap_or_default()
            .to_string();
        (text, raw)
    }
}
