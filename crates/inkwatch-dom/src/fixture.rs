//! Chat transcript layouts
//!
//! Builds documents shaped like the chat UI the engine watches:
//!
//! ```text
//! html > body > div#chat > div.messages
//!     > div.message[data-raw] > div.message-body > "text"
//! ```

use inkwatch_core::Result;
use serde::{Deserialize, Serialize};

use crate::document::{Document, NodeId};

/// One chat message as rendered by the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    /// Rendered body text
    pub text: String,
    /// Raw source stored on the message element, if any
    #[serde(default)]
    pub raw: Option<String>,
    /// Extra class such as `user` or `assistant`
    #[serde(default)]
    pub role: Option<String>,
}

impl TranscriptMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            raw: None,
            role: None,
        }
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// A full transcript
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    #[serde(default)]
    pub messages: Vec<TranscriptMessage>,
}

impl Transcript {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Build a document holding the transcript
///
/// Returns the document and the `.messages` container.
pub fn build_chat_document(transcript: &Transcript) -> Result<(Document, NodeId)> {
    let mut doc = Document::new();
    let html = doc.create_element("html");
    let body = doc.create_element("body");
    let chat = doc.create_element("div");
    doc.set_attribute(chat, "id", "chat")?;
    let container = doc.create_element_with_class("div", "messages");

    doc.append_child(doc.root(), html)?;
    doc.append_child(html, body)?;
    doc.append_child(body, chat)?;
    doc.append_child(chat, container)?;

    for message in &transcript.messages {
        append_message(&mut doc, container, message)?;
    }
    Ok((doc, container))
}

/// Build the page chrome without a message container
///
/// Returns the document and the `#chat` element the container belongs in.
pub fn build_page_without_container() -> Result<(Document, NodeId)> {
    let mut doc = Document::new();
    let html = doc.create_element("html");
    let body = doc.create_element("body");
    let chat = doc.create_element("div");
    doc.set_attribute(chat, "id", "chat")?;

    doc.append_child(doc.root(), html)?;
    doc.append_child(html, body)?;
    doc.append_child(body, chat)?;
    Ok((doc, chat))
}

/// Create a message element (detached)
pub fn create_message(doc: &mut Document, message: &TranscriptMessage) -> Result<NodeId> {
    let class = match &message.role {
        Some(role) => format!("message {}", role),
        None => "message".to_string(),
    };
    let element = doc.create_element_with_class("div", &class);
    if let Some(raw) = &message.raw {
        doc.set_attribute(element, "data-raw", raw)?;
    }

    let body = doc.create_element_with_class("div", "message-body");
    let text = doc.create_text(&message.text);
    doc.append_child(body, text)?;
    doc.append_child(element, body)?;
    Ok(element)
}

/// Append one message element to `container`
pub fn append_message(
    doc: &mut Document,
    container: NodeId,
    message: &TranscriptMessage,
) -> Result<NodeId> {
    let element = create_message(doc, message)?;
    doc.append_child(container, element)?;
    Ok(element)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::Selector;

    #[test]
    fn test_build_chat_document_layout() {
        let transcript = Transcript {
            messages: vec![
                TranscriptMessage::new("hello").with_role("user"),
                TranscriptMessage::new("rendered reply").with_raw("*rendered* reply"),
            ],
        };
        let (doc, container) = build_chat_document(&transcript).unwrap();

        let messages = doc.query_selector_all(&Selector::parse(".messages .message").unwrap());
        assert_eq!(messages.len(), 2);
        assert!(doc.element(messages[0]).unwrap().has_class("user"));
        assert_eq!(
            doc.query_selector_all(&Selector::parse(".message[data-raw]").unwrap())
                .len(),
            1
        );
        assert_eq!(doc.text_content(container), "hellorendered reply");
        assert_eq!(doc.query_selector(&Selector::parse("#chat > .messages").unwrap()), Some(container));
    }

    #[test]
    fn test_transcript_from_json() {
        let transcript = Transcript::from_json(
            r#"{"messages": [{"text": "hi"}, {"text": "there", "raw": "there!", "role": "assistant"}]}"#,
        )
        .unwrap();
        assert_eq!(transcript.messages.len(), 2);
        assert_eq!(transcript.messages[1].raw.as_deref(), Some("there!"));
        assert!(Transcript::from_json("not json").is_err());
    }

    #[test]
    fn test_page_without_container() {
        let (doc, chat) = build_page_without_container().unwrap();
        assert!(doc.query_selector(&Selector::parse(".messages").unwrap()).is_none());
        assert!(doc.is_connected(chat));
    }
}
