//! Inbound and outbound message envelopes exchanged with the transport

use crate::runtime::TopLevelState;
use serde::{Deserialize, Serialize};

/// Wire form of an inbound message as posted by the transport adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEnvelope {
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub state: Option<TopLevelState>,
    #[serde(default)]
    pub text_content: Option<String>,
    #[serde(default)]
    pub image_content: Option<String>,
}

/// Payload of an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Text(String),
    /// Reference the image collaborator can fetch bytes from
    Image(String),
    /// Explicit switch into the envelope's top-level state (menu pick)
    Transition,
    /// Anything the core does not act on
    Unrecognized(String),
}

/// Inbound message as seen by the dispatcher and handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub user_id: String,
    pub kind: MessageKind,
    pub state: Option<TopLevelState>,
}

impl InboundMessage {
    pub fn text(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            kind: MessageKind::Text(text.into()),
            state: None,
        }
    }

    pub fn image(user_id: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            kind: MessageKind::Image(reference.into()),
            state: None,
        }
    }

    pub fn transition(user_id: impl Into<String>, state: TopLevelState) -> Self {
        Self {
            user_id: user_id.into(),
            kind: MessageKind::Transition,
            state: Some(state),
        }
    }

    #[allow(dead_code)] // Used in tests
    pub fn with_state(mut self, state: TopLevelState) -> Self {
        self.state = Some(state);
        self
    }

    /// Text content, if this is a text message
    pub fn text_content(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<InboundEnvelope> for InboundMessage {
    fn from(envelope: InboundEnvelope) -> Self {
        let kind = match envelope.kind.as_str() {
            "text" => MessageKind::Text(envelope.text_content.unwrap_or_default()),
            "image" => match envelope.image_content {
                Some(reference) => MessageKind::Image(reference),
                None => MessageKind::Unrecognized("image without content".to_string()),
            },
            "transition" => MessageKind::Transition,
            other => MessageKind::Unrecognized(other.to_string()),
        };
        Self {
            user_id: envelope.user_id,
            kind,
            state: envelope.state,
        }
    }
}

/// One part of an outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        #[serde(rename = "textContent")]
        text: String,
    },
    Image {
        #[serde(rename = "originalContentUrl")]
        original_url: String,
        #[serde(rename = "previewContentUrl")]
        preview_url: String,
    },
}

/// Ordered message parts addressed to one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub user_id: String,
    pub messages: Vec<MessagePart>,
}

impl OutboundMessage {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            messages: Vec::new(),
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.messages.push(MessagePart::Text { text: text.into() });
        self
    }

    pub fn image(mut self, original_url: impl Into<String>, preview_url: impl Into<String>) -> Self {
        self.messages.push(MessagePart::Image {
            original_url: original_url.into(),
            preview_url: preview_url.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Text parts in order, for logging and assertions
    pub fn texts(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                MessagePart::Image { .. } => None,
            })
            .collect()
    }
}
