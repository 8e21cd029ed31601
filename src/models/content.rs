//! Prompt and message content blocks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tagged content block carried by prompts and message chunks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text itself.
        text: String,
    },
    /// Reference to a resource the agent can fetch.
    ResourceLink {
        /// Resource URI.
        uri: String,
        /// Display name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// MIME type.
        #[serde(
            default,
            rename = "mimeType",
            skip_serializing_if = "Option::is_none"
        )]
        mime_type: Option<String>,
        /// Display title.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    /// Inline image.
    Image {
        /// Base64 payload.
        data: String,
        /// MIME type.
        #[serde(rename = "mimeType")]
        mime_type: String,
        /// Optional source URI.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uri: Option<String>,
    },
    /// Inline audio.
    Audio {
        /// Base64 payload.
        data: String,
        /// MIME type.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Embedded resource contents.
    Resource {
        /// Opaque resource payload.
        resource: Value,
    },
    /// Any block type this crate does not model.
    #[serde(other)]
    Unsupported,
}

impl ContentBlock {
    /// Shorthand for a text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Text payload, if this is a text block.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}
