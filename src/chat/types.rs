//! Request and response types for the OpenAI-compatible chat API.

use serde::{Deserialize, Serialize};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Body of `POST /v1/chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: false,
            temperature: None,
            max_tokens: None,
        }
    }

    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// One `data:` payload of a streamed completion.
///
/// Kept as raw JSON: each text field is looked up on its own, so an oddly
/// typed sibling cannot hide the token.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ChunkRecord(serde_json::Value);

impl ChunkRecord {
    /// Text carried by the first choice.
    ///
    /// Prefers `delta.content`, then `text`, then `message.content`; empty
    /// strings and non-string values count as absent.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        let choice = self.0.get("choices")?.get(0)?;
        let text = |pointer: &str| {
            choice
                .pointer(pointer)
                .and_then(serde_json::Value::as_str)
                .filter(|s| !s.is_empty())
        };

        text("/delta/content")
            .or_else(|| text("/text"))
            .or_else(|| text("/message/content"))
    }
}

/// Assistant text of a non-streaming completion response.
#[must_use]
pub fn completion_text(response: &serde_json::Value) -> Option<String> {
    let choice = response.get("choices")?.get(0)?;
    choice
        .pointer("/message/content")
        .or_else(|| choice.get("text"))
        .and_then(serde_json::Value::as_str)
        .map(String::from)
}
