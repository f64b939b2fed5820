//! Chat language model trait used for summarization and answer generation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Who a chat message comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Top-level instructions.
    System,
    /// Operator-supplied material, such as retrieved context.
    Developer,
    /// The end user.
    User,
    /// A previous model reply.
    Assistant,
}

/// One message in a chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The author of the message.
    pub role: Role,
    /// The message text.
    pub content: String,
}

impl Message {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    /// A developer message.
    pub fn developer(content: impl Into<String>) -> Self {
        Self { role: Role::Developer, content: content.into() }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// A chat completion backend.
///
/// Implementations send an ordered list of [`Message`]s and return the
/// assistant's reply text.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a reply to `messages`.
    async fn generate(&self, messages: &[Message]) -> Result<String>;

    /// A short name used in logs and errors.
    fn name(&self) -> &str {
        "llm"
    }
}
