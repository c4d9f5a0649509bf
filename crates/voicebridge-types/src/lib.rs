//! Shared types for the Voicebridge platform.
//!
//! This crate provides the foundational enums used across all Voicebridge
//! crates: call session status, conversation message roles, and message
//! kinds. No crate in the workspace depends on anything *except*
//! `voicebridge-types` for cross-cutting type definitions, which keeps the
//! dependency graph clean.

use serde::{Deserialize, Serialize};

/// Status of a call session.
///
/// Transitions only ever go `InProgress -> Completed`; a completed session
/// is terminal and never reopens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The call is live.
    InProgress,
    /// The call has ended.
    Completed,
}

impl SessionStatus {
    /// Returns the canonical string label, as stored and sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            _ => Err(ParseEnumError {
                kind: "session status",
                value: s.to_string(),
            }),
        }
    }
}

/// Who produced a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The caller.
    User,
    /// The voice agent.
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Maps the role strings the agent service emits. Unknown roles fall
    /// back to `Assistant` so a buffered message is never lost.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "user" => Self::User,
            _ => Self::Assistant,
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(ParseEnumError {
                kind: "message role",
                value: s.to_string(),
            }),
        }
    }
}

/// The kind of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A speech-to-text transcription of the caller.
    Transcription,
    /// A spoken response from the agent.
    AgentResponse,
    /// A typed message from the standalone text-chat path.
    TextMessage,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transcription => "transcription",
            Self::AgentResponse => "agent_response",
            Self::TextMessage => "text_message",
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transcription" => Ok(Self::Transcription),
            "agent_response" => Ok(Self::AgentResponse),
            "text_message" => Ok(Self::TextMessage),
            _ => Err(ParseEnumError {
                kind: "message kind",
                value: s.to_string(),
            }),
        }
    }
}

/// Error returned when parsing an unknown enum label from storage.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    /// Which enum failed to parse.
    pub kind: &'static str,
    /// The offending value.
    pub value: String,
}
