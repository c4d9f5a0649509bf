//! Agent event classification and the function-call response envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON event received from the agent service, classified by its `type`
/// tag. Unknown tags land in `Unrecognized` instead of failing the stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// The caller finished an utterance; carries the final transcript.
    UtteranceEnd {
        #[serde(default)]
        speech_final: String,
    },
    /// The caller started speaking — the trigger for barge-in.
    SpeechStarted,
    /// The agent finished speaking a response; carries its text.
    AgentAudioDone {
        #[serde(default)]
        text: String,
    },
    /// A conversation turn in text form, buffered for bulk persistence.
    ConversationText {
        #[serde(default)]
        role: String,
        #[serde(default)]
        content: String,
    },
    /// The agent requests one or more local function calls.
    FunctionCallRequest {
        #[serde(default)]
        functions: Vec<FunctionCallItem>,
    },
    History,
    Metadata,
    AgentThinking,
    /// Any tag this build does not know about.
    #[serde(other)]
    Unrecognized,
}

impl AgentEvent {
    /// Events that carry nothing the bridge acts on.
    pub fn is_noise(&self) -> bool {
        matches!(self, Self::History | Self::Metadata | Self::AgentThinking)
    }
}

/// One requested function call. The agent encodes `arguments` as a JSON
/// string, not an object. `id` and `name` default to empty so a malformed
/// request can still be answered with an error envelope instead of
/// failing the whole event.
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCallItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

impl FunctionCallItem {
    /// Parses the argument string into a JSON value. An empty string means
    /// a call with no arguments.
    pub fn parse_arguments(&self) -> Result<Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments)
    }
}

/// The response envelope sent back on the agent channel for each requested
/// function call. `content` is the JSON-encoded result.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionCallResponse {
    #[serde(rename = "type")]
    kind: &'static str,
    pub id: String,
    pub name: String,
    pub content: String,
}

impl FunctionCallResponse {
    /// Wraps a successful result.
    pub fn new(id: impl Into<String>, name: impl Into<String>, result: &Value) -> Self {
        Self {
            kind: "FunctionCallResponse",
            id: id.into(),
            name: name.into(),
            content: result.to_string(),
        }
    }

    /// Wraps a failure as error content. Structurally identical to a
    /// success envelope, so the agent conversation continues either way.
    pub fn error(
        id: impl Into<String>,
        name: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        let content = serde_json::json!({
            "error": format!("function call failed: {message}"),
        });
        Self::new(id, name, &content)
    }
}
