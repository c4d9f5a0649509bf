//! Voice-agent connection and wire protocol.
//!
//! The agent service speaks a persistent WebSocket: the bridge sends raw
//! binary audio and JSON function-call responses, and receives either
//! binary audio or JSON events tagged by `type`. Events are decoded once,
//! at this boundary, into the closed [`AgentEvent`] enum — everything
//! downstream matches on variants, never on tag strings.

mod connector;
mod error;
mod protocol;

pub use connector::{connect, AgentConfig, AgentStream};
pub use error::AgentError;
pub use protocol::{AgentEvent, FunctionCallItem, FunctionCallResponse};
