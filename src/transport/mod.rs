//! Duplex connection to the remote agent.
//!
//! A connector opens a link without blocking: the handshake runs in the
//! background and its outcome arrives through the event sink as
//! [`TransportEvent::Opened`] or [`TransportEvent::Error`]. Sends on a link
//! that is not open yet are dropped.

pub mod live;
pub mod protocol;

use std::time::Duration;

use serde::Serialize;

use crate::audio::codec::AudioFrame;
use crate::error::TransportError;
use crate::tools::{ToolInvocation, ToolResult};

pub use live::GeminiConnector;

/// Which side of the conversation a transcript belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptDirection {
    /// The user's speech.
    Input,
    /// The agent's speech.
    Output,
}

/// Everything the link reports back, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    ToolCall(Vec<ToolInvocation>),
    Transcript {
        direction: TranscriptDirection,
        text: String,
    },
    TurnComplete,
    /// Raw 16-bit PCM from the agent.
    AudioChunk { pcm: Vec<u8>, sample_rate: u32 },
    Interrupted,
    /// Fatal; no further events follow.
    Error(String),
    /// The remote side or the network closed the connection.
    Closed,
}

/// Parameters negotiated when a session opens.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub api_key: String,
    pub model: String,
    /// Overrides the default service URL.
    pub endpoint: Option<String>,
    pub voice_name: String,
    pub system_instruction: String,
    pub tool_declarations: serde_json::Value,
    pub handshake_timeout: Duration,
}

/// Receives link events. Called from transport tasks.
pub type EventSink = Box<dyn Fn(TransportEvent) + Send + Sync>;

/// Opens links to the agent.
pub trait AgentConnector: Send {
    /// Start connecting. Fails immediately only when the configuration
    /// cannot possibly work (e.g. no API key).
    fn open(
        &mut self,
        config: AgentConfig,
        sink: EventSink,
    ) -> Result<Box<dyn AgentLink>, TransportError>;
}

/// An open (or opening) connection, exclusively owned by one session.
pub trait AgentLink: Send {
    /// Fire-and-forget. Dropped when the link is not open.
    fn send_audio(&mut self, frame: &AudioFrame);

    /// Deliver a tool result. Never blocks.
    fn send_tool_result(&mut self, result: ToolResult);

    /// Tear down. Idempotent; no events are delivered after it returns.
    fn close(&mut self);
}
