//! Session phase.
//!
//! The controller task is the only writer; everyone else observes the
//! phase through a `tokio::sync::watch` receiver.

use serde::Serialize;

/// Where the conversation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No session. Nothing is captured or played.
    #[default]
    Idle,
    /// Devices are open and the agent connection is being established.
    Connecting,
    /// The microphone is streaming to the agent.
    Listening,
    /// Agent audio is queued or playing.
    Speaking,
    /// The last session failed; a new start is allowed.
    Error,
}

impl Phase {
    /// Whether a session is running (capture or playback may be active).
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Listening | Self::Speaking)
    }

    /// Whether a start request may be honored from this phase.
    pub fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::Error)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Listening => write!(f, "listening"),
            Self::Speaking => write!(f, "speaking"),
            Self::Error => write!(f, "error"),
        }
    }
}
