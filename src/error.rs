//! Error types shared across the session core.
//!
//! Only [`AudioError::DeviceUnavailable`] and [`TransportError`] are fatal to a
//! session. Everything else is absorbed where it happens and turned into a
//! value (a dropped audio chunk or an error-flavored tool result).

use thiserror::Error;

/// Audio codec and device errors.
#[derive(Debug, Error)]
pub enum AudioError {
    /// A PCM payload whose length is not a whole number of frames.
    #[error("malformed audio: {len} bytes is not a multiple of {frame_bytes}")]
    MalformedAudio { len: usize, frame_bytes: usize },

    /// Transport-encoded audio that is not valid base64.
    #[error("malformed audio encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// Microphone or speaker missing, denied, or failed to open.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Errors raised by the duplex connection to the remote agent.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Gemini API key is required. Please add your API key in Settings.")]
    MissingApiKey,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Contract violations while dispatching a tool invocation.
///
/// These never reach the transport; the dispatcher renders them as text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("missing required argument '{0}'")]
    MissingArgument(&'static str),

    #[error("invalid value for '{name}': {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    #[error("unknown tool '{0}'")]
    UnknownTool(String),
}

/// Job store persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("job store data is corrupt: {0}")]
    Json(#[from] serde_json::Error),

    #[error("job store lock poisoned")]
    Poisoned,
}

/// Failures reported by the mail-sync collaborator.
#[derive(Debug, Error)]
pub enum MailSyncError {
    /// The mail provider rejected the stored credential. The user has to
    /// reconnect; the request must not be retried with the same token.
    #[error("Gmail session expired. Please reconnect in Settings.")]
    AuthorizationExpired,

    #[error("mail sync unavailable: {0}")]
    Unavailable(String),
}

/// Anything that ends a session attempt. Both kinds are fatal and reach
/// the user as a single message.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
