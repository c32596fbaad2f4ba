//! Error types shared across the client.

use std::fmt::{Display, Formatter};

/// Shared client result type.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client error enumeration covering every failure mode of the RPC stack.
///
/// The type is `Clone` so that one connect failure can be handed to every
/// caller waiting on the shared connect future.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// I/O failure on the underlying stream, or the stream is closed.
    Transport(String),
    /// The peer answered a request with an error frame.
    Protocol {
        /// JSON-RPC error code reported by the peer.
        code: i64,
        /// Human-readable error message reported by the peer.
        message: String,
    },
    /// Protocol version missing or mismatched during the handshake.
    Handshake(String),
    /// The external process exited or missed its readiness deadline.
    Startup(String),
    /// Operation on a closed or unknown session.
    SessionState(String),
    /// The server reported a `session.error` event while a send was awaited.
    SessionFailed(String),
    /// A host callback failed; never sent over the wire as-is.
    Handler(String),
    /// A bounded wait elapsed.
    Timeout(String),
    /// Configuration parsing or validation failure.
    Config(String),
    /// JSON encoding or decoding failure.
    Serialization(String),
}

impl ClientError {
    /// Build the error every pending request receives when the client closes.
    #[must_use]
    pub fn closed() -> Self {
        Self::Transport("client closed".into())
    }

    /// Whether this error represents a closed client or stream.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Transport(msg) if msg.contains("closed"))
    }
}

impl Display for ClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol { code, message } => write!(f, "protocol: [{code}] {message}"),
            Self::Handshake(msg) => write!(f, "handshake: {msg}"),
            Self::Startup(msg) => write!(f, "startup: {msg}"),
            Self::SessionState(msg) => write!(f, "session state: {msg}"),
            Self::SessionFailed(msg) => write!(f, "session failed: {msg}"),
            Self::Handler(msg) => write!(f, "handler: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Serialization(msg) => write!(f, "serialization: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<toml::de::Error> for ClientError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
