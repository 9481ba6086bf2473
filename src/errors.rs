//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every failure mode raised to callers.
///
/// Failures inside a turn (malformed lines, read timeouts, remote-reported
/// errors, non-zero exits) are not represented here: they are folded into an
/// unsuccessful [`TurnResult`](crate::models::turn::TurnResult) instead.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Outbound stream-json serialisation or write failure.
    Protocol(String),
    /// Process creation or exit-wait failure in the runtime.
    Runtime(String),
    /// Workspace store read/write failure.
    Store(String),
    /// No session record exists for the requested identifier.
    SessionNotFound(String),
    /// Operation not permitted in the session's current lifecycle state.
    InvalidState(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Runtime(msg) => write!(f, "runtime: {msg}"),
            Self::Store(msg) => write!(f, "store: {msg}"),
            Self::SessionNotFound(id) => write!(f, "session not found: {id}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}
