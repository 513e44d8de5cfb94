use thiserror::Error;

/// Substrings that identify a transient infrastructure failure.
pub const TRANSIENT_MARKERS: &[&str] = &[
    "remote conversation not found",
    "session not found",
    "runtime may have been deleted",
    "server disconnected without sending a response",
    "remoteprotocolerror",
    "connection reset",
    "temporarily unavailable",
    "disconnected",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    Connectivity,
    Timeout,
    NoToolActions,
    Session,
    Unavailable,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendError {
    kind: BackendErrorKind,
    transient: bool,
    message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, transient: bool, message: impl Into<String>) -> Self {
        Self {
            kind,
            transient,
            message: message.into(),
        }
    }

    /// Builds an error whose transience is decided by [`is_transient_message`].
    pub fn classify(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let transient = is_transient_message(&message);
        Self::new(kind, transient, message)
    }

    pub fn transient(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, true, message)
    }

    pub fn permanent(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, false, message)
    }

    pub fn kind(&self) -> BackendErrorKind {
        self.kind
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub fn is_transient_message(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    TRANSIENT_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}
