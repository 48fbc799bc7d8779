//! Error types for the ledger connector

use thiserror::Error;

/// An error reported by an external collaborator (peer, orderer, event hub,
/// certificate authority or runtime packager). The message is carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        TransportError {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("enrollment failed: {0}")]
    EnrollmentFailed(#[source] TransportError),
    #[error("No results were returned from the request")]
    NoEndorsements,
    #[error("Endorsement rejected with status {status}: {payload}")]
    EndorsementRejected { status: u16, payload: String },
    #[error("No payloads were returned from the query request")]
    NoQueryResult,
    #[error("Failed to commit transaction {tx_id}: {reason}")]
    CommitFailed { tx_id: String, reason: String },
    #[error("Failed to receive commit notification for transaction {tx_id} within {timeout_ms}ms")]
    CommitTimeout { tx_id: String, timeout_ms: u128 },
    #[error("Chaincode version {remote} is incompatible with connector version {local}")]
    IncompatibleVersion { local: String, remote: String },
    #[error("unimplemented function called: {0}")]
    Unimplemented(&'static str),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Connection is not connected")]
    NotConnected,
    #[error("No identity is logged in on this connection")]
    NotLoggedIn,
    #[error("Identity store error: {0}")]
    IdentityStore(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
}

/// Coarse classification of a [`ConnectorError`], for callers deciding whether
/// to retry or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    Enrollment,
    Endorsement,
    Commit,
    Timeout,
    Version,
    Unimplemented,
    Transport,
    Session,
    Local,
}

impl ConnectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectorError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ConnectorError::EnrollmentFailed(_) => ErrorKind::Enrollment,
            ConnectorError::NoEndorsements
            | ConnectorError::EndorsementRejected { .. }
            | ConnectorError::NoQueryResult => ErrorKind::Endorsement,
            ConnectorError::CommitFailed { .. } => ErrorKind::Commit,
            ConnectorError::CommitTimeout { .. } => ErrorKind::Timeout,
            ConnectorError::IncompatibleVersion { .. } => ErrorKind::Version,
            ConnectorError::Unimplemented(_) => ErrorKind::Unimplemented,
            ConnectorError::Transport(_) => ErrorKind::Transport,
            ConnectorError::NotConnected | ConnectorError::NotLoggedIn => ErrorKind::Session,
            ConnectorError::IdentityStore(_)
            | ConnectorError::Config(_)
            | ConnectorError::Serialization(_)
            | ConnectorError::Io(_) => ErrorKind::Local,
        }
    }

    /// True for failures that may succeed if the caller tries again: commit
    /// timeouts and collaborator transport errors. Nothing in this crate retries.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout | ErrorKind::Transport)
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        ConnectorError::InvalidArgument(msg.into())
    }
}

impl From<std::io::Error> for ConnectorError {
    fn from(err: std::io::Error) -> Self {
        ConnectorError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ConnectorError {
    fn from(err: toml::de::Error) -> Self {
        ConnectorError::Config(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ConnectorError>;
