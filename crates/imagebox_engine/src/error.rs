//! Error types for the transfer engines.

use thiserror::Error;

use imagebox_protocol::ImageId;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while delivering to or fetching from a peer.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer answered with a non-success status.
    #[error("peer returned status {status}: {body}")]
    PeerStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, trimmed for logging.
        body: String,
    },

    /// A payload could not be prepared for the wire.
    #[error("payload preparation failed: {0}")]
    Preparation(String),

    /// The image referenced by an outbox entry is gone from storage.
    #[error("no dataset in storage for {0}")]
    DatasetMissing(ImageId),

    /// A fetched payload could not be decoded or landed locally.
    #[error("could not land fetched payload: {0}")]
    Landing(String),

    /// A peer response body could not be decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// A delivery thread could not be started.
    #[error("worker error: {0}")]
    Worker(String),
}

/// How a delivery failure affects the owning transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transient. The transaction stays waiting and is retried on a
    /// later tick.
    Soft,
    /// Permanent. The transaction is marked failed until an operator
    /// resets it.
    Hard,
}

impl EngineError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a status error from a peer response.
    pub fn peer_status(status: u16, body: impl Into<String>) -> Self {
        Self::PeerStatus {
            status,
            body: body.into(),
        }
    }

    /// Classifies a delivery failure. Transport faults, 5xx answers and
    /// local pipeline failures are soft; any other peer status and a
    /// missing source dataset are hard.
    pub fn classify(&self) -> FailureClass {
        match self {
            EngineError::Transport(_)
            | EngineError::Preparation(_)
            | EngineError::Landing(_)
            | EngineError::Worker(_) => FailureClass::Soft,
            EngineError::PeerStatus { status, .. } if *status >= 500 => FailureClass::Soft,
            _ => FailureClass::Hard,
        }
    }

    /// Returns true when the failure is transient.
    pub fn is_soft(&self) -> bool {
        self.classify() == FailureClass::Soft
    }
}
