//! Error types for the poll service.

use thiserror::Error;

use imagebox_core::StoreError;
use imagebox_protocol::{ImageId, TransactionId};

/// Result type for poll service operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while serving peer requests.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The caller's token does not resolve to a registered box.
    #[error("unknown token")]
    UnknownToken,

    /// The addressed outbox entry does not exist.
    #[error("no outbox entry for {transaction_id} sequence {sequence_number}")]
    EntryNotFound {
        /// Transaction the caller addressed.
        transaction_id: TransactionId,
        /// Sequence number the caller addressed.
        sequence_number: u32,
    },

    /// Malformed request parameters or body.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The image referenced by an entry is gone from storage.
    #[error("no dataset in storage for {0}")]
    DatasetMissing(ImageId),

    /// The transfer store rejected an operation.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A collaborator failed while handling the request.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::UnknownToken
                | ServerError::EntryNotFound { .. }
                | ServerError::InvalidRequest(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// The HTTP status an endpoint layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::UnknownToken => 401,
            ServerError::EntryNotFound { .. } => 404,
            ServerError::InvalidRequest(_) => 400,
            ServerError::DatasetMissing(_) | ServerError::Store(_) | ServerError::Internal(_) => {
                500
            }
        }
    }
}
