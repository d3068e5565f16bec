//! Error types for the transfer store.

use imagebox_protocol::BoxId;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the transfer store.
///
/// These are all input-validation failures rejected synchronously; the
/// store itself never fails partway through a mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No box with the given id is registered.
    #[error("unknown box: {0}")]
    UnknownBox(BoxId),

    /// A box with the same name already exists.
    #[error("box name already in use: {0}")]
    BoxExists(String),

    /// A box with the same token already exists.
    #[error("box token already in use")]
    TokenExists,

    /// A transfer was requested with no images.
    #[error("transfer must contain at least one image")]
    EmptyTransfer,
}
