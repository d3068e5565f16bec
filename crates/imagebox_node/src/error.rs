//! Error types for the node coordinator.

use imagebox_core::StoreError;
use imagebox_engine::EngineError;
use imagebox_protocol::{BoxId, ProtocolError};
use thiserror::Error;

/// Result alias for coordinator operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors surfaced by the node coordinator.
#[derive(Debug, Error)]
pub enum NodeError {
    /// An operator-supplied box URL failed validation.
    #[error("invalid box URL: {0}")]
    InvalidBoxUrl(#[from] ProtocolError),

    /// No box with the given id is registered.
    #[error("unknown box: {0}")]
    UnknownBox(BoxId),

    /// The transfer store rejected the operation.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A delivery engine could not be set up.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// A background thread could not be started.
    #[error("worker error: {0}")]
    Worker(String),
}

impl NodeError {
    /// Returns true if the error reflects bad operator input rather
    /// than an internal fault.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            NodeError::InvalidBoxUrl(_) | NodeError::UnknownBox(_) | NodeError::Store(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_are_classified() {
        assert!(NodeError::UnknownBox(BoxId::new(7)).is_input_error());
        assert!(NodeError::Store(StoreError::TokenExists).is_input_error());
        assert!(!NodeError::Worker("spawn failed".into()).is_input_error());
    }

    #[test]
    fn display_names_the_box() {
        let error = NodeError::UnknownBox(BoxId::new(12));
        assert_eq!(error.to_string(), "unknown box: box:12");
    }
}
