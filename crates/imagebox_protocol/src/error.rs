//! Error types for protocol parsing and validation.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while validating peer-supplied protocol data.
///
/// These are input-validation failures: they are reported synchronously to
/// the caller and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The box URL does not start with a supported scheme.
    #[error("box URL must use http or https: {url}")]
    InvalidScheme {
        /// The offending URL.
        url: String,
    },

    /// The box URL has no host component.
    #[error("box URL has no host: {url}")]
    MissingHost {
        /// The offending URL.
        url: String,
    },

    /// The box URL carries a port that is not a valid TCP port.
    #[error("box URL has an invalid port: {value}")]
    InvalidPort {
        /// The offending port text.
        value: String,
    },

    /// The box URL has no path segment that could hold a token.
    #[error("box URL has no token segment: {url}")]
    MissingToken {
        /// The offending URL.
        url: String,
    },

    /// The final path segment is not a well-formed box token.
    #[error("malformed box token: {token}")]
    InvalidToken {
        /// The offending segment.
        token: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::InvalidScheme {
            url: "ftp://box".into(),
        };
        assert!(err.to_string().contains("ftp://box"));

        let err = ProtocolError::InvalidToken {
            token: "xyz".into(),
        };
        assert!(err.to_string().contains("xyz"));
    }
}
