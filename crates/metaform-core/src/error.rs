//! Error Types - Metaform Error Handling
//!
//! Provides the error type shared by every Metaform crate. Failures are local
//! and synchronous: they are raised where they are detected and never retried.
//!
//! # Error Kinds
//! - `Shape` - dimension or batch mismatch in a matrix operation or reduction
//! - `SingularMatrix` - zero determinant on inversion
//! - `Transport` / `TransportTimeout` - socket failure, malformed or incomplete payload
//! - `State` - autograd or checkpoint used in an invalid lifecycle state
//! - `InvalidArgument` - a constructor or utility received an unusable parameter
//!
//! @version 0.1.0
//! @author Metaform Development Team

use std::time::Duration;

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// The main error type for Metaform operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Dimension or batch mismatch.
    #[error("Shape error: {message}")]
    Shape {
        /// Description of the mismatch.
        message: String,
    },

    /// Attempted to invert a matrix whose determinant is zero.
    #[error("Singular matrix: determinant is {determinant}")]
    SingularMatrix {
        /// The determinant that was computed.
        determinant: f64,
    },

    /// Socket failure, closed connection, or malformed payload.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// A bounded network wait elapsed.
    #[error("Transport timeout: {operation} did not complete within {timeout:?}")]
    TransportTimeout {
        /// What was being waited on.
        operation: String,
        /// The bound that elapsed.
        timeout: Duration,
    },

    /// Invalid lifecycle state (autograd or checkpointing).
    #[error("State error: {message}")]
    State {
        /// Description of the invalid state.
        message: String,
    },

    /// A parameter was outside its valid domain.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },
}

// =============================================================================
// Result Type
// =============================================================================

/// A specialized Result type for Metaform operations.
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// Helper Functions
// =============================================================================

impl Error {
    /// Creates a new shape error.
    #[must_use]
    pub fn shape(message: impl Into<String>) -> Self {
        Self::Shape {
            message: message.into(),
        }
    }

    /// Creates a shape error describing two mismatched `(batch, rows, cols)` triples.
    #[must_use]
    pub fn shape_mismatch(op: &str, lhs: (usize, usize, usize), rhs: (usize, usize, usize)) -> Self {
        Self::Shape {
            message: format!("{op}: incompatible shapes {lhs:?} and {rhs:?}"),
        }
    }

    /// Creates a new transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a new transport timeout error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::TransportTimeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Creates a new state error.
    #[must_use]
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Creates a new invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns true for `Shape`.
    pub fn is_shape(&self) -> bool {
        matches!(self, Self::Shape { .. })
    }

    /// Returns true for `Transport` and `TransportTimeout`.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::TransportTimeout { .. })
    }

    /// Returns true for `State`.
    pub fn is_state(&self) -> bool {
        matches!(self, Self::State { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::transport(err.to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::shape_mismatch("add", (1, 2, 3), (1, 2, 4));
        let msg = err.to_string();
        assert!(msg.contains("Shape error"));
        assert!(msg.contains("(1, 2, 4)"));
    }

    #[test]
    fn test_error_kinds() {
        assert!(Error::shape("x").is_shape());
        assert!(Error::transport("x").is_transport());
        assert!(Error::timeout("recv", Duration::from_millis(5)).is_transport());
        assert!(Error::state("x").is_state());
        assert!(!Error::invalid_argument("x").is_shape());
    }

    #[test]
    fn test_io_error_is_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "early eof");
        let err: Error = io.into();
        assert!(err.is_transport());
        assert!(err.to_string().contains("early eof"));
    }

    #[test]
    fn test_error_equality() {
        let a = Error::SingularMatrix { determinant: 0.0 };
        let b = Error::SingularMatrix { determinant: 0.0 };
        assert_eq!(a, b);
    }
}
