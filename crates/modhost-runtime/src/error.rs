//! Error types for the modhost-runtime crate.
//!
//! All runtime operations return [`RuntimeError`] via [`Result`].
//! Guest-facing capability functions never propagate these across the ABI
//! boundary; they translate them into sentinel returns or error handles.

use thiserror::Error;

/// Alias for `Result<T, RuntimeError>`.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur in the module host runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A guest-supplied offset/length pair falls outside linear memory.
    #[error("memory access out of bounds: offset {offset} len {len}, memory size {size}")]
    OutOfBounds { offset: i64, len: i64, size: usize },

    /// No entry exists in the handle table for this handle.
    #[error("handle {handle} not found")]
    HandleNotFound { handle: i32 },

    /// The handle exists but holds a different kind of value.
    #[error("handle {handle} holds {found}, expected {expected}")]
    HandleTypeMismatch {
        handle: i32,
        expected: &'static str,
        found: &'static str,
    },

    /// The request cannot be sent (missing or unparseable URL).
    #[error("malformed request: {reason}")]
    MalformedRequest { reason: String },

    /// The network layer failed outright.
    #[error("transport error: {0}")]
    Transport(String),

    /// A response field was read before a successful send.
    #[error("no response available")]
    NoResponse,

    /// The requested header key has never been set.
    #[error("header not set: {key}")]
    HeaderNotSet { key: String },

    /// Guest memory held invalid UTF-8 where a string was expected.
    #[error("invalid utf-8 in guest memory: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// A module-level operation failed (duplicate name, bad path, ...).
    #[error("module error: {reason}")]
    Module { reason: String },

    /// Wasm compilation failed.
    #[error("compilation failed: {0}")]
    Compilation(String),

    /// Module instantiation or import linking failed.
    #[error("instantiation failed: {0}")]
    Instantiation(String),

    /// A host-side step of an invocation failed.
    #[error("execution failed: {0}")]
    Execution(String),

    /// The guest trapped (out of fuel, unreachable, bad memory access, ...).
    #[error("guest trap: {0}")]
    Trap(String),

    /// An I/O operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_bounds_display() {
        let err = RuntimeError::OutOfBounds {
            offset: 65530,
            len: 16,
            size: 65536,
        };
        assert_eq!(
            err.to_string(),
            "memory access out of bounds: offset 65530 len 16, memory size 65536"
        );
    }

    #[test]
    fn handle_not_found_display() {
        let err = RuntimeError::HandleNotFound { handle: 7 };
        assert_eq!(err.to_string(), "handle 7 not found");
    }

    #[test]
    fn type_mismatch_display() {
        let err = RuntimeError::HandleTypeMismatch {
            handle: 3,
            expected: "request",
            found: "string",
        };
        assert_eq!(err.to_string(), "handle 3 holds string, expected request");
    }

    #[test]
    fn malformed_request_display() {
        let err = RuntimeError::MalformedRequest {
            reason: "url not set".into(),
        };
        assert_eq!(err.to_string(), "malformed request: url not set");
    }

    #[test]
    fn header_not_set_display() {
        let err = RuntimeError::HeaderNotSet {
            key: "Authorization".into(),
        };
        assert_eq!(err.to_string(), "header not set: Authorization");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: RuntimeError = io.into();
        assert!(matches!(err, RuntimeError::Io(_)));
    }
}
