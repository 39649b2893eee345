//! The handle table: host-owned values addressed by opaque integers.
//!
//! Guests never hold pointers to host objects.  Instead every capability
//! call that produces a value inserts it here and returns a small integer
//! [`Handle`]; later calls pass the handle back and the table resolves it
//! with a type check.  Positive handles are allocated by [`HandleTable::add`]
//! starting at 1; negative handles reference error strings allocated by
//! failed getters ([`HandleTable::add_error`]).  Zero is never allocated.

use std::collections::HashMap;

use crate::error::{Result, RuntimeError};
use crate::request::HttpRequest;

/// Opaque guest-visible reference to a host value.
///
/// Valid only within one module instance's lifetime.
pub type Handle = i32;

/// First handle returned by [`HandleTable::add`].
const FIRST_HANDLE: Handle = 1;

/// First handle returned by [`HandleTable::add_error`].
const FIRST_ERROR_HANDLE: Handle = -1;

/// A tagged host value stored in the table.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    /// An HTTP request under construction or carrying its response.
    Request(HttpRequest),
    /// A host-allocated string (URL, header value, ...).
    Str(String),
    /// A raw byte buffer.
    Bytes(Vec<u8>),
    /// A descriptive error string allocated by a failed getter.
    Error(String),
}

impl HostValue {
    /// Short name of the value's shape, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Error(_) => "error",
        }
    }
}

/// Per-instance store mapping handles to host values.
///
/// The table lives inside the instance's store state, so wasmtime's store
/// ownership serializes all access: no two capability calls can interleave
/// reads and writes on the same entry.
#[derive(Debug)]
pub struct HandleTable {
    entries: HashMap<Handle, HostValue>,
    next: Handle,
    next_error: Handle,
}

impl HandleTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next: FIRST_HANDLE,
            next_error: FIRST_ERROR_HANDLE,
        }
    }

    /// Insert a value and return a freshly allocated handle.
    ///
    /// Allocation is monotonic; a live handle is never handed out twice.
    pub fn add(&mut self, value: HostValue) -> Handle {
        let handle = self.next;
        // Wraps back to the start after i32::MAX allocations.
        self.next = self.next.checked_add(1).unwrap_or(FIRST_HANDLE);
        self.entries.insert(handle, value);
        handle
    }

    /// Insert a descriptive error string and return its negative handle.
    pub fn add_error(&mut self, message: impl Into<String>) -> Handle {
        let handle = self.next_error;
        self.next_error = self.next_error.checked_sub(1).unwrap_or(FIRST_ERROR_HANDLE);
        self.entries.insert(handle, HostValue::Error(message.into()));
        handle
    }

    /// Look up a handle.
    pub fn get(&self, handle: Handle) -> Result<&HostValue> {
        self.entries
            .get(&handle)
            .ok_or(RuntimeError::HandleNotFound { handle })
    }

    /// Overwrite the value behind an existing handle.
    pub fn set(&mut self, handle: Handle, value: HostValue) -> Result<()> {
        match self.entries.get_mut(&handle) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(RuntimeError::HandleNotFound { handle }),
        }
    }

    /// Remove an entry, returning the value it held.
    pub fn remove(&mut self, handle: Handle) -> Result<HostValue> {
        self.entries
            .remove(&handle)
            .ok_or(RuntimeError::HandleNotFound { handle })
    }

    /// Look up a handle expecting a request.
    pub fn request(&self, handle: Handle) -> Result<&HttpRequest> {
        match self.get(handle)? {
            HostValue::Request(request) => Ok(request),
            other => Err(RuntimeError::HandleTypeMismatch {
                handle,
                expected: "request",
                found: other.kind(),
            }),
        }
    }

    /// Look up a handle expecting a request, mutably.
    pub fn request_mut(&mut self, handle: Handle) -> Result<&mut HttpRequest> {
        match self.entries.get_mut(&handle) {
            Some(HostValue::Request(request)) => Ok(request),
            Some(other) => Err(RuntimeError::HandleTypeMismatch {
                handle,
                expected: "request",
                found: other.kind(),
            }),
            None => Err(RuntimeError::HandleNotFound { handle }),
        }
    }

    /// Look up a handle expecting string content.
    ///
    /// Both plain strings and error strings qualify, so guests can read
    /// error handles through the same path.
    pub fn string(&self, handle: Handle) -> Result<&str> {
        match self.get(handle)? {
            HostValue::Str(s) | HostValue::Error(s) => Ok(s),
            other => Err(RuntimeError::HandleTypeMismatch {
                handle,
                expected: "string",
                found: other.kind(),
            }),
        }
    }

    /// Look up a handle expecting a byte buffer.
    pub fn bytes(&self, handle: Handle) -> Result<&[u8]> {
        match self.get(handle)? {
            HostValue::Bytes(b) => Ok(b),
            other => Err(RuntimeError::HandleTypeMismatch {
                handle,
                expected: "bytes",
                found: other.kind(),
            }),
        }
    }

    /// Drop every entry.  Called on instance teardown.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a handle currently resolves.
    pub fn contains(&self, handle: Handle) -> bool {
        self.entries.contains_key(&handle)
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
