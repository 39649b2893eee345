//! Capability namespaces.
//!
//! A capability is a named group of host functions a module instance is
//! linked against (e.g. `http`).  Implementations register their imports on
//! the linker; everything a capability function touches flows through the
//! instance's handle table and linear memory, never raw pointers.

use wasmtime::Linker;

use crate::error::Result;
use crate::instance::InstanceState;

/// A named group of host functions exposed to guest modules.
///
/// Implementations must be `Send + Sync`; one capability instance is shared
/// by every module the runtime loads.
pub trait Capability: Send + Sync {
    /// The import namespace guests link against (e.g. `"http"`).
    fn namespace(&self) -> &'static str;

    /// Register this namespace's functions on the linker.
    fn link(&self, linker: &mut Linker<InstanceState>) -> Result<()>;
}
