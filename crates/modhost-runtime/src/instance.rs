//! A loaded module instance and its store state.
//!
//! [`InstanceState`] is the host state wasmtime associates with each store:
//! the handle table, the resource limiter, and the module's name for log
//! fields.  [`ModuleInstance`] bundles the store with the instantiated
//! module and exposes the host-side surface: invoking exported entry points
//! and moving bytes in and out of guest memory.

use wasmtime::{AsContextMut, Instance, Memory, Store, StoreLimits, StoreLimitsBuilder, Val};

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::handle::HandleTable;

/// Per-instance host state stored in the wasmtime [`Store`].
#[derive(Debug)]
pub struct InstanceState {
    module: String,
    handles: HandleTable,
    limits: StoreLimits,
}

impl InstanceState {
    pub(crate) fn new(module: &str, config: &RuntimeConfig) -> Self {
        let limits = StoreLimitsBuilder::new()
            .memory_size(config.max_memory)
            .build();
        Self {
            module: module.to_owned(),
            handles: HandleTable::new(),
            limits,
        }
    }

    /// Name of the module this state belongs to.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// The instance's handle table.
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    /// The instance's handle table, mutably.
    pub fn handles_mut(&mut self) -> &mut HandleTable {
        &mut self.handles
    }

    /// Split into the handle table and the module name.
    ///
    /// Capability functions need both at once: the table mutably, the name
    /// for log fields.
    pub(crate) fn split_mut(&mut self) -> (&mut HandleTable, &str) {
        (&mut self.handles, &self.module)
    }

    pub(crate) fn limits_mut(&mut self) -> &mut StoreLimits {
        &mut self.limits
    }
}

/// One loaded, runnable module with its own linear memory and handle table.
///
/// Instances are independent: nothing is shared between two instances, and
/// dropping one invalidates all handles it ever issued.
#[derive(Debug)]
pub struct ModuleInstance {
    name: String,
    store: Store<InstanceState>,
    instance: Instance,
    max_fuel: u64,
}

impl ModuleInstance {
    pub(crate) fn new(
        name: &str,
        store: Store<InstanceState>,
        instance: Instance,
        max_fuel: u64,
    ) -> Self {
        Self {
            name: name.to_owned(),
            store,
            instance,
            max_fuel,
        }
    }

    /// Name of the loaded module.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The instance's store state (handle table and module metadata).
    pub fn state(&self) -> &InstanceState {
        self.store.data()
    }

    /// The instance's store state, mutably.
    pub fn state_mut(&mut self) -> &mut InstanceState {
        self.store.data_mut()
    }

    /// Call an exported entry point with scalar arguments.
    ///
    /// The ABI is scalar-only: every parameter and result must be an `i32`.
    /// The store is refuelled before the call so one runaway invocation
    /// cannot starve the next.
    pub fn invoke(&mut self, entry: &str, args: &[i32]) -> Result<Vec<i32>> {
        let func = self
            .instance
            .get_func(self.store.as_context_mut(), entry)
            .ok_or_else(|| {
                RuntimeError::Execution(format!(
                    "module '{}' has no export '{entry}'",
                    self.name
                ))
            })?;

        let ty = func.ty(&self.store);
        if ty.params().len() != args.len() {
            return Err(RuntimeError::Execution(format!(
                "export '{entry}' expects {} arguments, got {}",
                ty.params().len(),
                args.len()
            )));
        }

        self.store
            .set_fuel(self.max_fuel)
            .map_err(|e| RuntimeError::Execution(e.to_string()))?;

        let params: Vec<Val> = args.iter().map(|&a| Val::I32(a)).collect();
        let mut results = vec![Val::I32(0); ty.results().len()];

        tracing::debug!(module = %self.name, entry, args = args.len(), "invoking export");
        func.call(self.store.as_context_mut(), &params, &mut results)
            .map_err(|e| RuntimeError::Trap(e.to_string()))?;

        results
            .iter()
            .map(|v| {
                v.i32().ok_or_else(|| {
                    RuntimeError::Execution(format!("export '{entry}' returned a non-i32 value"))
                })
            })
            .collect()
    }

    /// Copy bytes into guest memory at `offset`.
    ///
    /// This is the host-side path for handing inputs to a module before an
    /// invocation (guest-side access goes through the capability imports).
    pub fn write_memory(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let memory = self.exported_memory()?;
        let data = memory.data_mut(self.store.as_context_mut());
        let end = offset
            .checked_add(bytes.len())
            .filter(|&end| end <= data.len())
            .ok_or(RuntimeError::OutOfBounds {
                offset: offset as i64,
                len: bytes.len() as i64,
                size: data.len(),
            })?;
        data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Copy `len` bytes out of guest memory at `offset`.
    pub fn read_memory(&mut self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let memory = self.exported_memory()?;
        let data = memory.data(&self.store);
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= data.len())
            .ok_or(RuntimeError::OutOfBounds {
                offset: offset as i64,
                len: len as i64,
                size: data.len(),
            })?;
        Ok(data[offset..end].to_vec())
    }

    fn exported_memory(&mut self) -> Result<Memory> {
        self.instance
            .get_memory(self.store.as_context_mut(), "memory")
            .ok_or_else(|| {
                RuntimeError::Execution(format!("module '{}' has no exported memory", self.name))
            })
    }
}

impl Drop for ModuleInstance {
    fn drop(&mut self) {
        let state = self.store.data_mut();
        let outstanding = state.handles.len();
        state.handles.clear();
        if outstanding > 0 {
            tracing::debug!(
                module = %state.module,
                outstanding,
                "cleared handle table on instance teardown"
            );
        }
    }
}
