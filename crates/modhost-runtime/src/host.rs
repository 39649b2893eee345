//! The `core` and `env` import namespaces.
//!
//! `core` is the consumer side of the string-handle convention: getters in
//! other namespaces hand out string handles (including negative error
//! handles), and guests use `core.string_len` / `core.read_string` to pull
//! the text into linear memory and `core.destroy` to release any handle.
//!
//! `env` carries `log`, which forwards a guest message to the host's
//! structured logger under the module's name.

use wasmtime::{Caller, Extern, Linker};

use crate::capability::Capability;
use crate::error::{Result, RuntimeError};
use crate::instance::InstanceState;
use crate::memory;

/// Host side of the `core.*` imports.
pub struct CoreCapability;

impl Capability for CoreCapability {
    fn namespace(&self) -> &'static str {
        "core"
    }

    fn link(&self, linker: &mut Linker<InstanceState>) -> Result<()> {
        // core.string_len: byte length of a string or error-string handle,
        // -1 when the handle names neither.
        linker
            .func_wrap(
                "core",
                "string_len",
                |caller: Caller<'_, InstanceState>, handle: i32| -> i32 {
                    ops::string_len(caller.data().handles(), handle)
                },
            )
            .map_err(|e| RuntimeError::Instantiation(e.to_string()))?;

        // core.read_string: copy the string into guest memory, truncating
        // to the guest's capacity. Returns bytes written, -1 on failure.
        linker
            .func_wrap(
                "core",
                "read_string",
                |mut caller: Caller<'_, InstanceState>, handle: i32, ptr: i32, capacity: i32| -> i32 {
                    let memory = match caller.get_export("memory") {
                        Some(Extern::Memory(memory)) => memory,
                        _ => return -1,
                    };
                    let (data, state) = memory.data_and_store_mut(&mut caller);
                    let (handles, module) = state.split_mut();
                    match ops::read_string(handles, data, handle, ptr, capacity) {
                        Ok(written) => written as i32,
                        Err(err) => {
                            tracing::debug!(module, handle, error = %err, "core.read_string failed");
                            -1
                        }
                    }
                },
            )
            .map_err(|e| RuntimeError::Instantiation(e.to_string()))?;

        // core.destroy: release any handle. Destroying twice is harmless.
        linker
            .func_wrap(
                "core",
                "destroy",
                |mut caller: Caller<'_, InstanceState>, handle: i32| {
                    let (handles, module) = caller.data_mut().split_mut();
                    if handles.remove(handle).is_err() {
                        tracing::trace!(module, handle, "core.destroy on absent handle");
                    }
                },
            )
            .map_err(|e| RuntimeError::Instantiation(e.to_string()))?;

        Ok(())
    }
}

/// Host side of the `env.*` imports.
pub struct EnvCapability;

impl Capability for EnvCapability {
    fn namespace(&self) -> &'static str {
        "env"
    }

    fn link(&self, linker: &mut Linker<InstanceState>) -> Result<()> {
        // env.log: forward a guest message at the requested level. Levels
        // 0..=3 map to error..debug, anything else lands on trace. Bad
        // memory or invalid UTF-8 drops the message.
        linker
            .func_wrap(
                "env",
                "log",
                |mut caller: Caller<'_, InstanceState>, level: i32, ptr: i32, len: i32| {
                    let memory = match caller.get_export("memory") {
                        Some(Extern::Memory(memory)) => memory,
                        _ => return,
                    };
                    let (data, state) = memory.data_and_store_mut(&mut caller);
                    let message = match memory::read_string(data, ptr, len) {
                        Ok(message) => message,
                        Err(_) => return,
                    };
                    let module = state.module();
                    match level {
                        0 => tracing::error!(module, "{message}"),
                        1 => tracing::warn!(module, "{message}"),
                        2 => tracing::info!(module, "{message}"),
                        3 => tracing::debug!(module, "{message}"),
                        _ => tracing::trace!(module, "{message}"),
                    }
                },
            )
            .map_err(|e| RuntimeError::Instantiation(e.to_string()))?;

        Ok(())
    }
}

pub(crate) mod ops {
    use crate::error::Result;
    use crate::handle::{Handle, HandleTable};
    use crate::memory;

    pub(crate) fn string_len(table: &HandleTable, handle: Handle) -> i32 {
        match table.string(handle) {
            Ok(value) => value.len() as i32,
            Err(_) => -1,
        }
    }

    pub(crate) fn read_string(
        table: &HandleTable,
        mem: &mut [u8],
        handle: Handle,
        ptr: i32,
        capacity: i32,
    ) -> Result<usize> {
        let value = table.string(handle)?;
        memory::write_bytes(mem, ptr, value.as_bytes(), capacity)
    }
}
