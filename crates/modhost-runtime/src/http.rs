//! The `http` import namespace.
//!
//! Guests drive outbound HTTP through opaque handles: `create` allocates a
//! request, `set_*` fill it in from linear memory, `send` executes it
//! synchronously, and the `get_*` accessors read the outcome back. Getters
//! that fail return a negative error handle whose message the guest can
//! fetch through `core.read_string`; setters that fail change nothing.
//!
//! The operation bodies live in [`ops`] as plain functions over the handle
//! table and a memory slice, so their semantics are testable without
//! instantiating a module. The [`Capability`] impl wraps them in wasmtime
//! host functions.

use std::sync::Arc;

use wasmtime::{Caller, Extern, Linker};

use crate::capability::Capability;
use crate::error::{Result, RuntimeError};
use crate::instance::InstanceState;
use crate::transport::HttpTransport;

/// Host side of the `http.*` imports.
///
/// Holds the transport that `send` dispatches through. The transport is
/// shared across every instance linked against this capability.
pub struct HttpCapability {
    transport: Arc<dyn HttpTransport>,
}

impl HttpCapability {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

impl Capability for HttpCapability {
    fn namespace(&self) -> &'static str {
        "http"
    }

    fn link(&self, linker: &mut Linker<InstanceState>) -> Result<()> {
        // http.create: allocate a request handle. Unknown method codes fall
        // back to GET rather than failing.
        linker
            .func_wrap(
                "http",
                "create",
                |mut caller: Caller<'_, InstanceState>, method: i32| -> i32 {
                    let (handles, module) = caller.data_mut().split_mut();
                    let handle = ops::create(handles, method);
                    tracing::trace!(module, handle, method, "http.create");
                    handle
                },
            )
            .map_err(|e| RuntimeError::Instantiation(e.to_string()))?;

        // http.set_url: read a UTF-8 URL out of guest memory.
        linker
            .func_wrap(
                "http",
                "set_url",
                |mut caller: Caller<'_, InstanceState>, handle: i32, ptr: i32, len: i32| {
                    let memory = match caller.get_export("memory") {
                        Some(Extern::Memory(memory)) => memory,
                        _ => return,
                    };
                    let (data, state) = memory.data_and_store_mut(&mut caller);
                    let (handles, module) = state.split_mut();
                    if let Err(err) = ops::set_url(handles, data, handle, ptr, len) {
                        tracing::debug!(module, handle, error = %err, "http.set_url ignored");
                    }
                },
            )
            .map_err(|e| RuntimeError::Instantiation(e.to_string()))?;

        // http.set_header: key and value are two separate memory regions.
        // Setting the same key twice keeps the later value.
        linker
            .func_wrap(
                "http",
                "set_header",
                |mut caller: Caller<'_, InstanceState>,
                 handle: i32,
                 key_ptr: i32,
                 key_len: i32,
                 value_ptr: i32,
                 value_len: i32| {
                    let memory = match caller.get_export("memory") {
                        Some(Extern::Memory(memory)) => memory,
                        _ => return,
                    };
                    let (data, state) = memory.data_and_store_mut(&mut caller);
                    let (handles, module) = state.split_mut();
                    if let Err(err) =
                        ops::set_header(handles, data, handle, key_ptr, key_len, value_ptr, value_len)
                    {
                        tracing::debug!(module, handle, error = %err, "http.set_header ignored");
                    }
                },
            )
            .map_err(|e| RuntimeError::Instantiation(e.to_string()))?;

        // http.set_body: raw bytes, not required to be UTF-8.
        linker
            .func_wrap(
                "http",
                "set_body",
                |mut caller: Caller<'_, InstanceState>, handle: i32, ptr: i32, len: i32| {
                    let memory = match caller.get_export("memory") {
                        Some(Extern::Memory(memory)) => memory,
                        _ => return,
                    };
                    let (data, state) = memory.data_and_store_mut(&mut caller);
                    let (handles, module) = state.split_mut();
                    if let Err(err) = ops::set_body(handles, data, handle, ptr, len) {
                        tracing::debug!(module, handle, error = %err, "http.set_body ignored");
                    }
                },
            )
            .map_err(|e| RuntimeError::Instantiation(e.to_string()))?;

        // http.set_method: no memory access involved.
        linker
            .func_wrap(
                "http",
                "set_method",
                |mut caller: Caller<'_, InstanceState>, handle: i32, method: i32| {
                    let (handles, module) = caller.data_mut().split_mut();
                    if let Err(err) = ops::set_method(handles, handle, method) {
                        tracing::debug!(module, handle, method, error = %err, "http.set_method ignored");
                    }
                },
            )
            .map_err(|e| RuntimeError::Instantiation(e.to_string()))?;

        // http.get_method: the method code, or the GET code when the handle
        // does not name a request.
        linker
            .func_wrap(
                "http",
                "get_method",
                |caller: Caller<'_, InstanceState>, handle: i32| -> i32 {
                    ops::get_method(caller.data().handles(), handle)
                },
            )
            .map_err(|e| RuntimeError::Instantiation(e.to_string()))?;

        // http.get_url: a string handle for the URL, or a negative error
        // handle when the URL was never set.
        linker
            .func_wrap(
                "http",
                "get_url",
                |mut caller: Caller<'_, InstanceState>, handle: i32| -> i32 {
                    let (handles, module) = caller.data_mut().split_mut();
                    match ops::get_url(handles, handle) {
                        Ok(url_handle) => url_handle,
                        Err(err) => {
                            tracing::debug!(module, handle, error = %err, "http.get_url failed");
                            handles.add_error(err.to_string())
                        }
                    }
                },
            )
            .map_err(|e| RuntimeError::Instantiation(e.to_string()))?;

        // http.get_header: a string handle for the named header, or a
        // negative error handle when it was never set.
        linker
            .func_wrap(
                "http",
                "get_header",
                |mut caller: Caller<'_, InstanceState>, handle: i32, key_ptr: i32, key_len: i32| -> i32 {
                    let memory = match caller.get_export("memory") {
                        Some(Extern::Memory(memory)) => memory,
                        _ => {
                            return caller
                                .data_mut()
                                .handles_mut()
                                .add_error("module exports no memory");
                        }
                    };
                    let (data, state) = memory.data_and_store_mut(&mut caller);
                    let (handles, module) = state.split_mut();
                    match ops::get_header(handles, data, handle, key_ptr, key_len) {
                        Ok(value_handle) => value_handle,
                        Err(err) => {
                            tracing::debug!(module, handle, error = %err, "http.get_header failed");
                            handles.add_error(err.to_string())
                        }
                    }
                },
            )
            .map_err(|e| RuntimeError::Instantiation(e.to_string()))?;

        // http.get_status_code: the response status, or a negative error
        // handle when no response has arrived.
        linker
            .func_wrap(
                "http",
                "get_status_code",
                |mut caller: Caller<'_, InstanceState>, handle: i32| -> i32 {
                    let (handles, module) = caller.data_mut().split_mut();
                    match ops::get_status_code(handles, handle) {
                        Ok(status) => status,
                        Err(err) => {
                            tracing::debug!(module, handle, error = %err, "http.get_status_code failed");
                            handles.add_error(err.to_string())
                        }
                    }
                },
            )
            .map_err(|e| RuntimeError::Instantiation(e.to_string()))?;

        // http.get_data_len: body length in bytes, zero when there is none.
        linker
            .func_wrap(
                "http",
                "get_data_len",
                |caller: Caller<'_, InstanceState>, handle: i32| -> i32 {
                    ops::get_data_len(caller.data().handles(), handle)
                },
            )
            .map_err(|e| RuntimeError::Instantiation(e.to_string()))?;

        // http.get_data: copy the body into guest memory, truncating to the
        // guest's capacity.
        linker
            .func_wrap(
                "http",
                "get_data",
                |mut caller: Caller<'_, InstanceState>, handle: i32, ptr: i32, capacity: i32| {
                    let memory = match caller.get_export("memory") {
                        Some(Extern::Memory(memory)) => memory,
                        _ => return,
                    };
                    let (data, state) = memory.data_and_store_mut(&mut caller);
                    let (handles, module) = state.split_mut();
                    if let Err(err) = ops::get_data(handles, data, handle, ptr, capacity) {
                        tracing::debug!(module, handle, error = %err, "http.get_data ignored");
                    }
                },
            )
            .map_err(|e| RuntimeError::Instantiation(e.to_string()))?;

        // http.send: execute the request on the calling thread. The guest
        // observes the outcome through the getters afterwards.
        let transport = Arc::clone(&self.transport);
        linker
            .func_wrap(
                "http",
                "send",
                move |mut caller: Caller<'_, InstanceState>, handle: i32| {
                    let (handles, module) = caller.data_mut().split_mut();
                    ops::send(handles, transport.as_ref(), module, handle);
                },
            )
            .map_err(|e| RuntimeError::Instantiation(e.to_string()))?;

        // http.close: release the handle. Closing twice is harmless.
        linker
            .func_wrap(
                "http",
                "close",
                |mut caller: Caller<'_, InstanceState>, handle: i32| {
                    let (handles, module) = caller.data_mut().split_mut();
                    if ops::close(handles, handle).is_err() {
                        tracing::trace!(module, handle, "http.close on absent handle");
                    }
                },
            )
            .map_err(|e| RuntimeError::Instantiation(e.to_string()))?;

        Ok(())
    }
}

/// Operation bodies behind the `http.*` host functions.
///
/// Each takes the handle table (and a memory slice where the ABI reads or
/// writes guest memory) so behavior can be exercised directly in tests.
pub(crate) mod ops {
    use crate::error::Result;
    use crate::handle::{Handle, HandleTable, HostValue};
    use crate::memory;
    use crate::request::{HttpMethod, HttpRequest};
    use crate::transport::HttpTransport;

    pub(crate) fn create(table: &mut HandleTable, method: i32) -> Handle {
        let request = HttpRequest::new(HttpMethod::from_code(method));
        table.add(HostValue::Request(request))
    }

    pub(crate) fn set_url(
        table: &mut HandleTable,
        mem: &[u8],
        handle: Handle,
        ptr: i32,
        len: i32,
    ) -> Result<()> {
        // Resolve the handle before touching memory so a bad pointer on a
        // bad handle reports the handle problem.
        table.request(handle)?;
        let url = memory::read_string(mem, ptr, len)?;
        if let Ok(request) = table.request_mut(handle) {
            request.url = Some(url);
        }
        Ok(())
    }

    pub(crate) fn set_header(
        table: &mut HandleTable,
        mem: &[u8],
        handle: Handle,
        key_ptr: i32,
        key_len: i32,
        value_ptr: i32,
        value_len: i32,
    ) -> Result<()> {
        table.request(handle)?;
        let key = memory::read_string(mem, key_ptr, key_len)?;
        let value = memory::read_string(mem, value_ptr, value_len)?;
        if let Ok(request) = table.request_mut(handle) {
            request.headers.insert(key, value);
        }
        Ok(())
    }

    pub(crate) fn set_body(
        table: &mut HandleTable,
        mem: &[u8],
        handle: Handle,
        ptr: i32,
        len: i32,
    ) -> Result<()> {
        table.request(handle)?;
        let body = memory::read_bytes(mem, ptr, len)?;
        if let Ok(request) = table.request_mut(handle) {
            request.body = Some(body);
        }
        Ok(())
    }

    pub(crate) fn set_method(table: &mut HandleTable, handle: Handle, method: i32) -> Result<()> {
        let request = table.request_mut(handle)?;
        request.method = HttpMethod::from_code(method);
        Ok(())
    }

    pub(crate) fn get_method(table: &HandleTable, handle: Handle) -> i32 {
        match table.request(handle) {
            Ok(request) => request.method.code(),
            Err(_) => HttpMethod::Get.code(),
        }
    }

    pub(crate) fn get_url(table: &mut HandleTable, handle: Handle) -> Result<Handle> {
        // Hands back the string exactly as the guest stored it. Validation
        // happens at send time, not here.
        let url = table
            .request(handle)?
            .url
            .clone()
            .ok_or(crate::error::RuntimeError::MalformedRequest {
                reason: "url not set".into(),
            })?;
        Ok(table.add(HostValue::Str(url)))
    }

    pub(crate) fn get_header(
        table: &mut HandleTable,
        mem: &[u8],
        handle: Handle,
        key_ptr: i32,
        key_len: i32,
    ) -> Result<Handle> {
        let key = memory::read_string(mem, key_ptr, key_len)?;
        let value = table
            .request(handle)?
            .headers
            .get(&key)
            .cloned()
            .ok_or(crate::error::RuntimeError::HeaderNotSet { key })?;
        Ok(table.add(HostValue::Str(value)))
    }

    pub(crate) fn get_status_code(table: &HandleTable, handle: Handle) -> Result<i32> {
        let request = table.request(handle)?;
        let response = request
            .response
            .as_ref()
            .ok_or(crate::error::RuntimeError::NoResponse)?;
        Ok(i32::from(response.status))
    }

    pub(crate) fn get_data_len(table: &HandleTable, handle: Handle) -> i32 {
        match table.request(handle) {
            Ok(request) => request
                .response
                .as_ref()
                .map(|response| response.data_len() as i32)
                .unwrap_or(0),
            Err(_) => 0,
        }
    }

    pub(crate) fn get_data(
        table: &HandleTable,
        mem: &mut [u8],
        handle: Handle,
        ptr: i32,
        capacity: i32,
    ) -> Result<usize> {
        let request = table.request(handle)?;
        let data = match request.response.as_ref().and_then(|r| r.data.as_ref()) {
            Some(data) => data,
            None => return Ok(0),
        };
        memory::write_bytes(mem, ptr, data, capacity)
    }

    /// Execute the request named by `handle`.
    ///
    /// A handle that does not name a request, or a request whose URL is
    /// missing or unparseable, leaves the stored response untouched. Once
    /// the URL validates, the stored response is always replaced with the
    /// transport's outcome, including `None` when the transport could not
    /// produce one. The guest reads the result back through the getters.
    pub(crate) fn send(
        table: &mut HandleTable,
        transport: &dyn HttpTransport,
        module: &str,
        handle: Handle,
    ) {
        let outbound = {
            let request = match table.request(handle) {
                Ok(request) => request,
                Err(err) => {
                    tracing::debug!(module, handle, error = %err, "http.send ignored");
                    return;
                }
            };
            match request.to_outbound() {
                Ok(outbound) => outbound,
                Err(err) => {
                    tracing::debug!(module, handle, error = %err, "http.send not dispatched");
                    return;
                }
            }
        };

        tracing::debug!(
            module,
            handle,
            method = %outbound.method,
            url = %outbound.url,
            "dispatching request"
        );
        let response = transport.fetch(outbound);
        match &response {
            Some(response) => tracing::debug!(
                module,
                handle,
                status = response.status,
                bytes = response.data_len(),
                "request completed"
            ),
            None => tracing::debug!(module, handle, "request produced no response"),
        }
        if let Ok(request) = table.request_mut(handle) {
            request.response = response;
        }
    }

    pub(crate) fn close(table: &mut HandleTable, handle: Handle) -> Result<()> {
        table.remove(handle).map(|_| ())
    }
}
