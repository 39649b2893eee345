//! Module runtime.
//!
//! [`ModuleRuntime`] is the main entry point for loading untrusted modules.
//! It owns the wasmtime [`Engine`], the [`RuntimeConfig`] resource limits,
//! and the capability set that gets linked into every instance. Loading is
//! cheap enough to do per module; instances never share state.

use std::sync::Arc;

use wasmtime::{Engine, Linker, Module, Store};

use crate::capability::Capability;
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::host::{CoreCapability, EnvCapability};
use crate::http::HttpCapability;
use crate::instance::{InstanceState, ModuleInstance};
use crate::transport::{DeniedTransport, HttpTransport, ReqwestTransport};

/// The module host runtime.
///
/// Wraps wasmtime and exposes a high-level API for instantiating modules
/// with the `http`, `core`, and `env` namespaces wired in and resource
/// limits enforced.
pub struct ModuleRuntime {
    engine: Engine,
    config: RuntimeConfig,
    capabilities: Vec<Arc<dyn Capability>>,
}

impl ModuleRuntime {
    /// Create a runtime with the given configuration.
    ///
    /// Outbound HTTP only reaches the network when `allow_network` is set;
    /// otherwise every `http.send` resolves to no response.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let transport: Arc<dyn HttpTransport> = if config.allow_network {
            Arc::new(ReqwestTransport::new(&config)?)
        } else {
            Arc::new(DeniedTransport)
        };
        Self::with_transport(config, transport)
    }

    /// Create a runtime that dispatches `http.send` through the given
    /// transport. This is how tests substitute a canned transport.
    pub fn with_transport(
        config: RuntimeConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let mut wasm_config = wasmtime::Config::new();
        wasm_config.consume_fuel(true);
        wasm_config.wasm_memory64(false);

        let engine = Engine::new(&wasm_config)
            .map_err(|e| RuntimeError::Compilation(format!("failed to create wasm engine: {e}")))?;

        let capabilities: Vec<Arc<dyn Capability>> = vec![
            Arc::new(HttpCapability::new(transport)),
            Arc::new(CoreCapability),
            Arc::new(EnvCapability),
        ];

        tracing::info!(
            max_memory = config.max_memory,
            max_fuel = config.max_fuel,
            allow_network = config.allow_network,
            "module runtime initialized"
        );

        Ok(Self {
            engine,
            config,
            capabilities,
        })
    }

    /// Create a runtime with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(RuntimeConfig::default())
    }

    /// Return a reference to the wasmtime [`Engine`].
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Return a reference to the current [`RuntimeConfig`].
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Compile and instantiate a module from raw bytes.
    ///
    /// The high-level flow:
    /// 1. Compile the bytes (textual form is accepted too).
    /// 2. Build a [`Linker`] and link every capability namespace.
    /// 3. Create a fresh [`Store`] with fuel and a memory ceiling.
    /// 4. Instantiate and hand back a [`ModuleInstance`].
    pub fn load(&self, name: &str, bytes: &[u8]) -> Result<ModuleInstance> {
        // 1. Compile.
        let module =
            Module::new(&self.engine, bytes).map_err(|e| RuntimeError::Compilation(e.to_string()))?;

        // 2. Link the capability namespaces.
        let mut linker: Linker<InstanceState> = Linker::new(&self.engine);
        for capability in &self.capabilities {
            capability.link(&mut linker)?;
            tracing::debug!(
                module = name,
                namespace = capability.namespace(),
                "linked capability"
            );
        }

        // 3. Fresh store, fuelled and capped.
        let mut store = Store::new(&self.engine, InstanceState::new(name, &self.config));
        store.limiter(|state| state.limits_mut());
        store
            .set_fuel(self.config.max_fuel)
            .map_err(|e| RuntimeError::Execution(e.to_string()))?;

        // 4. Instantiate.
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| RuntimeError::Instantiation(e.to_string()))?;

        tracing::info!(module = name, "module instantiated");
        Ok(ModuleInstance::new(name, store, instance, self.config.max_fuel))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::transport::StubTransport;

    /// Smallest possible valid module: just the magic and version header.
    fn minimal_wasm() -> Vec<u8> {
        vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00]
    }

    /// A guest that exercises the whole `http` surface through exports.
    const CLIENT_WAT: &str = r#"
        (module
          (import "http" "create" (func $create (param i32) (result i32)))
          (import "http" "set_url" (func $set_url (param i32 i32 i32)))
          (import "http" "send" (func $send (param i32)))
          (import "http" "get_status_code" (func $get_status (param i32) (result i32)))
          (import "http" "get_data_len" (func $get_data_len (param i32) (result i32)))
          (import "http" "get_data" (func $get_data (param i32 i32 i32)))
          (import "core" "string_len" (func $string_len (param i32) (result i32)))
          (import "core" "read_string" (func $read_string (param i32 i32 i32) (result i32)))
          (import "env" "log" (func $log (param i32 i32 i32)))
          (memory (export "memory") 1)
          (func (export "fetch") (param $url_len i32) (result i32)
            (local $req i32)
            (local.set $req (call $create (i32.const 0)))
            (call $set_url (local.get $req) (i32.const 0) (local.get $url_len))
            (call $send (local.get $req))
            (local.get $req))
          (func (export "make") (result i32)
            (call $create (i32.const 0)))
          (func (export "send_only") (param $req i32)
            (call $send (local.get $req)))
          (func (export "status") (param $req i32) (result i32)
            (call $get_status (local.get $req)))
          (func (export "data_len") (param $req i32) (result i32)
            (call $get_data_len (local.get $req)))
          (func (export "copy_data") (param $req i32) (param $ptr i32) (param $cap i32)
            (call $get_data (local.get $req) (local.get $ptr) (local.get $cap)))
          (func (export "strlen") (param $h i32) (result i32)
            (call $string_len (local.get $h)))
          (func (export "readstr") (param $h i32) (param $ptr i32) (param $cap i32) (result i32)
            (call $read_string (local.get $h) (local.get $ptr) (local.get $cap)))
          (func (export "say") (param $ptr i32) (param $len i32)
            (call $log (i32.const 2) (local.get $ptr) (local.get $len))))
    "#;

    fn stub_runtime(stub: Arc<StubTransport>) -> ModuleRuntime {
        ModuleRuntime::with_transport(RuntimeConfig::new(), stub).unwrap()
    }

    #[test]
    fn loads_a_minimal_module() {
        let runtime = ModuleRuntime::with_defaults().unwrap();
        let instance = runtime.load("minimal", &minimal_wasm()).unwrap();
        assert_eq!(instance.name(), "minimal");
    }

    #[test]
    fn rejects_garbage_bytes() {
        let runtime = ModuleRuntime::with_defaults().unwrap();
        let err = runtime.load("bad", b"not wasm").unwrap_err();
        assert!(matches!(err, RuntimeError::Compilation(_)));
    }

    #[test]
    fn fetch_round_trip_through_a_guest() {
        let stub = Arc::new(StubTransport::new().respond(200, b"hi"));
        let runtime = stub_runtime(stub.clone());
        let mut instance = runtime.load("client", CLIENT_WAT.as_bytes()).unwrap();

        instance.write_memory(0, b"http://x/ok").unwrap();
        let req = instance.invoke("fetch", &[11]).unwrap()[0];
        assert_eq!(req, 1);

        assert_eq!(instance.invoke("status", &[req]).unwrap(), vec![200]);
        assert_eq!(instance.invoke("data_len", &[req]).unwrap(), vec![2]);

        instance.invoke("copy_data", &[req, 100, 16]).unwrap();
        assert_eq!(instance.read_memory(100, 2).unwrap(), b"hi");

        let seen = stub.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].url.as_str(), "http://x/ok");
    }

    #[test]
    fn unsent_request_reports_an_error_handle() {
        let stub = Arc::new(StubTransport::new().respond(200, b"hi"));
        let runtime = stub_runtime(stub.clone());
        let mut instance = runtime.load("client", CLIENT_WAT.as_bytes()).unwrap();

        let req = instance.invoke("make", &[]).unwrap()[0];
        instance.invoke("send_only", &[req]).unwrap();

        // The URL was never set, so the transport was never consulted and
        // the status getter hands back a negative error handle instead.
        let status = instance.invoke("status", &[req]).unwrap()[0];
        assert!(status < 0);
        assert_eq!(instance.invoke("data_len", &[req]).unwrap(), vec![0]);
        assert!(stub.requests().is_empty());

        // The guest can read the error text through the core namespace.
        let len = instance.invoke("strlen", &[status]).unwrap()[0];
        assert!(len > 0);
        let written = instance.invoke("readstr", &[status, 200, 64]).unwrap()[0];
        assert_eq!(written, len);
        let text = instance.read_memory(200, written as usize).unwrap();
        assert_eq!(text, b"no response available");
    }

    #[test]
    fn second_send_replaces_the_first_response() {
        let stub = Arc::new(StubTransport::new().respond(200, b"hi").respond(404, b"nope"));
        let runtime = stub_runtime(stub.clone());
        let mut instance = runtime.load("client", CLIENT_WAT.as_bytes()).unwrap();

        instance.write_memory(0, b"http://x/ok").unwrap();
        let req = instance.invoke("fetch", &[11]).unwrap()[0];
        assert_eq!(instance.invoke("status", &[req]).unwrap(), vec![200]);

        instance.invoke("send_only", &[req]).unwrap();
        assert_eq!(instance.invoke("status", &[req]).unwrap(), vec![404]);
        assert_eq!(instance.invoke("data_len", &[req]).unwrap(), vec![4]);
        assert_eq!(stub.requests().len(), 2);
    }

    #[test]
    fn guest_logging_does_not_disturb_execution() {
        let stub = Arc::new(StubTransport::new());
        let runtime = stub_runtime(stub);
        let mut instance = runtime.load("chatty", CLIENT_WAT.as_bytes()).unwrap();

        instance.write_memory(0, b"hello from the guest").unwrap();
        instance.invoke("say", &[0, 20]).unwrap();
        // Out-of-bounds messages are dropped, not trapped.
        instance.invoke("say", &[0, 1_000_000]).unwrap();
    }

    #[test]
    fn isolated_instances_do_not_share_handles() {
        let stub = Arc::new(StubTransport::new());
        let runtime = stub_runtime(stub);
        let mut a = runtime.load("a", CLIENT_WAT.as_bytes()).unwrap();
        let mut b = runtime.load("b", CLIENT_WAT.as_bytes()).unwrap();

        assert_eq!(a.invoke("make", &[]).unwrap(), vec![1]);
        assert_eq!(a.invoke("make", &[]).unwrap(), vec![2]);
        // A fresh instance starts its numbering from scratch.
        assert_eq!(b.invoke("make", &[]).unwrap(), vec![1]);
    }
}
