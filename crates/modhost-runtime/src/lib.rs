//! Modhost WebAssembly module runtime.
//!
//! This crate hosts untrusted Wasm modules and hands them a small,
//! capability-scoped view of the world through imported functions.
//!
//! - **[`config`]** -- [`RuntimeConfig`] controls memory limits, fuel
//!   budgets, HTTP timeouts, and the network switch.
//! - **[`error`]** -- [`RuntimeError`] enumerates every failure mode.
//! - **[`handle`]** -- [`HandleTable`] maps the opaque integers guests see
//!   to host-side values.
//! - **[`http`]** -- the `http.*` import namespace: build, send, and read
//!   back requests over the handle ABI.
//! - **[`host`]** -- the `core.*` string-handle consumers and `env.log`.
//! - **[`runtime`]** -- [`ModuleRuntime`] is the main entry point: load
//!   `.wasm` bytes, link capabilities, enforce limits.
//! - **[`loader`]** -- [`ModuleLoader`] scans a directory and keeps the
//!   resulting instances addressable by name.
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime; guest calls themselves run on blocking
//! threads because `http.send` is synchronous from the guest's point of
//! view.

pub mod capability;
pub mod config;
pub mod error;
pub mod handle;
pub mod host;
pub mod http;
pub mod instance;
pub mod loader;
pub mod memory;
pub mod request;
pub mod runtime;
pub mod transport;

// Re-export the most commonly used types at the crate root.
pub use capability::Capability;
pub use config::RuntimeConfig;
pub use error::{Result, RuntimeError};
pub use handle::{Handle, HandleTable, HostValue};
pub use host::{CoreCapability, EnvCapability};
pub use http::HttpCapability;
pub use instance::{InstanceState, ModuleInstance};
pub use loader::ModuleLoader;
pub use request::{HttpMethod, HttpRequest, HttpResponse, OutboundRequest};
pub use runtime::ModuleRuntime;
pub use transport::{DeniedTransport, HttpTransport, ReqwestTransport};
