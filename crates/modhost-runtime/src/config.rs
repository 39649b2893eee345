//! Runtime configuration.
//!
//! [`RuntimeConfig`] bundles the resource ceilings applied to every module
//! instance with the knobs of the HTTP capability.  `Default` gives a safe
//! baseline (small memory, no network); `with_*` methods adjust single
//! fields fluently.

use std::time::Duration;

/// Resource limits and capability settings for the module host.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Ceiling on a module instance's linear memory, in bytes.  Growth
    /// beyond it is denied, which the guest sees as `memory.grow`
    /// returning -1.
    ///
    /// Default: 16 MiB.
    pub max_memory: usize,

    /// Fuel budget per invocation of an exported entry point.
    ///
    /// Fuel is wasmtime's deterministic instruction budget; when it runs
    /// out the call traps instead of spinning forever.  Each invocation
    /// starts from a full tank.
    ///
    /// Default: 1_000_000.
    pub max_fuel: u64,

    /// Wall-clock ceiling on one outbound HTTP request, connect to last
    /// body byte.  An overrun resolves to the absent-response state, so
    /// `send` can stall the guest for at most this long.
    ///
    /// Default: 10 seconds.
    pub http_timeout: Duration,

    /// `User-Agent` header stamped on every outbound request.
    pub user_agent: String,

    /// Whether `http.send` may actually reach the network.
    ///
    /// When false, the `http` namespace still links and requests can be
    /// built as usual; sending just never produces a response.
    ///
    /// Default: false.
    pub allow_network: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_memory: 16 * 1024 * 1024,
            max_fuel: 1_000_000,
            http_timeout: Duration::from_secs(10),
            user_agent: "modhost/0.1".to_owned(),
            allow_network: false,
        }
    }
}

impl RuntimeConfig {
    /// Alias for [`RuntimeConfig::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the instance's linear memory at `bytes`.
    pub fn with_max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Set the per-invocation fuel budget.
    pub fn with_max_fuel(mut self, fuel: u64) -> Self {
        self.max_fuel = fuel;
        self
    }

    /// Set the outbound HTTP timeout.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Set the outbound `User-Agent` header.
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Allow or deny network access for modules.
    pub fn with_allow_network(mut self, allow: bool) -> Self {
        self.allow_network = allow;
        self
    }
}
