//! The networking seam behind `http.send`.
//!
//! [`HttpTransport`] is the synchronous interface the capability layer talks
//! to: hand over a validated request, block until the network produced an
//! outcome.  [`ReqwestTransport`] is the production implementation; it owns
//! a small tokio runtime on a dedicated thread, issues the request as an
//! async task there, and parks the calling guest thread on a one-shot
//! channel until the task signals completion.  Timeouts and connect
//! failures resolve to `None` (the absent-response state), never a hang.

use std::sync::mpsc;

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::request::{HttpMethod, HttpResponse, OutboundRequest};

/// Executes outbound HTTP requests on behalf of guest modules.
///
/// `fetch` returns `None` when the network layer never produced a result
/// (connect failure, timeout, cancellation) and `Some` once a server
/// answered, even if reading the body subsequently failed.
pub trait HttpTransport: Send + Sync {
    fn fetch(&self, request: OutboundRequest) -> Option<HttpResponse>;
}

/// Production transport backed by [`reqwest`].
///
/// The runtime lives on its own named thread so `fetch` can be called from
/// any thread, including wasmtime's guest-executing thread, without an
/// ambient async runtime.
pub struct ReqwestTransport {
    client: reqwest::Client,
    handle: tokio::runtime::Handle,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl ReqwestTransport {
    /// Build a transport from the runtime configuration.
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| RuntimeError::Transport(format!("failed to build http client: {e}")))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let worker = std::thread::Builder::new()
            .name("modhost-http".to_owned())
            .spawn(move || {
                // Drives all spawned request tasks until shutdown.
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
            })?;

        tracing::debug!(timeout = ?config.http_timeout, "http transport initialized");

        Ok(Self {
            client,
            handle,
            shutdown: Some(shutdown_tx),
            worker: Some(worker),
        })
    }
}

impl HttpTransport for ReqwestTransport {
    fn fetch(&self, request: OutboundRequest) -> Option<HttpResponse> {
        let (tx, rx) = mpsc::sync_channel::<Option<HttpResponse>>(1);
        let client = self.client.clone();
        self.handle.spawn(async move {
            let outcome = perform(client, request).await;
            let _ = tx.send(outcome);
        });
        // Signalled exactly once by the task above; a dropped sender means
        // the worker went away, which also counts as "no result".
        match rx.recv() {
            Ok(outcome) => outcome,
            Err(_) => None,
        }
    }
}

impl Drop for ReqwestTransport {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Execute one request and classify the outcome.
async fn perform(client: reqwest::Client, request: OutboundRequest) -> Option<HttpResponse> {
    let method = match request.method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    };

    let mut builder = client.request(method, request.url.clone());
    for (key, value) in &request.headers {
        builder = builder.header(key.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
        builder = builder.body(body);
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(err) => {
            tracing::debug!(url = %request.url, error = %err, "request produced no response");
            return None;
        }
    };

    let status = response.status().as_u16();
    match response.bytes().await {
        Ok(bytes) => Some(HttpResponse {
            status,
            data: Some(bytes.to_vec()),
            error: None,
        }),
        Err(err) => Some(HttpResponse {
            status,
            data: None,
            error: Some(err.to_string()),
        }),
    }
}

/// Transport used when network access is disabled.
///
/// Every request resolves to the absent-response state.
#[derive(Debug, Default)]
pub struct DeniedTransport;

impl HttpTransport for DeniedTransport {
    fn fetch(&self, request: OutboundRequest) -> Option<HttpResponse> {
        tracing::debug!(url = %request.url, "network access disabled, request dropped");
        None
    }
}

/// Canned transport for tests.
///
/// Serves queued responses in order and records every request it saw;
/// an exhausted queue reports the absent state.
#[cfg(test)]
pub(crate) struct StubTransport {
    responses: std::sync::Mutex<std::collections::VecDeque<Option<HttpResponse>>>,
    seen: std::sync::Mutex<Vec<OutboundRequest>>,
}

#[cfg(test)]
impl StubTransport {
    pub(crate) fn new() -> Self {
        Self {
            responses: std::sync::Mutex::new(std::collections::VecDeque::new()),
            seen: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Queue the outcome for the next `fetch` call.
    pub(crate) fn push(self, response: Option<HttpResponse>) -> Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    /// Queue a successful response with the given status and body.
    pub(crate) fn respond(self, status: u16, body: &[u8]) -> Self {
        self.push(Some(HttpResponse {
            status,
            data: Some(body.to_vec()),
            error: None,
        }))
    }

    /// Every request fetched so far, in order.
    pub(crate) fn requests(&self) -> Vec<OutboundRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl HttpTransport for StubTransport {
    fn fetch(&self, request: OutboundRequest) -> Option<HttpResponse> {
        self.seen.lock().unwrap().push(request);
        self.responses.lock().unwrap().pop_front().flatten()
    }
}
