//! External symbol registrar notified around feed subscriptions.
//!
//! The registrar tells the upstream feed service which symbols to publish.
//! Notification is best-effort: callers log failures and carry on.

use crate::error::{WsError, WsResult};
use ordertrack_core::BoxFuture;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub trait SymbolRegistrar: Send + Sync {
    fn notify_subscribe<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, WsResult<()>>;

    fn notify_unsubscribe<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, WsResult<()>>;
}

/// Arc wrapper for registrar trait objects.
pub type DynRegistrar = Arc<dyn SymbolRegistrar>;

#[derive(Debug, Serialize)]
struct SymbolRequest<'a> {
    symbol: &'a str,
}

/// Registrar reached over HTTP: `POST {base_url}/get-subscribe` and
/// `POST {base_url}/get-unsubscribe` with `{"symbol": ...}`.
pub struct HttpRegistrar {
    client: Client,
    base_url: String,
}

impl HttpRegistrar {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> WsResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WsError::Registrar(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, path: &str, symbol: &str) -> WsResult<()> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, symbol = %symbol, "Notifying registrar");

        let response = self
            .client
            .post(&url)
            .json(&SymbolRequest { symbol })
            .send()
            .await
            .map_err(|e| WsError::Registrar(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WsError::Registrar(format!("HTTP {status}: {body}")));
        }
        Ok(())
    }
}

impl SymbolRegistrar for HttpRegistrar {
    fn notify_subscribe<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, WsResult<()>> {
        Box::pin(self.post("get-subscribe", symbol))
    }

    fn notify_unsubscribe<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, WsResult<()>> {
        Box::pin(self.post("get-unsubscribe", symbol))
    }
}

/// Registrar that records notifications, for tests.
#[derive(Debug, Default)]
pub struct RecordingRegistrar {
    calls: parking_lot::Mutex<Vec<(String, String)>>,
    fail: std::sync::atomic::AtomicBool,
}

impl RecordingRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent notification fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Recorded `(action, symbol)` pairs.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    fn record(&self, action: &str, symbol: &str) -> WsResult<()> {
        self.calls
            .lock()
            .push((action.to_string(), symbol.to_string()));
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(WsError::Registrar("registrar unavailable".to_string()));
        }
        Ok(())
    }
}

impl SymbolRegistrar for RecordingRegistrar {
    fn notify_subscribe<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, WsResult<()>> {
        Box::pin(async move { self.record("subscribe", symbol) })
    }

    fn notify_unsubscribe<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, WsResult<()>> {
        Box::pin(async move { self.record("unsubscribe", symbol) })
    }
}
