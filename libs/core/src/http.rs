//! Process-wide webhook server.
//!
//! Constructed once during startup and handed to adapters that need to
//! register inbound routes; serving is an explicit step rather than a lazy
//! side effect of the first adapter coming up.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{Router, routing::get};

pub struct WebhookServer {
    addr: SocketAddr,
    router: Router,
}

impl WebhookServer {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            router: Router::new().route("/healthz", get(healthz)),
        }
    }

    /// Nests an adapter's webhook routes under `path`.
    pub fn mount(&mut self, path: &str, routes: Router) {
        self.router = std::mem::take(&mut self.router).nest(path, routes);
    }

    /// Snapshot of the composed router, mainly for tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("binding webhook server to {}", self.addr))?;
        tracing::info!(addr = %self.addr, "webhook server listening");
        axum::serve(listener, self.router)
            .await
            .context("webhook server terminated")?;
        Ok(())
    }
}

async fn healthz() -> &'static str {
    "ok"
}
