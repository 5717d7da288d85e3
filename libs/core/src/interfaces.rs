//! Capability interfaces implemented by platform adapters.
//!
//! Each adapter implements only the subset it supports; the router depends
//! on the narrow interface it needs at each call site rather than on a
//! concrete adapter type.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::envelope::{EmitResponse, ReceiptContext, TransmitContext};

/// An adapter-cooked inbound event. `context` is the adapter-assigned
/// thread/topic identifier used to scope ordering; `raw` is the untouched
/// vendor payload.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub context: String,
    pub event_type: String,
    pub raw: Value,
}

/// Callback attached to a listener for a set of vendor event names.
pub type EventHandler = Arc<dyn Fn(InboundEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// An expression of interest in inbound events, named for diagnostics.
#[derive(Clone)]
pub struct EventRegistration {
    pub events: Vec<String>,
    pub name: String,
    pub handler: EventHandler,
}

/// Receives vendor webhooks and surfaces them as generic receipts.
#[async_trait]
pub trait Listener: Send + Sync {
    fn service_name(&self) -> &str;

    /// Maps a generic event name ("message") to the vendor trigger name
    /// used at registration time.
    fn translate_event_name(&self, generic: &str) -> String;

    fn register_event(&self, registration: EventRegistration);

    /// Normalizes a vendor webhook payload.
    async fn make_generic(&self, raw: &Value) -> Result<ReceiptContext, AdapterError>;
}

/// Delivers transmit contexts to the vendor API.
#[async_trait]
pub trait Emitter: Send + Sync {
    fn service_name(&self) -> &str;

    /// Denormalizes a transmit context into a vendor payload. May fail, for
    /// example when a new thread is requested without a title.
    async fn make_specific(&self, event: &TransmitContext) -> Result<Value, AdapterError>;

    async fn send_payload(&self, payload: &Value) -> Result<EmitResponse, AdapterError>;
}

// Needed so `Result<Arc<dyn Emitter>, _>::unwrap_err` can render the `Ok`
// variant in its panic message.
impl std::fmt::Debug for dyn Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("service", &self.service_name())
            .finish_non_exhaustive()
    }
}

/// Searches a thread's note history (comments/whispers) for marker scanning.
///
/// Each call re-fetches; the returned bodies are finite and already filtered
/// down to those matching `filter`.
#[async_trait]
pub trait NoteFetcher: Send + Sync {
    async fn fetch_notes(
        &self,
        thread: &str,
        flow: &str,
        filter: &Regex,
    ) -> Result<Vec<String>, AdapterError>;
}

/// Key-value lookup service for per-user credential storage.
#[async_trait]
pub trait ValueHub: Send + Sync {
    async fn fetch_value(&self, user: &str, key: &str) -> Result<String, HubError>;
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid payload for {service}: {reason}")]
    InvalidPayload { service: String, reason: String },
    #[error("{service} api request failed")]
    Api {
        service: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("no value stored for {user} {key}")]
    Missing { user: String, key: String },
    #[error("hub lookup failed")]
    Transport(#[source] anyhow::Error),
}
