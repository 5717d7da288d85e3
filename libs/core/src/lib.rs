//! Shared types and adapter contracts for the thread sync mesh.
//!
//! Everything the router and the platform adapters exchange lives here: the
//! generic message envelope in its three progressive shapes (receipt →
//! handle → transmit), the metadata marker protocol, the segregated adapter
//! capability interfaces, the startup configuration surface, and the
//! process-wide webhook server object.

pub mod config;
pub mod envelope;
pub mod http;
pub mod interfaces;
pub mod metadata;
pub mod registry;

pub use config::{Credentials, SyncConfig};
pub use envelope::{
    Action, EmitResponse, EnvelopeError, Flow, HandleContext, ReceiptContext, SYSTEM, SourceIds,
    TargetIds, TransmitContext, TransmitIds,
};
pub use http::WebhookServer;
pub use interfaces::{
    AdapterError, Emitter, EventHandler, EventRegistration, HubError, InboundEvent, Listener,
    NoteFetcher, ValueHub,
};
pub use metadata::{Indicators, Metadata, MetadataError, MetadataFormat};
pub use registry::{AdapterRegistry, RegistryError};
