//! Routing core of the thread sync mesh.
//!
//! The router turns configured chains of flows into per-edge event
//! registrations, then runs every inbound message through one pipeline:
//! normalize, filter, correlate threads, resolve credentials, dispatch, and
//! report failures back into the thread they came from. Messages sharing a
//! conversation are serialized through per-context queues.

use thiserror::Error;

pub mod correlator;
pub mod dispatch;
pub mod reporter;
pub mod resolver;
pub mod router;

pub use correlator::{CorrelateError, LinkKind, ThreadCorrelator};
pub use dispatch::DispatchError;
pub use reporter::ErrorReporter;
pub use resolver::{CredentialResolver, Field, ResolveError};
pub use router::SyncRouter;

/// Failure of the routing pipeline after the filter accepted a message.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
