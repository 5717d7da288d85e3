//! Thread correlation through connection markers.
//!
//! Synced threads are linked by hidden notes of the form
//! `Connects to <service> thread <id>` left on both sides of the link. On
//! receipt of a message the correlator scans the source thread's notes for a
//! marker naming the destination; after opening a new destination thread it
//! records a fresh marker pair so later messages correlate.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;
use tsync_core::{AdapterError, AdapterRegistry, HandleContext, RegistryError, TargetIds};

use crate::dispatch::{DispatchError, dispatch};
use crate::resolver::{CredentialResolver, ResolveError};

/// What a connection marker links. Only whole threads are linked today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Thread,
}

impl LinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkKind::Thread => "thread",
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CorrelateError {
    #[error("no {kind} link to {service} found")]
    NotFound { kind: LinkKind, service: String },
    #[error("cannot record a {kind} link before both sides exist")]
    Incomplete { kind: LinkKind },
    #[error("searching {service} notes failed")]
    Fetch {
        service: String,
        #[source]
        source: AdapterError,
    },
    #[error("marker pattern for {service} does not compile")]
    Pattern {
        service: String,
        #[source]
        source: regex::Error,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Finds and records thread links between the source and destination side
/// of a handle context.
pub struct ThreadCorrelator {
    registry: Arc<AdapterRegistry>,
    resolver: Arc<CredentialResolver>,
}

impl ThreadCorrelator {
    pub fn new(registry: Arc<AdapterRegistry>, resolver: Arc<CredentialResolver>) -> Self {
        Self { registry, resolver }
    }

    /// Scans the source thread's notes for a marker naming the destination
    /// service, writing the linked id into `to_ids` on success. Notes come
    /// back oldest first; the most recent match wins.
    pub async fn find(&self, event: &mut HandleContext, kind: LinkKind) -> Result<(), CorrelateError> {
        let pattern = marker_pattern(&event.to, kind)?;
        let fetcher = self.registry.note_fetcher(event.source())?;
        let notes = fetcher
            .fetch_notes(&event.source_ids().thread, &event.source_ids().flow, &pattern)
            .await
            .map_err(|source| CorrelateError::Fetch {
                service: event.source().to_string(),
                source,
            })?;
        for body in notes.iter().rev() {
            if let Some(caps) = pattern.captures(body) {
                event.to_ids.thread = Some(caps[1].to_string());
                return Ok(());
            }
        }
        Err(CorrelateError::NotFound {
            kind,
            service: event.to.clone(),
        })
    }

    /// Drops one marker into each side of a freshly created link, using the
    /// system accounts. Both posts run concurrently; either failure
    /// surfaces, but a recorded marker is never rolled back.
    pub async fn record(&self, event: &HandleContext, kind: LinkKind) -> Result<(), CorrelateError> {
        let to_thread = event
            .to_ids
            .thread
            .clone()
            .ok_or(CorrelateError::Incomplete { kind })?;
        let source_ids = event.source_ids();

        let mut source_note = HandleContext::system_message(
            event.source(),
            TargetIds {
                flow: source_ids.flow.clone(),
                thread: Some(source_ids.thread.clone()),
                ..TargetIds::default()
            },
            marker_text(&event.to, kind, &to_thread, event.to_ids.url.as_deref()),
        );
        let mut dest_note = HandleContext::system_message(
            event.to.clone(),
            TargetIds {
                flow: event.to_ids.flow.clone(),
                thread: Some(to_thread),
                ..TargetIds::default()
            },
            marker_text(
                event.source(),
                kind,
                &source_ids.thread,
                source_ids.url.as_deref(),
            ),
        );
        self.resolver.resolve_system(&mut source_note)?;
        self.resolver.resolve_system(&mut dest_note)?;

        let (into_source, into_dest) = tokio::join!(
            dispatch(&self.registry, &mut source_note),
            dispatch(&self.registry, &mut dest_note),
        );
        into_source?;
        into_dest?;
        Ok(())
    }
}

/// Case-insensitive scan for a marker naming `service`, capturing the
/// linked id.
fn marker_pattern(service: &str, kind: LinkKind) -> Result<Regex, CorrelateError> {
    Regex::new(&format!(
        r"(?i)connects to {} {} ([A-Za-z0-9+/=-]+)",
        regex::escape(service),
        kind
    ))
    .map_err(|source| CorrelateError::Pattern {
        service: service.to_string(),
        source,
    })
}

fn marker_text(service: &str, kind: LinkKind, id: &str, url: Option<&str>) -> String {
    match url {
        Some(url) => format!("[Connects to {service} {kind} {id}]({url})"),
        None => format!("Connects to {service} {kind} {id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::from_value;
    use std::collections::HashMap;
    use tsync_core::{Credentials, Flow, ReceiptContext, SyncConfig};
    use tsync_testutil::{FakeMessenger, InMemoryHub, indicators, receipt_json};

    fn harness() -> (Arc<AdapterRegistry>, ThreadCorrelator, Arc<FakeMessenger>, Arc<FakeMessenger>) {
        let flowdock = Arc::new(FakeMessenger::new("flowdock", indicators()));
        let discourse = Arc::new(FakeMessenger::new("discourse", indicators()));
        let mut registry = AdapterRegistry::new();
        registry.register_listener(Arc::clone(&flowdock) as _);
        registry.register_emitter(Arc::clone(&flowdock) as _);
        registry.register_note_fetcher("flowdock", Arc::clone(&flowdock) as _);
        registry.register_listener(Arc::clone(&discourse) as _);
        registry.register_emitter(Arc::clone(&discourse) as _);
        registry.register_note_fetcher("discourse", Arc::clone(&discourse) as _);
        registry.register_hub("flowdock", Arc::new(InMemoryHub::new()));
        let registry = Arc::new(registry);

        let mut system_accounts = HashMap::new();
        for service in ["flowdock", "discourse"] {
            system_accounts.insert(
                service.to_string(),
                Credentials {
                    user: Some("syncbot".to_string()),
                    token: Some("sys".to_string()),
                },
            );
        }
        let config = SyncConfig {
            mappings: vec![vec![
                Flow::new("flowdock", "F1"),
                Flow::new("discourse", "D1"),
            ]],
            generic_accounts: HashMap::new(),
            system_accounts,
            hub_service: "flowdock".to_string(),
            public_indicators: vec!["%".to_string()],
            private_indicators: vec!["~".to_string()],
        };
        let resolver = Arc::new(CredentialResolver::new(
            &config,
            registry.hub("flowdock").unwrap(),
        ));
        let correlator = ThreadCorrelator::new(Arc::clone(&registry), resolver);
        (registry, correlator, flowdock, discourse)
    }

    fn event() -> HandleContext {
        let receipt: ReceiptContext =
            from_value(receipt_json("flowdock", "F1", "t1", "joe", "hello")).unwrap();
        HandleContext::new(receipt, "discourse", "D1")
    }

    #[tokio::test]
    async fn find_reads_the_linked_thread_from_a_marker() {
        let (_registry, correlator, flowdock, _discourse) = harness();
        flowdock.push_note("t1", "[Connects to discourse thread 99](https://discourse.test/99)");

        let mut event = event();
        correlator.find(&mut event, LinkKind::Thread).await.unwrap();
        assert_eq!(event.to_ids.thread.as_deref(), Some("99"));
    }

    #[tokio::test]
    async fn find_without_marker_is_not_found() {
        let (_registry, correlator, flowdock, _discourse) = harness();
        flowdock.push_note("t1", "just some chatter");

        let mut event = event();
        let err = correlator.find(&mut event, LinkKind::Thread).await.unwrap_err();
        assert!(matches!(err, CorrelateError::NotFound { .. }));
        assert!(event.to_ids.thread.is_none());
    }

    #[tokio::test]
    async fn find_prefers_the_most_recent_marker() {
        let (_registry, correlator, flowdock, _discourse) = harness();
        flowdock.push_note("t1", "[Connects to discourse thread 11](https://discourse.test/11)");
        flowdock.push_note("t1", "[Connects to discourse thread 22](https://discourse.test/22)");

        let mut event = event();
        correlator.find(&mut event, LinkKind::Thread).await.unwrap();
        assert_eq!(event.to_ids.thread.as_deref(), Some("22"));
    }

    #[tokio::test]
    async fn find_ignores_markers_naming_other_services() {
        let (_registry, correlator, flowdock, _discourse) = harness();
        flowdock.push_note("t1", "[Connects to front thread 42](https://front.test/42)");

        let mut event = event();
        let err = correlator.find(&mut event, LinkKind::Thread).await.unwrap_err();
        assert!(matches!(err, CorrelateError::NotFound { .. }));
    }

    #[tokio::test]
    async fn record_leaves_a_marker_on_both_sides() {
        let (_registry, correlator, flowdock, discourse) = harness();

        let mut event = event();
        event.to_ids.thread = Some("d9".to_string());
        correlator.record(&event, LinkKind::Thread).await.unwrap();

        let source_notes = flowdock.notes_in("t1");
        assert!(
            source_notes
                .iter()
                .any(|body| body.contains("Connects to discourse thread d9"))
        );
        let dest_notes = discourse.notes_in("d9");
        assert!(
            dest_notes
                .iter()
                .any(|body| body.contains("Connects to flowdock thread t1"))
        );
        // Both markers were sent with the system account.
        for payload in flowdock.sent().iter().chain(discourse.sent().iter()) {
            assert_eq!(payload["user"], "syncbot");
            assert_eq!(payload["token"], "sys");
        }
    }

    #[tokio::test]
    async fn record_requires_the_destination_thread() {
        let (_registry, correlator, _flowdock, _discourse) = harness();
        let err = correlator
            .record(&event(), LinkKind::Thread)
            .await
            .unwrap_err();
        assert!(matches!(err, CorrelateError::Incomplete { .. }));
    }

    #[tokio::test]
    async fn recorded_markers_are_findable_again() {
        let (_registry, correlator, _flowdock, _discourse) = harness();

        let mut event = event();
        event.to_ids.thread = Some("d9".to_string());
        correlator.record(&event, LinkKind::Thread).await.unwrap();

        let mut later = self::event();
        correlator.find(&mut later, LinkKind::Thread).await.unwrap();
        assert_eq!(later.to_ids.thread.as_deref(), Some("d9"));
    }
}
