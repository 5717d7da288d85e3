//! Edge registration and the routing pipeline.

use std::sync::Arc;

use tracing::{debug, info, warn};
use tsync_core::{
    AdapterRegistry, EmitResponse, EventHandler, EventRegistration, Flow, HandleContext,
    InboundEvent, ReceiptContext, RegistryError, SYSTEM, SyncConfig,
};
use tsync_ordering::ContextQueues;

use crate::RouteError;
use crate::correlator::{LinkKind, ThreadCorrelator};
use crate::dispatch::dispatch;
use crate::reporter::ErrorReporter;
use crate::resolver::{CredentialResolver, Field};

/// The sync mesh's routing engine.
///
/// One instance serves every configured edge. Cloning the handle is cheap;
/// all clones share the registry, the credential resolver and the
/// per-conversation queues.
#[derive(Clone)]
pub struct SyncRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    registry: Arc<AdapterRegistry>,
    queues: ContextQueues,
    resolver: Arc<CredentialResolver>,
    correlator: ThreadCorrelator,
    reporter: ErrorReporter,
}

impl SyncRouter {
    /// Builds the router against a frozen adapter registry. Fails when the
    /// configured hub service has no hub registered.
    pub fn new(config: &SyncConfig, registry: Arc<AdapterRegistry>) -> Result<Self, RegistryError> {
        let hub = registry.hub(&config.hub_service)?;
        let resolver = Arc::new(CredentialResolver::new(config, hub));
        let correlator = ThreadCorrelator::new(Arc::clone(&registry), Arc::clone(&resolver));
        let reporter = ErrorReporter::new(Arc::clone(&registry), Arc::clone(&resolver));
        Ok(Self {
            inner: Arc::new(RouterInner {
                registry,
                queues: ContextQueues::new(),
                resolver,
                correlator,
                reporter,
            }),
        })
    }

    /// Registers every adjacent pair of each chain as a pair of directed
    /// edges: A↔B↔C wires A↔B and B↔C, never A↔C.
    pub fn register_chains(&self, mappings: &[Vec<Flow>]) -> Result<(), RegistryError> {
        for chain in mappings {
            for pair in chain.windows(2) {
                self.register_edge(&pair[0], &pair[1])?;
                self.register_edge(&pair[1], &pair[0])?;
            }
        }
        Ok(())
    }

    /// Wires one directed edge: a message listener on the source service
    /// whose handler queues the inbound event for routing towards `to`.
    ///
    /// Every capability the pipeline may need later is asserted up front,
    /// so a missing adapter surfaces at startup rather than mid-route.
    pub fn register_edge(&self, from: &Flow, to: &Flow) -> Result<(), RegistryError> {
        let listener = self.inner.registry.listener(&from.service)?;
        self.inner.registry.emitter(&from.service)?;
        self.inner.registry.emitter(&to.service)?;
        self.inner.registry.note_fetcher(&from.service)?;

        let name = format!("{}:{}=>{}:{}", from.service, from.flow, to.service, to.flow);
        let event = listener.translate_event_name("message");
        let inner = Arc::clone(&self.inner);
        let from_owned = from.clone();
        let to_owned = to.clone();
        let handler: EventHandler = Arc::new(move |inbound: InboundEvent| {
            let inner = Arc::clone(&inner);
            let from = from_owned.clone();
            let to = to_owned.clone();
            Box::pin(async move {
                // Scoped per source thread so one conversation never
                // reorders while unrelated ones run in parallel.
                let context = format!("{}:{}", from.service, inbound.context);
                let queues = inner.queues.clone();
                let worker = Arc::clone(&inner);
                queues.enqueue(context, async move {
                    worker.route(&from, &to, inbound).await;
                });
            })
        });
        listener.register_event(EventRegistration {
            events: vec![event],
            name,
            handler,
        });
        debug!(from = %from.service, to = %to.service, "edge registered");
        Ok(())
    }

    /// Conversations with a live queue worker, for observability.
    pub fn active_contexts(&self) -> usize {
        self.inner.queues.active_contexts()
    }
}

impl RouterInner {
    async fn route(&self, from: &Flow, to: &Flow, inbound: InboundEvent) {
        let listener = match self.registry.listener(&from.service) {
            Ok(listener) => listener,
            Err(err) => {
                warn!(error = %err, "listener vanished after registration");
                return;
            }
        };
        let receipt = match listener.make_generic(&inbound.raw).await {
            Ok(receipt) => receipt,
            Err(err) => {
                warn!(service = %from.service, error = %err, "discarding unreadable event");
                count(from, to, "invalid");
                return;
            }
        };
        if !should_route(&receipt, from, to) {
            debug!(
                from = %from.service,
                to = %to.service,
                source = %receipt.source,
                genesis = ?receipt.genesis,
                "filtered"
            );
            count(from, to, "filtered");
            return;
        }

        let mut event = HandleContext::new(receipt, to.service.clone(), to.flow.clone());
        let correlated = match self.correlator.find(&mut event, LinkKind::Thread).await {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %err, "no usable thread link, opening a new thread");
                false
            }
        };
        match self.relay(&mut event, correlated).await {
            Ok(response) => {
                info!(
                    from = %from.service,
                    to = %to.service,
                    message = %response.message,
                    thread = %response.thread,
                    title = ?event.receipt().title,
                    "message routed"
                );
                count(from, to, "routed");
            }
            Err(err) => {
                count(from, to, "failed");
                self.reporter.report(&err, &event).await;
            }
        }
    }

    async fn relay(
        &self,
        event: &mut HandleContext,
        correlated: bool,
    ) -> Result<EmitResponse, RouteError> {
        self.resolver.use_provided(event, Field::User)?;
        self.resolver.resolve_token(event).await?;
        let response = dispatch(&self.registry, event).await?;
        if !correlated {
            // The message is already delivered; a failed marker pair costs
            // re-correlation later, not the message.
            if let Err(err) = self.correlator.record(event, LinkKind::Thread).await {
                warn!(error = %err, "connection markers could not be recorded");
            }
        }
        Ok(response)
    }
}

/// Loop prevention: relay only messages observed in the edge's source flow
/// that neither the mesh itself nor the destination service introduced.
fn should_route(receipt: &ReceiptContext, from: &Flow, to: &Flow) -> bool {
    if receipt.source_ids.flow != from.flow {
        return false;
    }
    let blocked = [SYSTEM, to.service.as_str()];
    if blocked.contains(&receipt.source.as_str()) {
        return false;
    }
    if let Some(genesis) = &receipt.genesis
        && blocked.contains(&genesis.as_str())
    {
        return false;
    }
    true
}

fn count(from: &Flow, to: &Flow, outcome: &'static str) {
    metrics::counter!(
        "sync_messages_total",
        "from" => from.service.clone(),
        "to" => to.service.clone(),
        "outcome" => outcome
    )
    .increment(1);
}
