//! Failure reporting back into the source conversation.
//!
//! When the pipeline fails after accepting a message, the author deserves
//! to hear about it where they wrote it: a hidden system note is posted
//! into the source thread. If even that fails, the event is dumped to the
//! log between eye-catching delimiters so it can be replayed by hand.

use std::sync::Arc;

use tracing::{error, warn};
use tsync_core::{AdapterRegistry, HandleContext, TargetIds};

use crate::RouteError;
use crate::dispatch::dispatch;
use crate::resolver::CredentialResolver;

pub struct ErrorReporter {
    registry: Arc<AdapterRegistry>,
    resolver: Arc<CredentialResolver>,
}

impl ErrorReporter {
    pub fn new(registry: Arc<AdapterRegistry>, resolver: Arc<CredentialResolver>) -> Self {
        Self { registry, resolver }
    }

    /// Posts a hidden note into the source thread describing the failure,
    /// using the system account. Never fails; an undeliverable report falls
    /// back to the last-resort log block.
    pub async fn report(&self, err: &RouteError, event: &HandleContext) {
        warn!(
            from = %event.source(),
            to = %event.to,
            error = %err,
            "message could not be routed"
        );
        if let Err(report_err) = self.try_report(err, event).await {
            warn!(error = %report_err, "error report could not be delivered");
            log_last_resort(event);
        }
    }

    async fn try_report(&self, err: &RouteError, event: &HandleContext) -> Result<(), RouteError> {
        let source_ids = event.source_ids();
        let mut note = HandleContext::system_message(
            event.source(),
            TargetIds {
                flow: source_ids.flow.clone(),
                thread: Some(source_ids.thread.clone()),
                ..TargetIds::default()
            },
            format!("{} reports `{err}`", event.to),
        );
        self.resolver.resolve_system(&mut note)?;
        dispatch(&self.registry, &mut note).await?;
        Ok(())
    }
}

/// Delimited dump of an event that could not be routed or reported.
fn log_last_resort(event: &HandleContext) {
    error!("v!!!v");
    match serde_json::to_string(event) {
        Ok(json) => error!(%json, "undeliverable event"),
        Err(_) => error!(?event, "undeliverable event"),
    }
    error!("^!!!^");
}
