//! Final emission step shared by the pipeline, the correlator and the error
//! reporter.

use thiserror::Error;
use tsync_core::{AdapterError, AdapterRegistry, EmitResponse, EnvelopeError, HandleContext, RegistryError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error("transmission to {service} failed")]
    Transmit {
        service: String,
        #[source]
        source: AdapterError,
    },
}

/// Denormalizes and sends a fully resolved context through the destination
/// emitter, writing the vendor-assigned identifiers back onto `to_ids`.
pub(crate) async fn dispatch(
    registry: &AdapterRegistry,
    event: &mut HandleContext,
) -> Result<EmitResponse, DispatchError> {
    let emitter = registry.emitter(&event.to)?;
    let transmit = event.to_transmit()?;
    let payload = emitter
        .make_specific(&transmit)
        .await
        .map_err(|source| DispatchError::Transmit {
            service: event.to.clone(),
            source,
        })?;
    let response = emitter
        .send_payload(&payload)
        .await
        .map_err(|source| DispatchError::Transmit {
            service: event.to.clone(),
            source,
        })?;
    event.to_ids.message = Some(response.message.clone());
    event.to_ids.thread = Some(response.thread.clone());
    if let Some(url) = &response.url {
        event.to_ids.url = Some(url.clone());
    }
    Ok(response)
}
