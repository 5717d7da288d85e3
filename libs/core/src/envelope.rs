use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Source name carried by system-authored messages (error reports, markers).
pub const SYSTEM: &str = "system";

/// One endpoint of a sync edge: a named channel/category/inbox within a service.
///
/// ```
/// use tsync_core::Flow;
///
/// let f = Flow::new("discourse", "support");
/// assert_eq!(f.service, "discourse");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Flow {
    pub service: String,
    pub flow: String,
}

impl Flow {
    pub fn new(service: impl Into<String>, flow: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            flow: flow.into(),
        }
    }
}

/// The only message action the mesh relays today.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    Create,
}

/// Identifiers describing where an inbound message came from.
///
/// Immutable once a receipt exists; the router only ever writes the
/// destination side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIds {
    pub flow: String,
    pub message: String,
    pub thread: String,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Destination identifiers, filled in field by field as the pipeline
/// resolves them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetIds {
    pub flow: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Normalized inbound event as produced by a listener adapter.
///
/// `genesis` names the service that last introduced the message into the
/// sync mesh (`None` when the message originated where it was observed);
/// `first` flags the thread-opening message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptContext {
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub first: bool,
    #[serde(default)]
    pub genesis: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    pub source: String,
    pub source_ids: SourceIds,
    pub text: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// A receipt plus its mutable destination half: the router's working object.
///
/// The receipt side is only reachable through [`HandleContext::receipt`], so
/// pipeline stages can resolve `to_ids` one field at a time without ever
/// touching the source identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandleContext {
    receipt: ReceiptContext,
    pub to: String,
    pub to_ids: TargetIds,
}

impl HandleContext {
    /// Seeds a handle context for routing towards `to_service`/`to_flow`.
    pub fn new(receipt: ReceiptContext, to_service: impl Into<String>, to_flow: impl Into<String>) -> Self {
        Self {
            receipt,
            to: to_service.into(),
            to_ids: TargetIds {
                flow: to_flow.into(),
                ..TargetIds::default()
            },
        }
    }

    /// Builds a hidden, system-authored message (error reports, connection
    /// markers) aimed at an already-known destination.
    pub fn system_message(to: impl Into<String>, to_ids: TargetIds, text: impl Into<String>) -> Self {
        Self {
            receipt: ReceiptContext {
                action: Action::Create,
                first: false,
                genesis: Some(SYSTEM.to_string()),
                hidden: true,
                source: SYSTEM.to_string(),
                source_ids: SourceIds::default(),
                text: text.into(),
                title: None,
            },
            to: to.into(),
            to_ids,
        }
    }

    pub fn receipt(&self) -> &ReceiptContext {
        &self.receipt
    }

    pub fn source(&self) -> &str {
        &self.receipt.source
    }

    pub fn source_ids(&self) -> &SourceIds {
        &self.receipt.source_ids
    }

    /// Snapshots this context for transmission.
    ///
    /// Fails unless `to_ids.user` and `to_ids.token` are populated: a
    /// transmit context without credentials must never reach an emitter.
    pub fn to_transmit(&self) -> Result<TransmitContext, EnvelopeError> {
        let user = self
            .to_ids
            .user
            .clone()
            .ok_or_else(|| EnvelopeError::MissingCredential {
                field: "user",
                service: self.to.clone(),
            })?;
        let token = self
            .to_ids
            .token
            .clone()
            .ok_or_else(|| EnvelopeError::MissingCredential {
                field: "token",
                service: self.to.clone(),
            })?;
        Ok(TransmitContext {
            action: self.receipt.action,
            first: self.receipt.first,
            genesis: self.receipt.genesis.clone(),
            hidden: self.receipt.hidden,
            source: self.receipt.source.clone(),
            source_ids: self.receipt.source_ids.clone(),
            text: self.receipt.text.clone(),
            title: self.receipt.title.clone(),
            to: self.to.clone(),
            to_ids: TransmitIds {
                flow: self.to_ids.flow.clone(),
                user,
                token,
                thread: self.to_ids.thread.clone(),
                url: self.to_ids.url.clone(),
            },
        })
    }
}

/// Fully resolved destination identifiers. `thread: None` signals that the
/// emitter must create a new thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmitIds {
    pub flow: String,
    pub user: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A handle context whose destination side is fully populated, ready for an
/// emitter to denormalize and send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmitContext {
    pub action: Action,
    pub first: bool,
    pub genesis: Option<String>,
    pub hidden: bool,
    pub source: String,
    pub source_ids: SourceIds,
    pub text: String,
    pub title: Option<String>,
    pub to: String,
    pub to_ids: TransmitIds,
}

/// Identifiers reported by an emitter after a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitResponse {
    pub message: String,
    pub thread: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("missing {field} for transmission to {service}")]
    MissingCredential {
        field: &'static str,
        service: String,
    },
}
