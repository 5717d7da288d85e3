//! Credential resolution strategies.
//!
//! Destination credentials are resolved one field at a time through a fixed
//! strategy ladder: use what the receipt provides, ask the hub for the
//! user's own token, fall back to the configured generic account, and keep a
//! separate system account for messages the mesh authors itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;
use tsync_core::{Credentials, HandleContext, HubError, SyncConfig, ValueHub};

/// Which credential field a strategy is asked to fill in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    User,
    Token,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Field::User => "user",
            Field::Token => "token",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("could not find a provided {field} for {service}")]
    Provided { field: Field, service: String },
    #[error("could not find hub {field} for {service}")]
    Hub {
        field: Field,
        service: String,
        #[source]
        source: Option<HubError>,
    },
    #[error("could not find generic {field} for {service}")]
    Generic { field: Field, service: String },
    #[error("could not find system {field} for {service}")]
    System { field: Field, service: String },
    #[error("could not find hub or generic {field} for {service}")]
    Exhausted { field: Field, service: String },
}

/// Fills in `to_ids` credential fields from the configured account tables
/// and the hub.
pub struct CredentialResolver {
    hub_service: String,
    hub: Arc<dyn ValueHub>,
    generic_accounts: HashMap<String, Credentials>,
    system_accounts: HashMap<String, Credentials>,
}

impl CredentialResolver {
    pub fn new(config: &SyncConfig, hub: Arc<dyn ValueHub>) -> Self {
        Self {
            hub_service: config.hub_service.clone(),
            hub,
            generic_accounts: config.generic_accounts.clone(),
            system_accounts: config.system_accounts.clone(),
        }
    }

    /// Uses the value the receipt itself carries. Receipts never carry
    /// tokens, so only the author handle can be provided.
    pub fn use_provided(&self, event: &mut HandleContext, field: Field) -> Result<(), ResolveError> {
        match field {
            Field::User => {
                let user = event.source_ids().user.clone();
                if user.is_empty() {
                    return Err(ResolveError::Provided {
                        field,
                        service: event.to.clone(),
                    });
                }
                set(event, field, user);
                Ok(())
            }
            Field::Token => Err(ResolveError::Provided {
                field,
                service: event.to.clone(),
            }),
        }
    }

    /// Looks the value up in the hub under the account the user holds on
    /// the hub service, keyed `"<service> <field>"`.
    pub async fn use_hub(&self, event: &mut HandleContext, field: Field) -> Result<(), ResolveError> {
        let account = if event.source() == self.hub_service {
            Some(event.source_ids().user.clone())
        } else if event.to == self.hub_service {
            event.to_ids.user.clone()
        } else {
            None
        };
        let account = account.ok_or_else(|| ResolveError::Hub {
            field,
            service: event.to.clone(),
            source: None,
        })?;
        let key = format!("{} {field}", event.to);
        let value = self
            .hub
            .fetch_value(&account, &key)
            .await
            .map_err(|err| ResolveError::Hub {
                field,
                service: event.to.clone(),
                source: Some(err),
            })?;
        set(event, field, value);
        Ok(())
    }

    /// Uses the configured generic account for the destination service.
    pub fn use_generic(&self, event: &mut HandleContext, field: Field) -> Result<(), ResolveError> {
        let value = self
            .generic_accounts
            .get(&event.to)
            .and_then(|creds| pick(creds, field))
            .ok_or_else(|| ResolveError::Generic {
                field,
                service: event.to.clone(),
            })?;
        set(event, field, value);
        Ok(())
    }

    /// Uses the configured system account for the destination service.
    pub fn use_system(&self, event: &mut HandleContext, field: Field) -> Result<(), ResolveError> {
        let value = self
            .system_accounts
            .get(&event.to)
            .and_then(|creds| pick(creds, field))
            .ok_or_else(|| ResolveError::System {
                field,
                service: event.to.clone(),
            })?;
        set(event, field, value);
        Ok(())
    }

    /// Resolves the destination token: hub first, generic account second.
    pub async fn resolve_token(&self, event: &mut HandleContext) -> Result<(), ResolveError> {
        match self.use_hub(event, Field::Token).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                debug!(service = %event.to, error = %err, "hub token unavailable, trying generic account");
            }
        }
        self.use_generic(event, Field::Token)
            .map_err(|_| ResolveError::Exhausted {
                field: Field::Token,
                service: event.to.clone(),
            })
    }

    /// Resolves both credential fields from the system account table, for
    /// mesh-authored messages.
    pub fn resolve_system(&self, event: &mut HandleContext) -> Result<(), ResolveError> {
        self.use_system(event, Field::User)?;
        self.use_system(event, Field::Token)
    }
}

fn pick(creds: &Credentials, field: Field) -> Option<String> {
    match field {
        Field::User => creds.user.clone(),
        Field::Token => creds.token.clone(),
    }
}

fn set(event: &mut HandleContext, field: Field, value: String) {
    match field {
        Field::User => event.to_ids.user = Some(value),
        Field::Token => event.to_ids.token = Some(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::from_value;
    use tsync_core::{Flow, ReceiptContext};
    use tsync_testutil::{InMemoryHub, receipt_json};

    fn config(hub_service: &str) -> SyncConfig {
        SyncConfig {
            mappings: vec![vec![
                Flow::new("flowdock", "F1"),
                Flow::new("discourse", "D1"),
            ]],
            generic_accounts: HashMap::new(),
            system_accounts: HashMap::new(),
            hub_service: hub_service.to_string(),
            public_indicators: vec!["%".to_string()],
            private_indicators: vec!["~".to_string()],
        }
    }

    fn event_from(source: &str, to: &str) -> HandleContext {
        let receipt: ReceiptContext =
            from_value(receipt_json(source, "F1", "t1", "joe", "hello")).unwrap();
        HandleContext::new(receipt, to, "D1")
    }

    #[tokio::test]
    async fn provided_user_copies_the_author_handle() {
        let resolver = CredentialResolver::new(&config("flowdock"), Arc::new(InMemoryHub::new()));
        let mut event = event_from("flowdock", "discourse");
        resolver.use_provided(&mut event, Field::User).unwrap();
        assert_eq!(event.to_ids.user.as_deref(), Some("joe"));
    }

    #[tokio::test]
    async fn provided_token_is_never_available() {
        let resolver = CredentialResolver::new(&config("flowdock"), Arc::new(InMemoryHub::new()));
        let mut event = event_from("flowdock", "discourse");
        let err = resolver.use_provided(&mut event, Field::Token).unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not find a provided token for discourse"
        );
    }

    #[tokio::test]
    async fn hub_token_is_keyed_by_destination_service() {
        let hub = Arc::new(InMemoryHub::new());
        hub.insert("joe", "discourse token", "secret");
        let resolver = CredentialResolver::new(&config("flowdock"), Arc::clone(&hub) as _);

        // The source service is the hub, so the source author's hub account
        // holds the destination token.
        let mut event = event_from("flowdock", "discourse");
        resolver.use_hub(&mut event, Field::Token).await.unwrap();
        assert_eq!(event.to_ids.token.as_deref(), Some("secret"));
        assert_eq!(hub.lookups(), 1);
    }

    #[tokio::test]
    async fn hub_uses_the_destination_user_when_routing_towards_the_hub() {
        let hub = Arc::new(InMemoryHub::new());
        hub.insert("joe-on-hub", "discourse token", "secret");
        let resolver = CredentialResolver::new(&config("discourse"), Arc::clone(&hub) as _);

        let mut event = event_from("front", "discourse");
        event.to_ids.user = Some("joe-on-hub".to_string());
        resolver.use_hub(&mut event, Field::Token).await.unwrap();
        assert_eq!(event.to_ids.token.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn resolve_token_falls_back_to_the_generic_account() {
        let mut config = config("flowdock");
        config.generic_accounts.insert(
            "discourse".to_string(),
            Credentials {
                user: Some("mirror-bot".to_string()),
                token: Some("abc".to_string()),
            },
        );
        let resolver = CredentialResolver::new(&config, Arc::new(InMemoryHub::new()));

        let mut event = event_from("flowdock", "discourse");
        resolver.resolve_token(&mut event).await.unwrap();
        assert_eq!(event.to_ids.token.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn resolve_token_exhaustion_names_both_strategies() {
        let resolver = CredentialResolver::new(&config("flowdock"), Arc::new(InMemoryHub::new()));
        let mut event = event_from("flowdock", "discourse");
        let err = resolver.resolve_token(&mut event).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not find hub or generic token for discourse"
        );
        assert!(event.to_ids.token.is_none());
    }

    #[tokio::test]
    async fn system_accounts_fill_both_fields() {
        let mut config = config("flowdock");
        config.system_accounts.insert(
            "discourse".to_string(),
            Credentials {
                user: Some("syncbot".to_string()),
                token: Some("sys".to_string()),
            },
        );
        let resolver = CredentialResolver::new(&config, Arc::new(InMemoryHub::new()));

        let mut event = event_from("flowdock", "discourse");
        resolver.resolve_system(&mut event).unwrap();
        assert_eq!(event.to_ids.user.as_deref(), Some("syncbot"));
        assert_eq!(event.to_ids.token.as_deref(), Some("sys"));
    }
}
