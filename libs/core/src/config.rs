use std::collections::HashMap;
use std::env;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::envelope::Flow;
use crate::metadata::{Indicators, MetadataError};

const MAPPINGS_ENV: &str = "THREADSYNC_MAPPINGS";
const GENERIC_ACCOUNTS_ENV: &str = "THREADSYNC_GENERIC_AUTHOR_ACCOUNTS";
const SYSTEM_ACCOUNTS_ENV: &str = "THREADSYNC_SYSTEM_MESSAGE_ACCOUNTS";
const HUB_SERVICE_ENV: &str = "THREADSYNC_HUB_SERVICE";
const PUBLIC_INDICATORS_ENV: &str = "THREADSYNC_PUBLIC_INDICATORS";
const PRIVATE_INDICATORS_ENV: &str = "THREADSYNC_PRIVATE_INDICATORS";

/// Account details for one service, used by the generic and system
/// credential tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

/// Startup configuration for the sync mesh, loaded once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Ordered chains of flows; adjacent pairs become bidirectional edges.
    pub mappings: Vec<Vec<Flow>>,
    /// Fallback author accounts for external/anonymous senders.
    #[serde(default)]
    pub generic_accounts: HashMap<String, Credentials>,
    /// Accounts used for system-authored messages only.
    #[serde(default)]
    pub system_accounts: HashMap<String, Credentials>,
    /// Which configured service also plays the hub role.
    pub hub_service: String,
    #[serde(default = "default_public_indicators")]
    pub public_indicators: Vec<String>,
    #[serde(default = "default_private_indicators")]
    pub private_indicators: Vec<String>,
}

fn default_public_indicators() -> Vec<String> {
    vec!["%".to_string()]
}

fn default_private_indicators() -> Vec<String> {
    vec!["~".to_string()]
}

impl SyncConfig {
    /// Loads the configuration surface from JSON environment variables.
    pub fn from_env() -> Result<Self> {
        let mappings = json_env(MAPPINGS_ENV)?.context("mapping chains are required")?;
        let hub_service =
            env::var(HUB_SERVICE_ENV).with_context(|| format!("{HUB_SERVICE_ENV} is required"))?;
        Ok(Self {
            mappings,
            generic_accounts: json_env(GENERIC_ACCOUNTS_ENV)?.unwrap_or_default(),
            system_accounts: json_env(SYSTEM_ACCOUNTS_ENV)?.unwrap_or_default(),
            hub_service,
            public_indicators: json_env(PUBLIC_INDICATORS_ENV)?
                .unwrap_or_else(default_public_indicators),
            private_indicators: json_env(PRIVATE_INDICATORS_ENV)?
                .unwrap_or_else(default_private_indicators),
        })
    }

    /// Derives the pairwise bidirectional edges from every chain: A↔B↔C
    /// yields A↔B and B↔C, never A↔C.
    pub fn edges(&self) -> Vec<(Flow, Flow)> {
        let mut edges = Vec::new();
        for chain in &self.mappings {
            for pair in chain.windows(2) {
                edges.push((pair[0].clone(), pair[1].clone()));
                edges.push((pair[1].clone(), pair[0].clone()));
            }
        }
        edges
    }

    /// Compiles the configured marker tokens.
    pub fn indicators(&self) -> Result<Indicators, MetadataError> {
        Indicators::new(self.public_indicators.clone(), self.private_indicators.clone())
    }
}

fn json_env<T: serde::de::DeserializeOwned>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            let parsed =
                serde_json::from_str(&raw).with_context(|| format!("{name} is not valid JSON"))?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_chain(chain: Vec<Flow>) -> SyncConfig {
        SyncConfig {
            mappings: vec![chain],
            generic_accounts: HashMap::new(),
            system_accounts: HashMap::new(),
            hub_service: "flowdock".into(),
            public_indicators: default_public_indicators(),
            private_indicators: default_private_indicators(),
        }
    }

    #[test]
    fn chain_yields_adjacent_bidirectional_edges_only() {
        let config = config_with_chain(vec![
            Flow::new("flowdock", "F1"),
            Flow::new("discourse", "D1"),
            Flow::new("front", "I1"),
        ]);
        let edges = config.edges();
        assert_eq!(edges.len(), 4);
        let has = |a: &str, b: &str| {
            edges
                .iter()
                .any(|(from, to)| from.service == a && to.service == b)
        };
        assert!(has("flowdock", "discourse"));
        assert!(has("discourse", "flowdock"));
        assert!(has("discourse", "front"));
        assert!(has("front", "discourse"));
        assert!(!has("flowdock", "front"));
        assert!(!has("front", "flowdock"));
    }

    #[test]
    fn single_flow_chain_yields_no_edges() {
        let config = config_with_chain(vec![Flow::new("flowdock", "F1")]);
        assert!(config.edges().is_empty());
    }

    // The env mutations below are process-global, so every from_env case
    // runs inside this single test.
    #[test]
    fn from_env_requires_mappings_and_hub_then_applies_defaults() {
        let all_vars = [
            MAPPINGS_ENV,
            GENERIC_ACCOUNTS_ENV,
            SYSTEM_ACCOUNTS_ENV,
            HUB_SERVICE_ENV,
            PUBLIC_INDICATORS_ENV,
            PRIVATE_INDICATORS_ENV,
        ];
        unsafe {
            for name in all_vars {
                env::remove_var(name);
            }
        }
        let err = SyncConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("mapping chains are required"));

        unsafe {
            env::set_var(
                MAPPINGS_ENV,
                r#"[[{"service":"flowdock","flow":"F1"},{"service":"discourse","flow":"D1"}]]"#,
            );
        }
        let err = SyncConfig::from_env().unwrap_err();
        assert!(err.to_string().contains(HUB_SERVICE_ENV));

        unsafe {
            env::set_var(HUB_SERVICE_ENV, "flowdock");
        }
        let config = SyncConfig::from_env().unwrap();
        assert_eq!(config.hub_service, "flowdock");
        assert_eq!(config.edges().len(), 2);
        assert!(config.generic_accounts.is_empty());
        assert!(config.system_accounts.is_empty());
        assert_eq!(config.public_indicators, vec!["%"]);
        assert_eq!(config.private_indicators, vec!["~"]);

        unsafe {
            env::set_var(PRIVATE_INDICATORS_ENV, r#"["whisper:"]"#);
            env::set_var(
                GENERIC_ACCOUNTS_ENV,
                r#"{"discourse": {"user": "mirror-bot", "token": "abc"}}"#,
            );
        }
        let config = SyncConfig::from_env().unwrap();
        assert_eq!(config.private_indicators, vec!["whisper:"]);
        assert_eq!(
            config.generic_accounts["discourse"].token.as_deref(),
            Some("abc")
        );

        unsafe {
            env::set_var(SYSTEM_ACCOUNTS_ENV, "not json");
        }
        let err = SyncConfig::from_env().unwrap_err();
        assert!(err.to_string().contains(SYSTEM_ACCOUNTS_ENV));

        unsafe {
            for name in all_vars {
                env::remove_var(name);
            }
        }
    }

    #[test]
    fn accounts_deserialize_with_partial_fields() {
        let accounts: HashMap<String, Credentials> =
            serde_json::from_str(r#"{"discourse": {"token": "abc"}}"#).unwrap();
        let creds = &accounts["discourse"];
        assert_eq!(creds.token.as_deref(), Some("abc"));
        assert!(creds.user.is_none());
    }
}
