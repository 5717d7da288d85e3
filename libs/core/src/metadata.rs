//! Visibility and genesis markers embedded in relayed message text.
//!
//! Adapters append a marker token to every synced message; on receipt the
//! marker is stripped again and tells the router which service last
//! introduced the message into the mesh and whether it was a whisper.

use regex::Regex;
use thiserror::Error;

/// Metadata recovered from (or embedded into) raw message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub genesis: Option<String>,
    pub hidden: bool,
    pub content: String,
}

/// How a marker is rendered into outgoing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataFormat {
    /// `[<indicator>](<source>)`, hiding the marker inside a link.
    Markdown,
    /// `<indicator><source>`, for services without markdown rendering.
    Plaintext,
}

/// Configured marker tokens plus the compiled extraction pattern.
#[derive(Debug, Clone)]
pub struct Indicators {
    shown: Vec<String>,
    hidden: Vec<String>,
    pattern: Regex,
}

impl Indicators {
    pub fn new(shown: Vec<String>, hidden: Vec<String>) -> Result<Self, MetadataError> {
        if shown.is_empty() || hidden.is_empty() {
            return Err(MetadataError::Empty);
        }
        let alternatives = hidden
            .iter()
            .chain(shown.iter())
            .map(|tok| regex::escape(tok))
            .collect::<Vec<_>>()
            .join("|");
        // Tolerates both the markdown and plaintext renderings.
        let pattern = Regex::new(&format!(
            r"(?i)(?:^|\r|\n)\s*\[?({alternatives})\]?\(?(\w*)\)?"
        ))?;
        Ok(Self {
            shown,
            hidden,
            pattern,
        })
    }

    /// Strips the first marker from `text`, reporting what it encoded.
    ///
    /// Unmarked text is treated as hidden with no genesis: a message that
    /// never passed through the mesh carries no provenance.
    pub fn extract(&self, text: &str) -> Metadata {
        match self.pattern.captures(text) {
            Some(caps) => {
                let token = &caps[1];
                let genesis = match caps.get(2).map(|m| m.as_str()) {
                    Some("") | None => None,
                    Some(service) => Some(service.to_string()),
                };
                Metadata {
                    genesis,
                    hidden: !self.shown.iter().any(|t| t.eq_ignore_ascii_case(token)),
                    content: self.pattern.replace(text, "").trim().to_string(),
                }
            }
            None => Metadata {
                genesis: None,
                hidden: true,
                content: text.to_string(),
            },
        }
    }

    /// Renders the marker for an outgoing message.
    pub fn stringify(&self, hidden: bool, source: &str, format: MetadataFormat) -> String {
        let indicator = if hidden {
            &self.hidden[0]
        } else {
            &self.shown[0]
        };
        match format {
            MetadataFormat::Markdown => format!("[{indicator}]({source})"),
            MetadataFormat::Plaintext => format!("{indicator}{source}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("at least one public and one private indicator token is required")]
    Empty,
    #[error("indicator tokens do not compile into a pattern: {0}")]
    Pattern(#[from] regex::Error),
}
