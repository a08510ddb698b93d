//! Uniform reference-parse + fetch contract over arbitrary secret backends.
//!
//! Only one provider is active per broker instance, selected by name at
//! startup (see [`crate::config`]). The abstract contract is the integration
//! boundary: concrete backends (a real password-manager CLI wrapper, a cloud
//! KMS client, …) are out of scope for this crate and implement this trait
//! the way [`StaticProvider`] does.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

/// A reference parsed into its three opaque parts. Only `container` is
/// semantically meaningful to the broker (for open/gated classification);
/// `item` and `field` are carried through to audit records and the
/// standing-approval matcher verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReference {
    pub container: String,
    pub item: String,
    pub field: String,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unrecognised reference")]
    Unrecognised,
    #[error("{0}")]
    Fetch(String),
    #[error("{0}")]
    Validate(String),
}

/// Options accompanying a fetch. `elevated` is set for every gated read
/// (standing-approval, cache-miss-then-approved, and the approved path all
/// fetch with `elevated: true`); open reads always fetch with it `false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    pub elevated: bool,
}

pub trait SecretProvider: Send + Sync {
    /// Parses an opaque reference string into its container/item/field
    /// triple, or `Err(ProviderError::Unrecognised)` if the provider cannot
    /// make sense of it.
    fn parse_reference(&self, reference: &str) -> Result<ParsedReference, ProviderError>;

    /// Retrieves the secret value named by `reference`. `elevated` signals
    /// the provider to use its separately-stored, higher-privilege
    /// credential for gated reads.
    fn fetch(&self, reference: &str, options: FetchOptions) -> Result<String, ProviderError>;

    /// Startup self-check. A failure here is fatal: the daemon exits
    /// non-zero naming the provider.
    fn validate(&self) -> Result<(), ProviderError>;

    /// A short name used in audit records, status responses, and startup
    /// error messages.
    fn name(&self) -> &str;
}

/// Reference provider backed by an in-memory map, used by tests and as the
/// template real backends implement against. References look like
/// `op://<container>/<item>/<field>`.
pub struct StaticProvider {
    name: String,
    values: Mutex<HashMap<String, String>>,
}

impl StaticProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_value(self, reference: impl Into<String>, value: impl Into<String>) -> Self {
        self.values
            .lock()
            .expect("static provider mutex poisoned")
            .insert(reference.into(), value.into());
        self
    }

    pub fn set(&self, reference: impl Into<String>, value: impl Into<String>) {
        self.values
            .lock()
            .expect("static provider mutex poisoned")
            .insert(reference.into(), value.into());
    }
}

impl SecretProvider for StaticProvider {
    fn parse_reference(&self, reference: &str) -> Result<ParsedReference, ProviderError> {
        let rest = reference.strip_prefix("op://").ok_or(ProviderError::Unrecognised)?;
        let mut parts = rest.splitn(3, '/');
        let container = parts.next().filter(|s| !s.is_empty());
        let item = parts.next().filter(|s| !s.is_empty());
        let field = parts.next().filter(|s| !s.is_empty());
        match (container, item, field) {
            (Some(container), Some(item), Some(field)) => Ok(ParsedReference {
                container: container.to_string(),
                item: item.to_string(),
                field: field.to_string(),
            }),
            _ => Err(ProviderError::Unrecognised),
        }
    }

    fn fetch(&self, reference: &str, _options: FetchOptions) -> Result<String, ProviderError> {
        self.values
            .lock()
            .expect("static provider mutex poisoned")
            .get(reference)
            .cloned()
            .ok_or_else(|| ProviderError::Fetch(format!("no such secret: {reference}")))
    }

    fn validate(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_part_reference() {
        let provider = StaticProvider::new("static");
        let parsed = provider.parse_reference("op://pub/k/f").unwrap();
        assert_eq!(parsed.container, "pub");
        assert_eq!(parsed.item, "k");
        assert_eq!(parsed.field, "f");
    }

    #[test]
    fn rejects_malformed_references() {
        let provider = StaticProvider::new("static");
        assert!(provider.parse_reference("op://pub/k").is_err());
        assert!(provider.parse_reference("bogus").is_err());
    }

    #[test]
    fn fetch_returns_stored_value() {
        let provider = StaticProvider::new("static").with_value("op://pub/k/f", "v");
        let value = provider
            .fetch("op://pub/k/f", FetchOptions::default())
            .unwrap();
        assert_eq!(value, "v");
    }
}
