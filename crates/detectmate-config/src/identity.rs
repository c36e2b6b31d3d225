//! Deterministic component identity.
//!
//! Every service carries a 128-bit identifier rendered as 32 lowercase hex
//! characters. When not supplied explicitly it is derived as a UUIDv5 over
//! the URL namespace, so equal derivation inputs always yield equal ids.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::address::Address;

/// Stable 32-hex-character identifier for one service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct ComponentId(String);

impl ComponentId {
    /// Validates an explicitly supplied identifier.
    pub fn parse(input: &str) -> Result<Self, ComponentIdError> {
        let normalized = input.trim().to_ascii_lowercase();
        if normalized.len() != 32 || !normalized.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ComponentIdError::Invalid(input.to_owned()));
        }
        Ok(Self(normalized))
    }

    /// Derives the identifier from a stable component name.
    #[must_use]
    pub fn from_name(component_type: &str, component_name: &str) -> Self {
        Self::derive(&format!("detectmate/{component_type}/{component_name}"))
    }

    /// Derives the identifier from the channel addresses.
    ///
    /// Used when no stable name is configured; the id stays the same as long
    /// as the addresses do not change.
    #[must_use]
    pub fn from_addresses(component_type: &str, manager_addr: &Address, engine_addr: &Address) -> Self {
        Self::derive(&format!(
            "detectmate/{component_type}|{manager_addr}|{engine_addr}"
        ))
    }

    fn derive(input: &str) -> Self {
        let uuid = Uuid::new_v5(&Uuid::NAMESPACE_URL, input.as_bytes());
        Self(uuid.simple().to_string())
    }

    /// Hex form of the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl TryFrom<String> for ComponentId {
    type Error = ComponentIdError;

    fn try_from(input: String) -> Result<Self, Self::Error> {
        Self::parse(&input)
    }
}

impl From<ComponentId> for String {
    fn from(id: ComponentId) -> Self {
        id.0
    }
}

/// Errors raised when validating an explicit component id.
#[derive(Debug, Error)]
pub enum ComponentIdError {
    /// Value is not 32 hex characters.
    #[error("component id '{0}' is not a 32-character hex string")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_derivation_is_deterministic() {
        let first = ComponentId::from_name("detector", "detector-1");
        let second = ComponentId::from_name("detector", "detector-1");
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 32);
    }

    #[test]
    fn name_derivation_is_input_sensitive() {
        let base = ComponentId::from_name("detector", "detector-1");
        assert_ne!(base, ComponentId::from_name("detector", "detector-2"));
        assert_ne!(base, ComponentId::from_name("parser", "detector-1"));
    }

    #[test]
    fn address_derivation_tracks_both_channels() {
        let manager = Address::ipc("/tmp/cmd.ipc");
        let engine = Address::ipc("/tmp/engine.ipc");
        let base = ComponentId::from_addresses("core", &manager, &engine);
        assert_eq!(base, ComponentId::from_addresses("core", &manager, &engine));

        let other_engine = Address::ipc("/tmp/other.ipc");
        assert_ne!(
            base,
            ComponentId::from_addresses("core", &manager, &other_engine)
        );
    }

    #[test]
    fn explicit_ids_are_validated_and_normalized() {
        let id = ComponentId::parse("ABCDEF00112233445566778899aabbcc").expect("valid hex id");
        assert_eq!(id.as_str(), "abcdef00112233445566778899aabbcc");

        assert!(ComponentId::parse("not-hex").is_err());
        assert!(ComponentId::parse("abcd").is_err());
    }
}
