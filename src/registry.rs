use std::fmt;

use serde::Deserialize;

/// A registered, handleable user intent.
///
/// The registry content is the single source of truth for what the agent can
/// route *and* what the fallback text may claim it can do — capability
/// descriptions live here and nowhere else.
#[derive(Debug, Clone, Deserialize)]
pub struct Capability {
    pub id: String,
    pub display_name: String,
    pub description: String,
    #[serde(default)]
    pub example_phrases: Vec<String>,
    /// Entity keys (lower_snake_case) that must be present before dispatch.
    #[serde(default)]
    pub required_entities: Vec<String>,
}

/// Read-only set of capabilities, loaded once at startup.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    capabilities: Vec<Capability>,
}

impl CapabilityRegistry {
    /// Build the registry, rejecting duplicate or empty ids.
    pub fn new(capabilities: Vec<Capability>) -> Result<Self, RegistryError> {
        for (i, cap) in capabilities.iter().enumerate() {
            if cap.id.trim().is_empty() {
                return Err(RegistryError::EmptyId);
            }
            if capabilities[..i].iter().any(|c| c.id == cap.id) {
                return Err(RegistryError::DuplicateId(cap.id.clone()));
            }
        }
        Ok(Self { capabilities })
    }

    pub fn list(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn get(&self, id: &str) -> Result<&Capability, RegistryError> {
        self.capabilities
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.capabilities.iter().any(|c| c.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

#[derive(Debug)]
pub enum RegistryError {
    NotFound(String),
    DuplicateId(String),
    EmptyId,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NotFound(id) => write!(f, "unknown capability '{}'", id),
            RegistryError::DuplicateId(id) => write!(f, "duplicate capability id '{}'", id),
            RegistryError::EmptyId => write!(f, "capability id must not be empty"),
        }
    }
}

impl std::error::Error for RegistryError {}
