//! Identifier and key types shared across the dispatch layer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Durable task identifier.
pub type TaskId = uuid::Uuid;

/// A class of work with its own endpoint pool and queue lane
/// (for example `inference` or `transcription`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    /// Create a capability from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// LLM completion and chat backends.
    #[must_use]
    pub fn inference() -> Self {
        Self::new("inference")
    }

    /// Speech-to-text backends.
    #[must_use]
    pub fn transcription() -> Self {
        Self::new("transcription")
    }

    /// Capability name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Capability {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Capability {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifies who a scheduled task belongs to, used for listing and isolation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerKey {
    /// Tenant or deployment identifier.
    pub tenant: String,
    /// Recipient within the tenant (a chat id, phone number, user id).
    pub recipient: String,
}

impl OwnerKey {
    /// Build an owner key.
    pub fn new(tenant: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            recipient: recipient.into(),
        }
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tenant, self.recipient)
    }
}
