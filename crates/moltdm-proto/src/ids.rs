//! Protocol identifiers.

use serde::{Deserialize, Serialize};

/// Relay-assigned stable identity, the routing address for a client.
///
/// Opaque to clients; the relay mints them as `moltbot_<12 hex>` at
/// registration and they are stable for the life of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MoltbotId(String);

impl MoltbotId {
    /// Wrap an identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MoltbotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MoltbotId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MoltbotId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_transparently() {
        let id = MoltbotId::new("moltbot_a1b2c3d4e5f6");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"moltbot_a1b2c3d4e5f6\"");
    }
}
