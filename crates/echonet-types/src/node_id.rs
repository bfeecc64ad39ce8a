//! Node identifiers and the transport topics derived from them.

use crate::{Result, TypesError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix shared by every Echo-Net transport topic.
pub const TOPIC_PREFIX: &str = "network";

/// Topic carrying unencrypted key announcements for all nodes.
pub const BROADCAST_TOPIC: &str = "network.broadcast";

/// Identifier of a participant in the network.
///
/// Node ids are embedded in topic names (`network.<id>`), so they are limited
/// to ASCII alphanumerics, `-` and `_`. The id `broadcast` is reserved.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Maximum length of a node id.
    pub const MAX_LEN: usize = 64;

    /// Creates a validated node id.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is empty, too long, reserved, or contains
    /// characters outside `[A-Za-z0-9_-]`.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(TypesError::EmptyNodeId);
        }
        if id.len() > Self::MAX_LEN {
            return Err(TypesError::NodeIdTooLong {
                len: id.len(),
                max: Self::MAX_LEN,
            });
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(TypesError::InvalidNodeIdChar(c));
        }
        if id == "broadcast" {
            return Err(TypesError::ReservedNodeId(id));
        }
        Ok(Self(id))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the personal inbox topic for this node.
    #[must_use]
    pub fn inbox_topic(&self) -> String {
        format!("{TOPIC_PREFIX}.{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn node_id_valid() {
        let id = NodeId::new("gemini-2_b").unwrap();
        assert_eq!(id.as_str(), "gemini-2_b");
        assert_eq!(id.inbox_topic(), "network.gemini-2_b");
    }

    #[test]
    fn node_id_rejects_bad_input() {
        assert_eq!(NodeId::new(""), Err(TypesError::EmptyNodeId));
        assert_eq!(
            NodeId::new("a.b"),
            Err(TypesError::InvalidNodeIdChar('.'))
        );
        assert!(matches!(
            NodeId::new("x".repeat(65)),
            Err(TypesError::NodeIdTooLong { len: 65, max: 64 })
        ));
        assert!(matches!(
            NodeId::new("broadcast"),
            Err(TypesError::ReservedNodeId(_))
        ));
    }

    #[test]
    fn node_id_serde_is_transparent() {
        let id = NodeId::new("claude").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"claude\"");

        let parsed: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);

        assert!(serde_json::from_str::<NodeId>("\"bad id\"").is_err());
    }
}
