//! Cluster node identity and election state

use crate::error::{ClusterError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a cluster node
///
/// Generated once per service instance and kept for its whole lifetime, so a
/// node that lost leadership reclaims it under the same identity.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a node ID from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse a node ID from its string form
    pub fn parse(s: &str) -> Result<Self> {
        let uuid = Uuid::parse_str(s)
            .map_err(|e| ClusterError::configuration(format!("Invalid node ID: {}", e)))?;
        if uuid.is_nil() {
            return Err(ClusterError::configuration("Node ID cannot be the nil UUID"));
        }
        Ok(Self(uuid))
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Position of a node in the election for one namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ElectionState {
    /// Not leading; retries on every tick
    #[default]
    Follower,

    /// Holding the lock briefly while deciding whether to claim leadership
    Acquiring,

    /// Holding the lock and refreshing the heartbeat
    Leader,

    /// Shutting down: clearing the record and releasing the lock
    Relinquishing,
}

impl fmt::Display for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Follower => write!(f, "follower"),
            Self::Acquiring => write!(f, "acquiring"),
            Self::Leader => write!(f, "leader"),
            Self::Relinquishing => write!(f, "relinquishing"),
        }
    }
}
