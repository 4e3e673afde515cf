// Probe targets: peers (agents that also measure) and fixed landmarks

use serde::{Deserialize, Serialize};

/// Peer vs fixed landmark; serializes to lowercase ("peer", "landmark").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityRole {
    Peer,
    Landmark,
}

impl EntityRole {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityRole::Peer => "peer",
            EntityRole::Landmark => "landmark",
        }
    }

    /// Parse the stored role column. Unknown tags are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "peer" => Some(EntityRole::Peer),
            "landmark" => Some(EntityRole::Landmark),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub role: EntityRole,
    pub host: String,
    pub registered_at: i64,
    /// Last beacon time in ms; None for entities that never sent one (landmarks).
    #[serde(default)]
    pub last_seen: Option<i64>,
}

impl Entity {
    pub fn peer(id: impl Into<String>, host: impl Into<String>) -> Self {
        Self::new(id, EntityRole::Peer, host)
    }

    pub fn landmark(id: impl Into<String>, host: impl Into<String>) -> Self {
        Self::new(id, EntityRole::Landmark, host)
    }

    fn new(id: impl Into<String>, role: EntityRole, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            host: host.into(),
            registered_at: super::unix_millis(),
            last_seen: None,
        }
    }

    pub fn is_peer(&self) -> bool {
        self.role == EntityRole::Peer
    }
}
