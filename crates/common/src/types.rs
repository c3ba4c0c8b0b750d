//! Routing identity types shared by the backplane components.
//!
//! Coordinators are addressed by an [`EntityKey`]: the hub name, the kind of
//! entity (`all`, `group`, `user`, `connection`) and the entity id. Servers are
//! identified by a [`ServerId`] that is unique per server process lifetime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a front-end server process.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// Create a server id from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a new random server id with the given prefix.
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}-{}", Uuid::new_v4()))
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The kind of entity a coordinator routes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Every connection on the hub.
    All,
    /// A named group.
    Group,
    /// A user identity (zero or more connections).
    User,
    /// A single connection.
    Connection,
}

impl EntityKind {
    /// Returns the kind as a string for keys and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityKind::All => "all",
            EntityKind::Group => "group",
            EntityKind::User => "user",
            EntityKind::Connection => "connection",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an [`EntityKind`] or [`EntityKey`] fails.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntityKeyError {
    #[error("Unknown entity kind: {0}")]
    UnknownKind(String),

    #[error("Malformed entity key: {0}")]
    Malformed(String),
}

impl FromStr for EntityKind {
    type Err = EntityKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(EntityKind::All),
            "group" => Ok(EntityKind::Group),
            "user" => Ok(EntityKind::User),
            "connection" => Ok(EntityKind::Connection),
            other => Err(EntityKeyError::UnknownKind(other.to_string())),
        }
    }
}

/// Address of one coordinator: `{hub}/{kind}/{id}`.
///
/// The hub-level coordinator uses the hub name as its id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    /// Hub the entity is scoped to.
    pub hub: String,
    /// Entity kind.
    pub kind: EntityKind,
    /// Entity id (group name, user id, connection id, or the hub name for `all`).
    pub id: String,
}

impl EntityKey {
    /// Key of the hub-level ("all") coordinator.
    #[must_use]
    pub fn all(hub: &str) -> Self {
        Self {
            hub: hub.to_string(),
            kind: EntityKind::All,
            id: hub.to_string(),
        }
    }

    /// Key of a group coordinator.
    #[must_use]
    pub fn group(hub: &str, group: &str) -> Self {
        Self {
            hub: hub.to_string(),
            kind: EntityKind::Group,
            id: group.to_string(),
        }
    }

    /// Key of a user coordinator.
    #[must_use]
    pub fn user(hub: &str, user_id: &str) -> Self {
        Self {
            hub: hub.to_string(),
            kind: EntityKind::User,
            id: user_id.to_string(),
        }
    }

    /// Key of a connection coordinator.
    #[must_use]
    pub fn connection(hub: &str, connection_id: &str) -> Self {
        Self {
            hub: hub.to_string(),
            kind: EntityKind::Connection,
            id: connection_id.to_string(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.hub, self.kind, self.id)
    }
}

impl FromStr for EntityKey {
    type Err = EntityKeyError;

    /// Parse `{hub}/{kind}/{id}`. The id may itself contain `/`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');
        let (Some(hub), Some(kind), Some(id)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(EntityKeyError::Malformed(s.to_string()));
        };

        if hub.is_empty() || id.is_empty() {
            return Err(EntityKeyError::Malformed(s.to_string()));
        }

        Ok(Self {
            hub: hub.to_string(),
            kind: kind.parse()?,
            id: id.to_string(),
        })
    }
}
