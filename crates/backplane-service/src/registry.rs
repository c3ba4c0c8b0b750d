//! `LocalConnectionRegistry` - what is connected to *this* server.
//!
//! Holds the live connection objects of one hub on one server plus three
//! indices: connection -> groups, group -> connection ids, user -> connection
//! ids. Nothing here talks to coordinators; the registry only reports the
//! first/last-member transitions the frontend turns into subscribe and
//! unsubscribe calls.
//!
//! Each index is a `DashMap`, so mutations lock one shard per entity rather
//! than the whole registry. Lock order is always connections before groups or
//! users. Queries return copies.

use crate::errors::BackplaneError;
use crate::transport::SharedConnection;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

struct RegisteredConnection {
    connection: SharedConnection,
    groups: HashSet<String>,
}

/// Transitions caused by [`LocalConnectionRegistry::add`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOutcome {
    /// The connection is new (not a replacement of a registered id).
    pub added: bool,
    /// First connection on this server for the hub.
    pub first_for_hub: bool,
    /// First connection on this server for the connection's user.
    pub first_for_user: bool,
}

/// Transitions caused by [`LocalConnectionRegistry::remove`].
pub struct RemoveOutcome {
    pub connection: SharedConnection,
    pub user_id: Option<String>,
    /// No connection for the hub is left on this server.
    pub last_for_hub: bool,
    /// No connection for `user_id` is left on this server.
    pub last_for_user: bool,
    /// Groups this connection was the last local member of (sorted).
    pub emptied_groups: Vec<String>,
}

/// Per-server, per-hub connection registry.
#[derive(Default)]
pub struct LocalConnectionRegistry {
    connections: DashMap<String, RegisteredConnection>,
    groups: DashMap<String, HashSet<String>>,
    users: DashMap<String, HashSet<String>>,
    count: AtomicUsize,
}

impl LocalConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. A duplicate id replaces the write sink and keeps
    /// the existing group memberships.
    pub fn add(&self, connection: SharedConnection) -> AddOutcome {
        let connection_id = connection.connection_id().to_string();
        let user_id = user_of(&connection);

        match self.connections.entry(connection_id.clone()) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().connection = connection;
                trace!(
                    target: "backplane.registry",
                    connection_id = %connection_id,
                    "Replaced connection with duplicate id"
                );
                return AddOutcome::default();
            }
            Entry::Vacant(slot) => {
                slot.insert(RegisteredConnection {
                    connection,
                    groups: HashSet::new(),
                });
            }
        }

        let first_for_hub = self.count.fetch_add(1, Ordering::SeqCst) == 0;
        let first_for_user = user_id
            .as_deref()
            .is_some_and(|user| attach(&self.users, user, &connection_id));

        trace!(
            target: "backplane.registry",
            connection_id = %connection_id,
            first_for_hub,
            first_for_user,
            "Connection added"
        );

        AddOutcome {
            added: true,
            first_for_hub,
            first_for_user,
        }
    }

    /// Unregister a connection and drop it from every index.
    ///
    /// Returns `None` when the id is not registered.
    pub fn remove(&self, connection_id: &str) -> Option<RemoveOutcome> {
        let (_, registered) = self.connections.remove(connection_id)?;

        let last_for_hub = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            })
            .is_ok_and(|previous| previous == 1);

        let user_id = user_of(&registered.connection);
        let last_for_user = user_id
            .as_deref()
            .is_some_and(|user| detach(&self.users, user, connection_id));

        let mut emptied_groups: Vec<String> = registered
            .groups
            .iter()
            .filter(|group| detach(&self.groups, group, connection_id))
            .cloned()
            .collect();
        emptied_groups.sort();

        trace!(
            target: "backplane.registry",
            connection_id,
            last_for_hub,
            last_for_user,
            emptied_groups = emptied_groups.len(),
            "Connection removed"
        );

        Some(RemoveOutcome {
            connection: registered.connection,
            user_id,
            last_for_hub,
            last_for_user,
            emptied_groups,
        })
    }

    /// Add a connection to a group. Returns whether it is the first local
    /// member of the group.
    ///
    /// # Errors
    ///
    /// `ConnectionNotFound` if the connection is not registered here.
    pub fn join_group(&self, connection_id: &str, group: &str) -> Result<bool, BackplaneError> {
        let mut registered = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| BackplaneError::ConnectionNotFound(connection_id.to_string()))?;

        if !registered.groups.insert(group.to_string()) {
            return Ok(false);
        }

        let first = attach(&self.groups, group, connection_id);
        trace!(target: "backplane.registry", connection_id, group, first, "Joined group");
        Ok(first)
    }

    /// Remove a connection from a group. Returns whether it was the last
    /// local member of the group.
    ///
    /// # Errors
    ///
    /// `ConnectionNotFound` if the connection is not registered here.
    pub fn leave_group(&self, connection_id: &str, group: &str) -> Result<bool, BackplaneError> {
        let mut registered = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| BackplaneError::ConnectionNotFound(connection_id.to_string()))?;

        if !registered.groups.remove(group) {
            return Ok(false);
        }

        let last = detach(&self.groups, group, connection_id);
        trace!(target: "backplane.registry", connection_id, group, last, "Left group");
        Ok(last)
    }

    #[must_use]
    pub fn get(&self, connection_id: &str) -> Option<SharedConnection> {
        self.connections
            .get(connection_id)
            .map(|registered| registered.connection.clone())
    }

    #[must_use]
    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Connection ids in `group` (snapshot).
    #[must_use]
    pub fn group_connections(&self, group: &str) -> Vec<String> {
        snapshot(&self.groups, group)
    }

    /// Connection ids of `user_id` (snapshot).
    #[must_use]
    pub fn user_connections(&self, user_id: &str) -> Vec<String> {
        snapshot(&self.users, user_id)
    }

    /// Groups a connection has joined (sorted snapshot).
    #[must_use]
    pub fn connection_groups(&self, connection_id: &str) -> Vec<String> {
        let mut groups: Vec<String> = self
            .connections
            .get(connection_id)
            .map(|registered| registered.groups.iter().cloned().collect())
            .unwrap_or_default();
        groups.sort();
        groups
    }

    /// Every registered connection (snapshot).
    #[must_use]
    pub fn all_connections(&self) -> Vec<SharedConnection> {
        self.connections
            .iter()
            .map(|entry| entry.value().connection.clone())
            .collect()
    }

    /// Every registered connection id (sorted snapshot).
    #[must_use]
    pub fn connection_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Groups with at least one local member (sorted snapshot).
    #[must_use]
    pub fn local_groups(&self) -> Vec<String> {
        sorted_keys(&self.groups)
    }

    /// Users with at least one local connection (sorted snapshot).
    #[must_use]
    pub fn local_users(&self) -> Vec<String> {
        sorted_keys(&self.users)
    }

    /// Resolve ids to live connections, skipping ids no longer registered.
    #[must_use]
    pub fn resolve(&self, connection_ids: &[String]) -> Vec<SharedConnection> {
        connection_ids.iter().filter_map(|id| self.get(id)).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything. Used when the frontend shuts down.
    pub fn clear(&self) {
        self.connections.clear();
        self.groups.clear();
        self.users.clear();
        self.count.store(0, Ordering::SeqCst);
    }
}

/// User id of a connection; an empty id counts as anonymous.
fn user_of(connection: &SharedConnection) -> Option<String> {
    connection
        .user_id()
        .filter(|user| !user.is_empty())
        .map(str::to_string)
}

/// Insert `member` under `key`. Returns whether it is the first member.
fn attach(index: &DashMap<String, HashSet<String>>, key: &str, member: &str) -> bool {
    let mut members = index.entry(key.to_string()).or_default();
    members.insert(member.to_string()) && members.len() == 1
}

/// Remove `member` from `key`, dropping the key once empty. Returns whether it
/// was the last member.
fn detach(index: &DashMap<String, HashSet<String>>, key: &str, member: &str) -> bool {
    match index.entry(key.to_string()) {
        Entry::Occupied(mut members) => {
            let removed = members.get_mut().remove(member);
            if members.get().is_empty() {
                members.remove();
                removed
            } else {
                false
            }
        }
        Entry::Vacant(_) => false,
    }
}

fn snapshot(index: &DashMap<String, HashSet<String>>, key: &str) -> Vec<String> {
    let mut members: Vec<String> = index
        .get(key)
        .map(|members| members.iter().cloned().collect())
        .unwrap_or_default();
    members.sort();
    members
}

fn sorted_keys(index: &DashMap<String, HashSet<String>>) -> Vec<String> {
    let mut keys: Vec<String> = index.iter().map(|e| e.key().clone()).collect();
    keys.sort();
    keys
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::transport::{ClientConnection, Invocation};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct StubConnection {
        id: String,
        user: Option<String>,
    }

    #[async_trait]
    impl ClientConnection for StubConnection {
        fn connection_id(&self) -> &str {
            &self.id
        }

        fn user_id(&self) -> Option<&str> {
            self.user.as_deref()
        }

        async fn write(&self, _invocation: &Invocation) -> Result<(), BackplaneError> {
            Ok(())
        }
    }

    fn conn(id: &str, user: Option<&str>) -> SharedConnection {
        Arc::new(StubConnection {
            id: id.to_string(),
            user: user.map(str::to_string),
        })
    }

    #[test]
    fn test_first_connection_transitions() {
        let registry = LocalConnectionRegistry::new();

        let first = registry.add(conn("c1", Some("u1")));
        assert!(first.added && first.first_for_hub && first.first_for_user);

        let second = registry.add(conn("c2", Some("u1")));
        assert!(second.added);
        assert!(!second.first_for_hub);
        assert!(!second.first_for_user);

        let duplicate = registry.add(conn("c2", Some("u1")));
        assert_eq!(duplicate, AddOutcome::default());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_group_first_and_last_member() {
        let registry = LocalConnectionRegistry::new();
        registry.add(conn("c1", None));
        registry.add(conn("c2", None));

        assert!(registry.join_group("c1", "g1").unwrap());
        assert!(!registry.join_group("c2", "g1").unwrap());
        assert!(!registry.join_group("c2", "g1").unwrap(), "rejoin is a no-op");

        assert!(!registry.leave_group("c1", "g1").unwrap());
        assert!(registry.leave_group("c2", "g1").unwrap());
        assert!(!registry.leave_group("c2", "g1").unwrap());
        assert!(registry.local_groups().is_empty());
    }

    #[test]
    fn test_unknown_connection_cannot_join() {
        let registry = LocalConnectionRegistry::new();
        assert_eq!(
            registry.join_group("nope", "g1"),
            Err(BackplaneError::ConnectionNotFound("nope".to_string()))
        );
    }

    #[test]
    fn test_remove_reports_emptied_entities() {
        let registry = LocalConnectionRegistry::new();
        registry.add(conn("c1", Some("u1")));
        registry.add(conn("c2", None));
        registry.join_group("c1", "g1").unwrap();
        registry.join_group("c1", "g2").unwrap();
        registry.join_group("c2", "g2").unwrap();

        let outcome = registry.remove("c1").unwrap();
        assert!(!outcome.last_for_hub);
        assert!(outcome.last_for_user);
        assert_eq!(outcome.user_id.as_deref(), Some("u1"));
        assert_eq!(outcome.emptied_groups, vec!["g1".to_string()]);
        assert_eq!(registry.group_connections("g2"), vec!["c2".to_string()]);
        assert!(registry.user_connections("u1").is_empty());

        let outcome = registry.remove("c2").unwrap();
        assert!(outcome.last_for_hub);
        assert_eq!(outcome.emptied_groups, vec!["g2".to_string()]);
        assert!(registry.remove("c2").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_queries_return_copies() {
        let registry = LocalConnectionRegistry::new();
        registry.add(conn("c1", None));
        registry.join_group("c1", "g1").unwrap();

        let members = registry.group_connections("g1");
        registry.remove("c1");

        assert_eq!(members, vec!["c1".to_string()]);
        assert!(registry.resolve(&members).is_empty());
    }
}
