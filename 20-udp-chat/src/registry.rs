//! Server-side record of joined users.
//!
//! Sessions are keyed both by username and by socket address so the router can
//! resolve recipients by name and senders by the address a datagram came from.
//! Both keys are unique and always change together.

use std::collections::HashMap;
use std::net::SocketAddr;

use thiserror::Error;

/// Session limit used when none is configured.
pub const DEFAULT_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub addr: SocketAddr,
}

/// How an accepted join affected the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Joined {
    /// A new session was created.
    New,
    /// The same username and address were already joined.
    Existing,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("server full ({capacity} sessions)")]
    ServerFull { capacity: usize },
    #[error("username '{0}' is already in use")]
    UsernameTaken(String),
    #[error("{addr} has already joined as '{username}'")]
    AddressInUse { addr: SocketAddr, username: String },
}

#[derive(Debug)]
pub struct Registry {
    sessions: HashMap<String, Session>,
    by_addr: HashMap<SocketAddr, String>,
    capacity: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl Registry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            by_addr: HashMap::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Registers `username` at `addr`.
    ///
    /// A full server is reported before a taken username. Repeating an existing
    /// join from the same address succeeds without consulting capacity.
    pub fn try_join(&mut self, username: &str, addr: SocketAddr) -> Result<Joined, JoinError> {
        if self.by_addr.get(&addr).is_some_and(|name| name == username) {
            return Ok(Joined::Existing);
        }
        if self.sessions.len() >= self.capacity {
            return Err(JoinError::ServerFull {
                capacity: self.capacity,
            });
        }
        if self.sessions.contains_key(username) {
            return Err(JoinError::UsernameTaken(username.to_string()));
        }
        if let Some(existing) = self.by_addr.get(&addr) {
            return Err(JoinError::AddressInUse {
                addr,
                username: existing.clone(),
            });
        }

        self.by_addr.insert(addr, username.to_string());
        self.sessions.insert(
            username.to_string(),
            Session {
                username: username.to_string(),
                addr,
            },
        );
        Ok(Joined::New)
    }

    /// Removes the session for `username`, if any.
    pub fn remove(&mut self, username: &str) -> Option<Session> {
        let session = self.sessions.remove(username)?;
        self.by_addr.remove(&session.addr);
        Some(session)
    }

    /// Removes the session bound to `addr`, if any.
    pub fn remove_by_address(&mut self, addr: SocketAddr) -> Option<Session> {
        let username = self.by_addr.remove(&addr)?;
        self.sessions.remove(&username)
    }

    pub fn lookup_by_username(&self, username: &str) -> Option<&Session> {
        self.sessions.get(username)
    }

    pub fn lookup_by_address(&self, addr: SocketAddr) -> Option<&Session> {
        self.by_addr
            .get(&addr)
            .and_then(|username| self.sessions.get(username))
    }

    /// Usernames in lexicographic order.
    pub fn list_usernames(&self) -> Vec<String> {
        let mut usernames: Vec<String> = self.sessions.keys().cloned().collect();
        usernames.sort();
        usernames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn join_beyond_capacity_reports_server_full() {
        let mut registry = Registry::with_capacity(3);
        for (port, name) in [(1, "alice"), (2, "bob"), (3, "carol")] {
            assert_eq!(registry.try_join(name, addr(port)), Ok(Joined::New));
        }

        assert_eq!(
            registry.try_join("dave", addr(4)),
            Err(JoinError::ServerFull { capacity: 3 })
        );
        assert_eq!(registry.len(), 3);
        assert!(registry.lookup_by_username("dave").is_none());
    }

    #[test]
    fn server_full_takes_precedence_over_duplicate_name() {
        let mut registry = Registry::with_capacity(1);
        registry.try_join("alice", addr(1)).expect("first join");
        assert_eq!(
            registry.try_join("alice", addr(2)),
            Err(JoinError::ServerFull { capacity: 1 })
        );
    }

    #[test]
    fn duplicate_username_keeps_first_address() {
        let mut registry = Registry::default();
        registry.try_join("alice", addr(1)).expect("first join");
        assert_eq!(
            registry.try_join("alice", addr(2)),
            Err(JoinError::UsernameTaken("alice".into()))
        );

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.lookup_by_username("alice").map(|s| s.addr),
            Some(addr(1))
        );
        assert!(registry.lookup_by_address(addr(2)).is_none());
    }

    #[test]
    fn repeated_join_from_same_address_is_a_no_op() {
        let mut registry = Registry::with_capacity(1);
        registry.try_join("alice", addr(1)).expect("first join");
        assert_eq!(registry.try_join("alice", addr(1)), Ok(Joined::Existing));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn address_cannot_hold_two_usernames() {
        let mut registry = Registry::default();
        registry.try_join("alice", addr(1)).expect("first join");
        assert_eq!(
            registry.try_join("mallory", addr(1)),
            Err(JoinError::AddressInUse {
                addr: addr(1),
                username: "alice".into()
            })
        );
        assert!(registry.lookup_by_username("mallory").is_none());
    }

    #[test]
    fn removal_clears_both_keys_and_is_idempotent() {
        let mut registry = Registry::default();
        registry.try_join("alice", addr(1)).expect("join alice");
        registry.try_join("bob", addr(2)).expect("join bob");

        let removed = registry.remove("alice").expect("alice was joined");
        assert_eq!(removed.addr, addr(1));
        assert!(registry.lookup_by_address(addr(1)).is_none());
        assert!(registry.remove("alice").is_none());

        let removed = registry.remove_by_address(addr(2)).expect("bob was joined");
        assert_eq!(removed.username, "bob");
        assert!(registry.lookup_by_username("bob").is_none());
        assert!(registry.remove_by_address(addr(2)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn removing_unknown_user_leaves_registry_untouched() {
        let mut registry = Registry::default();
        registry.try_join("alice", addr(1)).expect("join alice");
        assert!(registry.remove("zed").is_none());
        assert_eq!(registry.list_usernames(), vec!["alice".to_string()]);
    }

    #[test]
    fn usernames_are_listed_in_order() {
        let mut registry = Registry::default();
        for (port, name) in [(1, "carol"), (2, "alice"), (3, "bob")] {
            registry.try_join(name, addr(port)).expect("join");
        }
        assert_eq!(registry.list_usernames(), vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn freed_slot_can_be_reused() {
        let mut registry = Registry::with_capacity(1);
        registry.try_join("alice", addr(1)).expect("join alice");
        registry.remove("alice");
        assert_eq!(registry.try_join("bob", addr(1)), Ok(Joined::New));
    }
}
