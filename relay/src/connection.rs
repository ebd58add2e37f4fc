use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use protocol::ChannelId;
use std::collections::HashSet;
use tokio::sync::mpsc::Sender;

/// Sending half of a connection's bounded outbound queue of encoded frames.
pub type OutboundSender = Sender<String>;

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// What the registry knows about a live connection. The transport itself is
/// owned by the connection's lifecycle task; only its outbound queue is kept here.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub sender: OutboundSender,
    pub subscriptions: HashSet<ChannelId>,
}

/// Concurrent registry of live connections and their interest sets.
///
/// Backed by a sharded `DashMap`: mutations lock one shard, and traversal
/// read-locks each shard while visiting it, so a visitor never observes a
/// partially applied update.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionInfo>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Insert a connection with an empty interest set. Returns `false` (and
    /// leaves the existing entry untouched) if the connection is already registered.
    pub fn register(&self, connection_id: ConnectionId, sender: OutboundSender) -> bool {
        match self.connections.entry(connection_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(ConnectionInfo {
                    sender,
                    subscriptions: HashSet::new(),
                });
                true
            }
        }
    }

    /// Replace the interest set. Returns `false` for an unknown connection.
    pub fn set_subscriptions<I>(&self, connection_id: &ConnectionId, channels: I) -> bool
    where
        I: IntoIterator<Item = ChannelId>,
    {
        match self.connections.get_mut(connection_id) {
            Some(mut info) => {
                info.subscriptions = channels.into_iter().collect();
                true
            }
            None => false,
        }
    }

    pub fn add_subscriptions<I>(&self, connection_id: &ConnectionId, channels: I) -> bool
    where
        I: IntoIterator<Item = ChannelId>,
    {
        match self.connections.get_mut(connection_id) {
            Some(mut info) => {
                info.subscriptions.extend(channels);
                true
            }
            None => false,
        }
    }

    /// Removing a channel the connection never subscribed to is a no-op.
    pub fn remove_subscriptions<'a, I>(&self, connection_id: &ConnectionId, channels: I) -> bool
    where
        I: IntoIterator<Item = &'a ChannelId>,
    {
        match self.connections.get_mut(connection_id) {
            Some(mut info) => {
                for channel in channels {
                    info.subscriptions.remove(channel);
                }
                true
            }
            None => false,
        }
    }

    /// Remove a connection and its interest set. Returns `true` only for the
    /// call that actually removed the entry.
    pub fn unregister(&self, connection_id: &ConnectionId) -> bool {
        self.connections.remove(connection_id).is_some()
    }

    pub fn subscriptions(&self, connection_id: &ConnectionId) -> Option<HashSet<ChannelId>> {
        self.connections
            .get(connection_id)
            .map(|info| info.subscriptions.clone())
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Read-only traversal of every registered connection.
    ///
    /// The visitor runs while a shard lock is held: it must not call back
    /// into the registry.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&ConnectionId, &ConnectionInfo),
    {
        for entry in self.connections.iter() {
            visitor(entry.key(), entry.value());
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
