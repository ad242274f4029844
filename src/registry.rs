use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::room::RoomId;

/// Handle to one client's outbound queue. Cloning shares the queue.
#[derive(Clone, Debug)]
pub struct Connection {
    id: Uuid,
    sender: mpsc::Sender<String>,
}

impl Connection {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let connection = Connection {
            id: Uuid::new_v4(),
            sender,
        };
        (connection, receiver)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a frame for this client, giving up after `timeout`.
    pub async fn send(&self, message: String, timeout: Duration) -> bool {
        match self.sender.send_timeout(message, timeout).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                log::debug!("connection {} did not drain its queue in time", self.id);
                false
            }
            Err(SendTimeoutError::Closed(_)) => {
                log::debug!("connection {} already closed", self.id);
                false
            }
        }
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

/// Live connections grouped by room.
///
/// A room has an entry only while at least one connection is joined to it.
/// Each room's member list sits behind its map shard's lock, so joins and
/// leaves on different rooms do not contend with each other.
///
/// Each room also has an update lock. Holders of it see no other relay of
/// that room's content in between their store access and their sends.
pub struct ConnectionRegistry {
    rooms: DashMap<RoomId, Vec<Connection>>,
    update_locks: DashMap<RoomId, Arc<Mutex<()>>>,
    send_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(send_timeout: Duration) -> Self {
        ConnectionRegistry {
            rooms: DashMap::new(),
            update_locks: DashMap::new(),
            send_timeout,
        }
    }

    /// Serializes a room's save-and-broadcast steps with the snapshot read
    /// of a joining connection. Dropped with the room's last member unless
    /// somebody still holds a handle to it.
    pub fn update_lock(&self, room_id: &str) -> Arc<Mutex<()>> {
        self.update_locks
            .entry(room_id.to_string())
            .or_default()
            .clone()
    }

    pub fn join(&self, connection: &Connection, room_id: &str) {
        let mut members = self.rooms.entry(room_id.to_string()).or_default();
        if !members.contains(connection) {
            members.push(connection.clone());
        }
    }

    /// Returns whether the connection was a member. Safe to call for
    /// connections that never joined.
    pub fn leave(&self, connection: &Connection, room_id: &str) -> bool {
        let Entry::Occupied(mut entry) = self.rooms.entry(room_id.to_string()) else {
            return false;
        };

        let members = entry.get_mut();
        let before = members.len();
        members.retain(|member| member != connection);
        let removed = members.len() != before;

        if members.is_empty() {
            entry.remove();
            self.update_locks
                .remove_if(room_id, |_, lock| Arc::strong_count(lock) == 1);
        }
        removed
    }

    /// Delivers `message` to every member of the room other than `except`,
    /// returning how many recipients accepted it.
    ///
    /// Membership is copied before sending, so joins and leaves may proceed
    /// while the sends are in flight. Recipients are sent to concurrently and
    /// a failed or slow recipient only loses its own copy.
    pub async fn broadcast(&self, message: &str, room_id: &str, except: Option<&Connection>) -> usize {
        let recipients: Vec<Connection> = match self.rooms.get(room_id) {
            Some(members) => members
                .iter()
                .filter(|member| except != Some(*member))
                .cloned()
                .collect(),
            None => return 0,
        };

        let timeout = self.send_timeout;
        let sends = recipients
            .iter()
            .map(|recipient| recipient.send(message.to_string(), timeout));
        let delivered = join_all(sends).await.into_iter().filter(|ok| *ok).count();

        if delivered < recipients.len() {
            log::debug!(
                "room {}: delivered to {} of {} peers",
                room_id,
                delivered,
                recipients.len()
            );
        }
        delivered
    }

    pub fn contains_room(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn connection_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |members| members.len())
    }

    pub fn update_lock_count(&self) -> usize {
        self.update_locks.len()
    }

    pub fn is_member(&self, connection: &Connection, room_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|members| members.contains(connection))
    }
}
