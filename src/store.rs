use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::room::{generate_room_id, is_valid_room_id, Room, RoomId};

/// How many fresh ids `create` tries before giving up.
pub const MAX_CREATE_ATTEMPTS: usize = 8;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored room could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("no unused room id found after {0} attempts")]
    IdSpaceExhausted(usize),
}

/// Durable room id -> snapshot mapping.
///
/// Unknown ids are never an error: `get` answers `None` and `put` answers
/// `false` without creating anything. `Err` is reserved for the backend
/// itself failing.
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn create(&self) -> Result<RoomId, StoreError>;
    async fn get(&self, id: &str) -> Result<Option<Room>, StoreError>;
    async fn put(&self, id: &str, content: &str) -> Result<bool, StoreError>;
}

/// In-process store. Writes to one room hold that room's shard lock only.
pub struct MemoryRoomStore {
    rooms: DashMap<RoomId, String>,
    next_id: fn() -> RoomId,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::with_id_generator(generate_room_id)
    }

    pub fn with_id_generator(next_id: fn() -> RoomId) -> Self {
        MemoryRoomStore {
            rooms: DashMap::new(),
            next_id,
        }
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

impl Default for MemoryRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn create(&self) -> Result<RoomId, StoreError> {
        for _ in 0..MAX_CREATE_ATTEMPTS {
            let id = (self.next_id)();
            if let Entry::Vacant(slot) = self.rooms.entry(id.clone()) {
                slot.insert(String::new());
                return Ok(id);
            }
            log::debug!("room id {} already taken, retrying", id);
        }
        Err(StoreError::IdSpaceExhausted(MAX_CREATE_ATTEMPTS))
    }

    async fn get(&self, id: &str) -> Result<Option<Room>, StoreError> {
        if !is_valid_room_id(id) {
            return Ok(None);
        }
        Ok(self.rooms.get(id).map(|content| Room {
            id: id.to_string(),
            content: content.clone(),
        }))
    }

    async fn put(&self, id: &str, content: &str) -> Result<bool, StoreError> {
        match self.rooms.get_mut(id) {
            Some(mut current) => {
                *current = content.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
