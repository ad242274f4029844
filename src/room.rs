use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type RoomId = String;

const ROOM_ID_LEN: usize = 8;
const MAX_ROOM_ID_LEN: usize = 64;

/// A collaborative document: its id and the last full snapshot written to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    #[serde(default)]
    pub content: String,
}

impl Room {
    pub fn new(id: RoomId) -> Self {
        Room {
            id,
            content: String::new(),
        }
    }
}

/// Short random token taken from the front of a v4 UUID.
pub fn generate_room_id() -> RoomId {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(ROOM_ID_LEN);
    id
}

/// Ids come straight from request paths, so anything outside this
/// alphabet is treated as an unknown room.
pub fn is_valid_room_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ROOM_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
