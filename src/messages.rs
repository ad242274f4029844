use serde::{Deserialize, Serialize};

use crate::room::RoomId;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RoomCreated {
    #[serde(rename = "roomId")]
    pub room_id: RoomId,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Banner {
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorBody {
    pub error: String,
}

/// Close code sent when a client asks for a room that does not exist.
pub const POLICY_VIOLATION: u16 = 1008;
pub const ROOM_MISSING_REASON: &str = "Room does not exist.";
