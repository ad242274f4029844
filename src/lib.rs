//! Relay for collaborative editing rooms.
//!
//! Clients create a room over HTTP, then open a websocket to it. Every text
//! frame a client sends is the whole document; it is saved as the room's
//! snapshot and forwarded verbatim to everyone else in the room. Last write
//! wins, there is no merging.
//!
//! Membership lives in one process only. Running several relays behind a
//! load balancer splits a room's peers between them.

pub mod config;
pub mod files;
pub mod messages;
pub mod registry;
pub mod room;
pub mod server;
pub mod session;
pub mod store;

pub use config::{Config, ConfigError, SessionConfig, StorageConfig};
pub use files::FileRoomStore;
pub use registry::{Connection, ConnectionRegistry};
pub use room::{Room, RoomId};
pub use server::Server;
pub use session::{RoomSession, SessionState};
pub use store::{MemoryRoomStore, RoomStore, StoreError};
