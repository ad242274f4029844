use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::room::{generate_room_id, is_valid_room_id, Room, RoomId};
use crate::store::{RoomStore, StoreError, MAX_CREATE_ATTEMPTS};

/// Keeps every room as `<id>.json` under one directory.
///
/// Each write lands in a temporary file first and is then moved into place,
/// so concurrent readers see either the old or the new snapshot. Writers to
/// the same room queue on that room's mutex; other rooms are unaffected.
pub struct FileRoomStore {
    storage_path: PathBuf,
    /// One entry per existing room ever written. Rooms are never deleted,
    /// so this grows no further than the set of rooms on disk.
    write_locks: DashMap<RoomId, Arc<Mutex<()>>>,
}

impl FileRoomStore {
    pub async fn new(storage_path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let storage_path = storage_path.into();
        fs::create_dir_all(&storage_path).await?;

        Ok(FileRoomStore {
            storage_path,
            write_locks: DashMap::new(),
        })
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    fn room_path(&self, id: &str) -> PathBuf {
        self.storage_path.join(format!("{id}.json"))
    }

    fn temp_path(&self, id: &str) -> PathBuf {
        self.storage_path
            .join(format!(".{}.{}.tmp", id, Uuid::new_v4().simple()))
    }

    fn write_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    async fn write_temp(&self, room: &Room) -> Result<PathBuf, StoreError> {
        let encoded = serde_json::to_vec(room)?;
        let temp_path = self.temp_path(&room.id);
        fs::write(&temp_path, encoded).await?;
        Ok(temp_path)
    }
}

#[async_trait]
impl RoomStore for FileRoomStore {
    async fn create(&self) -> Result<RoomId, StoreError> {
        for _ in 0..MAX_CREATE_ATTEMPTS {
            let id = generate_room_id();
            let temp_path = self.write_temp(&Room::new(id.clone())).await?;

            // hard_link refuses to replace an existing file, which makes it
            // the collision check as well as the publish step.
            let linked = fs::hard_link(&temp_path, self.room_path(&id)).await;
            let _ = fs::remove_file(&temp_path).await;
            match linked {
                Ok(()) => return Ok(id),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    log::debug!("room id {} already taken, retrying", id);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::IdSpaceExhausted(MAX_CREATE_ATTEMPTS))
    }

    async fn get(&self, id: &str) -> Result<Option<Room>, StoreError> {
        if !is_valid_room_id(id) {
            return Ok(None);
        }
        match fs::read(self.room_path(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, id: &str, content: &str) -> Result<bool, StoreError> {
        if !is_valid_room_id(id) {
            return Ok(false);
        }
        let path = self.room_path(id);
        if !fs::try_exists(&path).await? {
            return Ok(false);
        }

        let lock = self.write_lock(id);
        let _guard = lock.lock().await;

        let room = Room {
            id: id.to_string(),
            content: content.to_string(),
        };
        let temp_path = self.write_temp(&room).await?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(true)
    }
}
