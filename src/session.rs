use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::config::SessionConfig;
use crate::messages::{POLICY_VIOLATION, ROOM_MISSING_REASON};
use crate::registry::{Connection, ConnectionRegistry};
use crate::room::RoomId;
use crate::store::RoomStore;

const INTERNAL_ERROR: u16 = 1011;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Socket open, room not yet looked up.
    Pending,
    /// Joined to the registry and relaying updates.
    Active,
    Closed,
}

/// One client's participation in one room.
///
/// The room is checked against the store before anything is registered, so
/// a session for an unknown room leaves the registry untouched. Once active,
/// every text frame from the client is persisted and then relayed to the
/// other members of the room, strictly in the order it arrived.
pub struct RoomSession {
    room_id: RoomId,
    store: Arc<dyn RoomStore>,
    registry: Arc<ConnectionRegistry>,
    settings: SessionConfig,
    state: SessionState,
}

impl RoomSession {
    pub fn new(
        room_id: RoomId,
        store: Arc<dyn RoomStore>,
        registry: Arc<ConnectionRegistry>,
        settings: SessionConfig,
    ) -> Self {
        RoomSession {
            room_id,
            store,
            registry,
            settings,
            state: SessionState::Pending,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    fn transition(&mut self, next: SessionState) {
        log::debug!("room {}: session {:?} -> {:?}", self.room_id, self.state, next);
        self.state = next;
    }

    /// Drives the session until the socket closes.
    pub async fn run(&mut self, ws: WebSocket) {
        let stored = match self.store.get(&self.room_id).await {
            Ok(Some(room)) => room,
            Ok(None) => {
                log::warn!("rejected connection for unknown room {}", self.room_id);
                self.transition(SessionState::Closed);
                close_with(ws, POLICY_VIOLATION, ROOM_MISSING_REASON).await;
                return;
            }
            Err(e) => {
                log::error!("could not look up room {}: {}", self.room_id, e);
                self.transition(SessionState::Closed);
                close_with(ws, INTERNAL_ERROR, "Storage unavailable.").await;
                return;
            }
        };

        let (connection, outbound) = Connection::new(self.settings.outbound_queue);
        let (ws_tx, mut ws_rx) = ws.split();
        let writer = tokio::spawn(write_outbound(ws_tx, outbound));

        // Joining and queueing the snapshot happen under the room's update
        // lock: relays finished earlier are in the snapshot, later ones are
        // queued behind it.
        {
            let update_lock = self.registry.update_lock(&self.room_id);
            let _turn = update_lock.lock().await;

            self.registry.join(&connection, &self.room_id);
            self.transition(SessionState::Active);
            log::info!("connection {} joined room {}", connection.id(), self.room_id);

            let snapshot = match self.store.get(&self.room_id).await {
                Ok(Some(room)) => room.content,
                _ => stored.content,
            };
            if !snapshot.is_empty() {
                connection.send(snapshot, self.settings.send_timeout()).await;
            }
        }

        while let Some(result) = ws_rx.next().await {
            let msg = match result {
                Ok(msg) => msg,
                Err(e) => {
                    log::debug!("connection {} receive ended: {}", connection.id(), e);
                    break;
                }
            };
            if msg.is_close() {
                break;
            }
            // binary, ping and pong frames carry no document
            let Ok(text) = msg.to_str() else {
                continue;
            };
            self.relay(text, &connection).await;
        }

        self.registry.leave(&connection, &self.room_id);
        self.transition(SessionState::Closed);
        log::info!("connection {} left room {}", connection.id(), self.room_id);

        drop(connection);
        let _ = writer.await;
    }

    async fn relay(&self, document: &str, connection: &Connection) {
        let update_lock = self.registry.update_lock(&self.room_id);
        let _turn = update_lock.lock().await;

        match self.store.put(&self.room_id, document).await {
            Ok(true) => {}
            Ok(false) => log::debug!("room {} is gone from storage, update not saved", self.room_id),
            Err(e) => log::warn!("failed to save room {}: {}", self.room_id, e),
        }
        self.registry
            .broadcast(document, &self.room_id, Some(connection))
            .await;
    }
}

async fn close_with(mut ws: WebSocket, code: u16, reason: &'static str) {
    if let Err(e) = ws.send(Message::close_with(code, reason)).await {
        log::debug!("failed to send close frame: {}", e);
    }
    let _ = ws.close().await;
}

async fn write_outbound(mut ws_tx: SplitSink<WebSocket, Message>, mut outbound: mpsc::Receiver<String>) {
    while let Some(text) = outbound.recv().await {
        if let Err(e) = ws_tx.send(Message::text(text)).await {
            log::debug!("failed to send websocket frame: {}", e);
            break;
        }
    }
    let _ = ws_tx.close().await;
}
