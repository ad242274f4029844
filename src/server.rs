use std::convert::Infallible;
use std::sync::Arc;

use warp::http::StatusCode;
use warp::ws::{WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

use crate::config::{Config, SessionConfig, StorageConfig};
use crate::files::FileRoomStore;
use crate::messages::{Banner, ErrorBody, RoomCreated};
use crate::registry::ConnectionRegistry;
use crate::room::RoomId;
use crate::session::RoomSession;
use crate::store::{MemoryRoomStore, RoomStore, StoreError};

impl warp::reject::Reject for StoreError {}

/// Shared handles every request works against.
#[derive(Clone)]
pub struct Server {
    store: Arc<dyn RoomStore>,
    registry: Arc<ConnectionRegistry>,
    session: SessionConfig,
}

impl Server {
    pub fn new(store: Arc<dyn RoomStore>, session: SessionConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(session.send_timeout()));
        Server {
            store,
            registry,
            session,
        }
    }

    pub async fn from_config(config: &Config) -> Result<Self, StoreError> {
        let store: Arc<dyn RoomStore> = match &config.storage {
            StorageConfig::Memory => Arc::new(MemoryRoomStore::new()),
            StorageConfig::File { path } => {
                log::info!("storing rooms under {}", path.display());
                Arc::new(FileRoomStore::new(path.clone()).await?)
            }
        };
        Ok(Server::new(store, config.session.clone()))
    }

    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// `GET /`, `POST /api/v1/rooms` and `GET /api/v1/ws/{room_id}`.
    pub fn routes(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone + Send + Sync + 'static {
        let server = self.clone();
        let with_server = warp::any().map(move || server.clone());

        let banner = warp::path::end().and(warp::get()).map(|| {
            warp::reply::json(&Banner {
                message: "Pair Programming API is running".to_string(),
            })
        });

        let create_room = warp::path!("api" / "v1" / "rooms")
            .and(warp::post())
            .and(warp::header::optional::<String>("x-username"))
            .and(warp::header::optional::<String>("x-usermail"))
            .and(with_server.clone())
            .and_then(create_room);

        let ws_route = warp::path!("api" / "v1" / "ws" / String)
            .and(warp::ws())
            .and(with_server)
            .map(|room_id: RoomId, ws: Ws, server: Server| {
                ws.on_upgrade(move |socket| async move {
                    server.handle_connection(room_id, socket).await;
                })
            });

        let cors = warp::cors()
            .allow_any_origin()
            .allow_methods(vec!["GET", "POST"])
            .allow_headers(vec!["content-type", "x-username", "x-usermail"]);

        banner
            .or(create_room)
            .or(ws_route)
            .recover(handle_rejection)
            .with(cors)
    }

    pub async fn create_room(&self) -> Result<RoomId, StoreError> {
        let room_id = self.store.create().await?;
        log::info!("new room created with id {}", room_id);
        Ok(room_id)
    }

    pub async fn handle_connection(&self, room_id: RoomId, ws: WebSocket) {
        let mut session = RoomSession::new(
            room_id,
            self.store.clone(),
            self.registry.clone(),
            self.session.clone(),
        );
        session.run(ws).await;
    }
}

async fn create_room(
    username: Option<String>,
    usermail: Option<String>,
    server: Server,
) -> Result<impl Reply, Rejection> {
    log::info!(
        "POST /rooms from x-username={} x-usermail={}",
        username.as_deref().unwrap_or("N/A"),
        usermail.as_deref().unwrap_or("N/A"),
    );
    let room_id = server.create_room().await.map_err(|e| {
        log::error!("room creation failed: {}", e);
        warp::reject::custom(e)
    })?;
    Ok(warp::reply::json(&RoomCreated { room_id }))
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, error) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(e) = err.find::<StoreError>() {
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        log::debug!("rejected request: {:?}", err);
        (StatusCode::BAD_REQUEST, "bad request".to_string())
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorBody { error }),
        status,
    ))
}
