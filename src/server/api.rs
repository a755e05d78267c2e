use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use colored::*;
use futures::{SinkExt, StreamExt};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::document::{Document, NewDocument};
use crate::error::SyncError;
use crate::storage;
use crate::sync::{ClientMessage, ConnectionId, ServerMessage, SessionRegistry, SyncBroker};

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<SyncBroker>,
}

impl AppState {
    pub fn new(broker: Arc<SyncBroker>) -> Self {
        Self { broker }
    }

    /// Wire a store, a fresh session registry and a broker from `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = storage::open(&config.storage)?;
        let sessions = Arc::new(SessionRegistry::new(config.sync.outbox_capacity));
        let broker = SyncBroker::new(store, sessions, config.sync.broker());
        Ok(Self::new(Arc::new(broker)))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "CollabDoc Server" }))
        .route("/health", get(|| async { Json("OK") }))
        .route("/api/documents", get(list_documents).post(create_document))
        .route("/api/documents/{id}", get(get_document))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: Config) -> Result<()> {
    let state = AppState::from_config(&config)?;
    let broker = state.broker.config();
    let app = router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, fan_out = ?broker.fan_out, echo = broker.echo_to_origin, "listening");
    println!(
        "{} Server running at {}",
        "✓".green(),
        format!("http://{}", addr).bright_blue()
    );

    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(state, socket))
}

async fn handle_ws(state: AppState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();

    let connection_id = ConnectionId::new();
    let sessions = state.broker.sessions().clone();
    let (_, mut outbox) = sessions.register(connection_id);
    info!(%connection_id, live = sessions.len(), "client connected");

    // Written straight to the socket so it precedes anything queued meanwhile
    let welcome = ServerMessage::Welcome { connection_id };
    if let Ok(text) = welcome.to_json() {
        let _ = sender.send(Message::Text(text.into())).await;
    }

    // Forward this session's outbox to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(err) => {
                    warn!(%connection_id, error = %err, "failed to encode message");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Each inbound message is handled to completion before the next is read
    let broker = state.broker.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            let decoded = match msg {
                Ok(Message::Text(text)) => ClientMessage::from_json(text.as_str()),
                Ok(Message::Binary(bin)) => ClientMessage::from_cbor(&bin),
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Err(err) => {
                    debug!(%connection_id, error = %err, "transport error");
                    break;
                }
            };

            match decoded {
                Ok(message) => broker.handle(connection_id, message).await,
                Err(err) => warn!(%connection_id, error = %err, "ignoring malformed message"),
            }
        }
    });

    // The outbox sender lives in the registry, so the send task only ends
    // on socket failure or once the session is unregistered.
    tokio::select! {
        _ = &mut recv_task => {
            sessions.unregister(connection_id);
            let _ = send_task.await;
        }
        _ = &mut send_task => {
            // An edit already handed to the broker commits on its own task.
            recv_task.abort();
            sessions.unregister(connection_id);
        }
    }
    info!(%connection_id, live = sessions.len(), "client disconnected");
}

async fn list_documents(
    State(state): State<AppState>,
) -> Result<Json<Vec<Document>>, StatusCode> {
    match state.broker.list_documents().await {
        Ok(docs) => Ok(Json(docs)),
        Err(err) => {
            warn!(error = %err, "listing documents failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Document>, StatusCode> {
    match state.broker.get_document(id.into()).await {
        Ok(Some(doc)) => Ok(Json(doc)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(err) => {
            warn!(error = %err, "reading document failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn create_document(
    State(state): State<AppState>,
    Json(new): Json<NewDocument>,
) -> Result<(StatusCode, Json<Document>), (StatusCode, String)> {
    match state.broker.create_document(new).await {
        Ok(doc) => Ok((StatusCode::CREATED, Json(doc))),
        Err(err @ SyncError::InvalidDocument(_)) => Err((StatusCode::BAD_REQUEST, err.to_string())),
        Err(err) => {
            warn!(error = %err, "creating document failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
        }
    }
}
