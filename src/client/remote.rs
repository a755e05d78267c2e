use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use super::ClientView;
use crate::document::{Document, DocumentId};
use crate::sync::{ClientMessage, ServerMessage};

/// A live WebSocket connection driving a [`ClientView`].
pub struct Client {
    outgoing: mpsc::UnboundedSender<ClientMessage>,
    view: Arc<Mutex<ClientView>>,
    events: broadcast::Sender<ServerMessage>,
    forward: JoinHandle<()>,
    recv: JoinHandle<()>,
}

impl Client {
    /// Connect to a server's `/ws` endpoint.
    pub async fn connect(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| anyhow!("invalid ws url: {e}"))?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let view = Arc::new(Mutex::new(ClientView::new()));
        let (events, _) = broadcast::channel(256);

        // local -> remote
        let forward = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "failed to encode client message");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        // remote -> local
        let view_clone = view.clone();
        let events_clone = events.clone();
        let recv = tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerMessage::from_json(text.as_str()) {
                        Ok(message) => {
                            view_clone.lock().apply(&message);
                            let _ = events_clone.send(message);
                        }
                        Err(err) => debug!(error = %err, "ignoring unknown server message"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            outgoing,
            view,
            events,
            forward,
            recv,
        })
    }

    /// Messages received from the server, after they were applied to the view.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.events.subscribe()
    }

    pub fn view(&self) -> ClientView {
        self.view.lock().clone()
    }

    pub fn load(&self, documents: Vec<Document>) {
        self.view.lock().load(documents);
    }

    pub fn open(&self, doc: &Document) -> Result<()> {
        let message = self.view.lock().select(doc);
        self.send(message)
    }

    pub fn close(&self) -> Result<()> {
        let message = self.view.lock().deselect();
        self.send(message)
    }

    /// Replace the editor buffer and send it if a document is open.
    pub fn type_content(&self, content: impl Into<String>) -> Result<()> {
        let message = self.view.lock().type_content(content);
        match message {
            Some(message) => self.send(message),
            None => Ok(()),
        }
    }

    pub fn send(&self, message: ClientMessage) -> Result<()> {
        self.outgoing
            .send(message)
            .map_err(|_| anyhow!("connection closed"))
    }

    /// Whether the server side of the connection is still open.
    pub fn is_connected(&self) -> bool {
        !self.recv.is_finished()
    }

    /// Close the connection. Dropping the client does the same.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.forward.abort();
        self.recv.abort();
    }
}

/// Next message from a [`Client::subscribe`] stream. A lagging receiver
/// skips ahead instead of ending; `None` once the stream is closed.
pub async fn next_event(events: &mut broadcast::Receiver<ServerMessage>) -> Option<ServerMessage> {
    loop {
        match events.recv().await {
            Ok(message) => return Some(message),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event stream lagged, skipping ahead");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Wait for the server to accept or reject our edit of `id` to `content`.
/// Updates carrying other content came from someone else and are skipped.
pub async fn confirm_edit(
    events: &mut broadcast::Receiver<ServerMessage>,
    id: DocumentId,
    content: &str,
) -> Result<Document> {
    while let Some(event) = next_event(events).await {
        match event {
            ServerMessage::DocumentUpdated(updated) if updated.id == id && updated.content == content => {
                return Ok(updated);
            }
            ServerMessage::EditRejected { id: rejected, reason } if rejected == id => {
                return Err(anyhow!("edit rejected: {reason}"));
            }
            _ => {}
        }
    }
    Err(anyhow!("connection closed"))
}

/// `http://host:port` → `ws://host:port/ws`.
pub fn ws_url(base: &str) -> Result<String> {
    let mut url = Url::parse(base)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot derive websocket url from {base}"))?;
    url.set_path("/ws");
    Ok(url.to_string())
}
