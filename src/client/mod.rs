//! Client-side view state and connections to a CollabDoc server.
//!
//! `ClientView` is the reconciliation logic every client runs: keep the
//! document list fresh from `document-updated` and overwrite the open
//! editor when the update is for the selected document. Local keystrokes
//! that were not sent yet are lost on overwrite; that is the known cost of
//! last-write-wins and is not merged here.

pub mod http;
pub mod remote;

pub use http::HttpClient;
pub use remote::Client;

use tracing::warn;

use crate::document::{Document, DocumentId};
use crate::sync::{ClientMessage, ConnectionId, ServerMessage};

#[derive(Debug, Clone, Default)]
pub struct ClientView {
    connection_id: Option<ConnectionId>,
    documents: Vec<Document>,
    selected: Option<DocumentId>,
    editor: String,
}

impl ClientView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn selected(&self) -> Option<DocumentId> {
        self.selected
    }

    pub fn editor(&self) -> &str {
        &self.editor
    }

    /// Replace the list with a fresh listing from the server.
    pub fn load(&mut self, documents: Vec<Document>) {
        self.documents = documents;
    }

    /// Open `doc` in the editor.
    pub fn select(&mut self, doc: &Document) -> ClientMessage {
        self.selected = Some(doc.id);
        self.editor = doc.content.clone();
        ClientMessage::OpenDocument { id: doc.id }
    }

    pub fn deselect(&mut self) -> ClientMessage {
        self.selected = None;
        self.editor.clear();
        ClientMessage::CloseDocument
    }

    /// A local change to the editor. Returns the edit to send, if a
    /// document is open.
    pub fn type_content(&mut self, content: impl Into<String>) -> Option<ClientMessage> {
        self.editor = content.into();
        self.selected.map(|id| ClientMessage::EditDocument {
            id,
            content: self.editor.clone(),
        })
    }

    /// Reconcile with a server message. Returns true when the editor buffer
    /// was overwritten.
    pub fn apply(&mut self, message: &ServerMessage) -> bool {
        match message {
            ServerMessage::Welcome { connection_id } => {
                self.connection_id = Some(*connection_id);
                false
            }
            ServerMessage::DocumentUpdated(doc) => {
                match self.documents.iter_mut().find(|d| d.id == doc.id) {
                    Some(slot) => *slot = doc.clone(),
                    None => self.documents.push(doc.clone()),
                }
                if self.selected == Some(doc.id) {
                    self.editor = doc.content.clone();
                    return true;
                }
                false
            }
            ServerMessage::EditRejected { id, reason } => {
                warn!(document_id = %id, %reason, "edit rejected by server");
                false
            }
        }
    }
}
