//! Messages exchanged over a client connection.
//!
//! Every frame is `{"event": <name>, "data": <payload>}`. Text frames carry
//! JSON; binary frames carry the same structure encoded as CBOR.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::session::ConnectionId;
use crate::document::{Document, DocumentId};

/// Client → server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Replace the content of `id`.
    EditDocument { id: DocumentId, content: String },
    /// The client opened `id` in its editor.
    OpenDocument { id: DocumentId },
    /// The client closed its editor.
    CloseDocument,
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Sent once, right after the connection is registered.
    Welcome {
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
    },
    /// Full snapshot of a document after an accepted change or creation.
    DocumentUpdated(Document),
    /// Sent only to the originator of an edit that was dropped.
    EditRejected { id: DocumentId, reason: String },
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        Ok(serde_cbor::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerMessage {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn document(&self) -> Option<&Document> {
        match self {
            ServerMessage::DocumentUpdated(doc) => Some(doc),
            _ => None,
        }
    }
}
