//! # CollabDoc - Real-time Shared Document Editing
//!
//! Clients open documents over a WebSocket and see each other's edits as
//! they happen. The server keeps the authoritative copy of every document,
//! resolves concurrent edits with last-write-wins, persists the result and
//! fans the new snapshot out to connected clients.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use collabdoc::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::default();
//!     config.server.port = 5000;
//!     collabdoc::server::start(config).await
//! }
//! ```

pub mod client;
pub mod config;
pub mod document;
pub mod error;
pub mod server;
pub mod storage;
pub mod sync;

// Re-export main types for library consumers
pub use document::{Document, DocumentId, NewDocument};
pub use error::{SyncError, SyncResult};
pub use storage::{Database, DocumentStore, MemoryStore};
pub use sync::{ClientMessage, ServerMessage, SessionRegistry, SyncBroker};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
