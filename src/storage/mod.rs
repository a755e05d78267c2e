pub mod db;
pub mod memory;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

pub use db::Database;
pub use memory::MemoryStore;

use crate::config::{Backend, Config, StorageConfig, CONFIG_FILE};
use crate::document::{Document, DocumentId};

/// Durable keyed storage of documents.
///
/// Methods are blocking; async callers run them on the blocking pool.
/// Only the sync broker writes through this interface.
pub trait DocumentStore: Send + Sync + 'static {
    fn get(&self, id: &DocumentId) -> Result<Option<Document>>;

    /// Overwrite an existing document. Fails if `doc.id` is not stored.
    fn put(&self, doc: &Document) -> Result<()>;

    /// Add a newly created document.
    fn insert(&self, doc: &Document) -> Result<()>;

    /// All documents, in the store's native order.
    fn list(&self) -> Result<Vec<Document>>;
}

/// Open the configured backend, creating the schema if needed.
pub fn open(config: &StorageConfig) -> Result<Arc<dyn DocumentStore>> {
    match config.backend {
        Backend::Memory => Ok(Arc::new(MemoryStore::new())),
        Backend::Sqlite => {
            let db = Database::new(&config.path)?;
            db.initialize()?;
            Ok(Arc::new(db))
        }
    }
}

/// Lay down a default `collabdoc.toml` and an empty database under `root`.
///
/// An existing config file is left untouched.
pub async fn init(root: &Path) -> Result<Config> {
    let config_path = root.join(CONFIG_FILE);
    let mut config = Config::load(&config_path)?;

    if !tokio::fs::try_exists(&config_path).await? {
        tokio::fs::create_dir_all(root).await?;
        tokio::fs::write(&config_path, config.to_toml()?).await?;
    }

    if config.storage.path.is_relative() {
        config.storage.path = root.join(&config.storage.path);
    }
    open(&config.storage)?;

    Ok(config)
}
