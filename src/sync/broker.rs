//! The single authority for rewriting document content and propagating it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::policy::{FanOut, LastWriteWins, ResolutionPolicy};
use super::protocol::{ClientMessage, ServerMessage};
use super::session::{ConnectionId, SessionRegistry};
use crate::document::{Document, DocumentId, NewDocument};
use crate::error::{SyncError, SyncResult};
use crate::storage::DocumentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    pub fan_out: FanOut,
    /// Whether the originator of an edit also receives its broadcast.
    pub echo_to_origin: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            fan_out: FanOut::All,
            echo_to_origin: true,
        }
    }
}

/// One inbound edit, alive only while it is processed.
#[derive(Debug, Clone)]
pub struct EditEvent {
    pub document_id: DocumentId,
    pub new_content: String,
    pub origin: ConnectionId,
    /// Logical arrival order at the broker.
    pub received_at: u64,
}

#[derive(Debug, Clone)]
pub struct EditOutcome {
    pub document: Document,
    /// Connections the update was handed to.
    pub recipients: Vec<ConnectionId>,
}

pub struct SyncBroker {
    core: Arc<Core>,
    arrivals: AtomicU64,
}

/// State shared with the commit tasks, which may outlive the caller.
struct Core {
    store: Arc<dyn DocumentStore>,
    sessions: Arc<SessionRegistry>,
    policy: Arc<dyn ResolutionPolicy>,
    config: BrokerConfig,
    // Held across read, resolve, persist and broadcast for one document.
    // Entries exist only while some edit holds or awaits them.
    locks: DashMap<DocumentId, Arc<Mutex<()>>>,
}

impl SyncBroker {
    pub fn new(store: Arc<dyn DocumentStore>, sessions: Arc<SessionRegistry>, config: BrokerConfig) -> Self {
        Self::with_policy(store, sessions, config, Arc::new(LastWriteWins))
    }

    pub fn with_policy(
        store: Arc<dyn DocumentStore>,
        sessions: Arc<SessionRegistry>,
        config: BrokerConfig,
        policy: Arc<dyn ResolutionPolicy>,
    ) -> Self {
        Self {
            core: Arc::new(Core {
                store,
                sessions,
                policy,
                config,
                locks: DashMap::new(),
            }),
            arrivals: AtomicU64::new(0),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.core.sessions
    }

    pub fn config(&self) -> BrokerConfig {
        self.core.config
    }

    pub fn policy_name(&self) -> &'static str {
        self.core.policy.name()
    }

    /// Dispatch one inbound client message to completion.
    pub async fn handle(&self, origin: ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::OpenDocument { id } => {
                self.core.sessions.set_active_document(origin, id);
            }
            ClientMessage::CloseDocument => {
                self.core.sessions.clear_active_document(origin);
            }
            ClientMessage::EditDocument { id, content } => {
                if let Err(err) = self.apply_edit(id, content, origin).await {
                    let rejected = ServerMessage::EditRejected {
                        id,
                        reason: err.reason().to_string(),
                    };
                    self.core.sessions.deliver(origin, Arc::new(rejected));
                }
            }
        }
    }

    /// Resolve an edit against the stored document, persist it, then
    /// broadcast the result.
    ///
    /// Nothing is broadcast unless persistence succeeded. For a given
    /// document, broadcasts leave in the order persistence completed.
    /// The commit runs on its own task: dropping the returned future does
    /// not stop a commit that has started, and its broadcast still goes out.
    pub async fn apply_edit(
        &self,
        document_id: DocumentId,
        new_content: String,
        origin: ConnectionId,
    ) -> SyncResult<EditOutcome> {
        let event = EditEvent {
            document_id,
            new_content,
            origin,
            received_at: self.arrivals.fetch_add(1, Ordering::Relaxed),
        };

        let core = self.core.clone();
        match tokio::spawn(async move { core.commit(event).await }).await {
            Ok(result) => result,
            Err(err) => Err(SyncError::PersistenceFailure {
                id: document_id,
                source: anyhow!("edit task failed: {err}"),
            }),
        }
    }

    /// Insert a new document and announce it to every connected client.
    pub async fn create_document(&self, new: NewDocument) -> SyncResult<Document> {
        new.validate().map_err(SyncError::InvalidDocument)?;

        let document = Document::create(new);
        let to_store = document.clone();
        self.core
            .blocking(move |store| store.insert(&to_store))
            .await
            .map_err(|source| SyncError::PersistenceFailure {
                id: document.id,
                source,
            })?;

        let sessions = &self.core.sessions;
        let message = Arc::new(ServerMessage::DocumentUpdated(document.clone()));
        let announced = sessions
            .connections()
            .into_iter()
            .filter(|conn| sessions.deliver(*conn, message.clone()))
            .count();
        info!(document_id = %document.id, title = %document.title, announced, "document created");

        Ok(document)
    }

    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        self.core.blocking(|store| store.list()).await
    }

    pub async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        self.core.blocking(move |store| store.get(&id)).await
    }
}

impl Core {
    async fn commit(&self, event: EditEvent) -> SyncResult<EditOutcome> {
        let document_id = event.document_id;
        let lock = self.lock_for(document_id);
        let result = {
            let _guard = lock.lock().await;
            self.commit_locked(event).await
        };
        drop(lock);
        self.release(document_id);
        result
    }

    async fn commit_locked(&self, event: EditEvent) -> SyncResult<EditOutcome> {
        let document_id = event.document_id;
        let stored = self
            .blocking(move |store| store.get(&document_id))
            .await
            .map_err(|source| SyncError::PersistenceFailure {
                id: document_id,
                source,
            })?;

        let Some(mut document) = stored else {
            warn!(%document_id, origin = %event.origin, "edit for unknown document dropped");
            return Err(SyncError::UnknownDocument(document_id));
        };
        // Editing a document means viewing it.
        self.sessions.set_active_document(event.origin, document_id);

        let content = self.policy.resolve(&document, event.new_content);
        document.rewrite(content);

        let to_store = document.clone();
        if let Err(source) = self.blocking(move |store| store.put(&to_store)).await {
            warn!(%document_id, origin = %event.origin, error = %source, "edit not persisted, dropped");
            return Err(SyncError::PersistenceFailure {
                id: document_id,
                source,
            });
        }

        let recipients = self.broadcast(&document, event.origin);
        info!(
            %document_id,
            origin = %event.origin,
            seq = event.received_at,
            recipients = recipients.len(),
            "edit applied"
        );

        Ok(EditOutcome {
            document,
            recipients,
        })
    }

    fn broadcast(&self, document: &Document, origin: ConnectionId) -> Vec<ConnectionId> {
        let mut targets = match self.config.fan_out {
            FanOut::All => self.sessions.connections(),
            FanOut::Interested => self.sessions.list_interested(document.id),
        };
        if !self.config.echo_to_origin {
            targets.remove(&origin);
        }

        let message = Arc::new(ServerMessage::DocumentUpdated(document.clone()));
        let recipients: Vec<_> = targets
            .into_iter()
            .filter(|conn| self.sessions.deliver(*conn, message.clone()))
            .collect();
        debug!(document_id = %document.id, count = recipients.len(), "broadcast");
        recipients
    }

    fn lock_for(&self, id: DocumentId) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_default().clone()
    }

    /// Drop the lock entry once no edit holds or awaits it. Clones are only
    /// taken under the map's shard lock, so the count cannot rise mid-check.
    fn release(&self, id: DocumentId) {
        self.locks.remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn DocumentStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|err| anyhow!("failed to join storage task: {err}"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::sync::session::Outbox;
    use std::time::Duration;

    struct ReadOnlyStore(MemoryStore);

    impl DocumentStore for ReadOnlyStore {
        fn get(&self, id: &DocumentId) -> Result<Option<Document>> {
            self.0.get(id)
        }
        fn put(&self, _doc: &Document) -> Result<()> {
            Err(anyhow!("disk is read-only"))
        }
        fn insert(&self, doc: &Document) -> Result<()> {
            self.0.insert(doc)
        }
        fn list(&self) -> Result<Vec<Document>> {
            self.0.list()
        }
    }

    /// Writes of the content "slow" take a while to land.
    struct StallingStore(MemoryStore);

    impl DocumentStore for StallingStore {
        fn get(&self, id: &DocumentId) -> Result<Option<Document>> {
            self.0.get(id)
        }
        fn put(&self, doc: &Document) -> Result<()> {
            if doc.content == "slow" {
                std::thread::sleep(Duration::from_millis(300));
            }
            self.0.put(doc)
        }
        fn insert(&self, doc: &Document) -> Result<()> {
            self.0.insert(doc)
        }
        fn list(&self) -> Result<Vec<Document>> {
            self.0.list()
        }
    }

    fn broker_with(store: Arc<dyn DocumentStore>, config: BrokerConfig) -> SyncBroker {
        SyncBroker::new(store, Arc::new(SessionRegistry::default()), config)
    }

    fn connect(broker: &SyncBroker) -> (ConnectionId, Outbox) {
        let id = ConnectionId::new();
        let (_, outbox) = broker.sessions().register(id);
        (id, outbox)
    }

    fn drain(outbox: &mut Outbox) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = outbox.try_recv() {
            out.push((*msg).clone());
        }
        out
    }

    #[tokio::test]
    async fn test_apply_edit_persists_and_advances() {
        let broker = broker_with(Arc::new(MemoryStore::new()), BrokerConfig::default());
        let doc = broker
            .create_document(NewDocument::new("Notes", "hello"))
            .await
            .unwrap();
        let (a, _outbox) = connect(&broker);

        let outcome = broker.apply_edit(doc.id, "hello world".into(), a).await.unwrap();

        let stored = broker.get_document(doc.id).await.unwrap().unwrap();
        assert_eq!(stored.content, "hello world");
        assert_eq!(stored, outcome.document);
        assert!(stored.updated_at > doc.updated_at);
        assert_eq!(stored.title, "Notes");
        assert_eq!(stored.created_at, doc.created_at);
    }

    #[tokio::test]
    async fn test_unknown_document_no_broadcast() {
        let broker = broker_with(Arc::new(MemoryStore::new()), BrokerConfig::default());
        let (a, mut out_a) = connect(&broker);
        let (_b, mut out_b) = connect(&broker);

        let err = broker
            .apply_edit(DocumentId::new(), "x".into(), a)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::UnknownDocument(_)));
        assert!(drain(&mut out_a).is_empty());
        assert!(drain(&mut out_b).is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_no_broadcast() {
        let store = Arc::new(ReadOnlyStore(MemoryStore::new()));
        let broker = broker_with(store.clone(), BrokerConfig::default());
        let doc = broker
            .create_document(NewDocument::new("Notes", "hello"))
            .await
            .unwrap();
        let (a, mut out_a) = connect(&broker);
        let (_b, mut out_b) = connect(&broker);

        let err = broker.apply_edit(doc.id, "lost".into(), a).await.unwrap_err();

        assert!(matches!(err, SyncError::PersistenceFailure { .. }));
        assert!(drain(&mut out_a).is_empty());
        assert!(drain(&mut out_b).is_empty());
        assert_eq!(store.get(&doc.id).unwrap().unwrap().content, "hello");
    }

    #[tokio::test]
    async fn test_rejection_goes_to_originator_only() {
        let broker = broker_with(Arc::new(MemoryStore::new()), BrokerConfig::default());
        let (a, mut out_a) = connect(&broker);
        let (_b, mut out_b) = connect(&broker);
        let missing = DocumentId::new();

        broker
            .handle(
                a,
                ClientMessage::EditDocument {
                    id: missing,
                    content: "x".into(),
                },
            )
            .await;

        assert_eq!(
            drain(&mut out_a),
            vec![ServerMessage::EditRejected {
                id: missing,
                reason: "unknown-document".into()
            }]
        );
        assert!(drain(&mut out_b).is_empty());
    }

    #[tokio::test]
    async fn test_echo_to_origin_enabled() {
        let broker = broker_with(Arc::new(MemoryStore::new()), BrokerConfig::default());
        let doc = broker.create_document(NewDocument::new("Notes", "")).await.unwrap();
        let (a, mut out_a) = connect(&broker);
        let (b, mut out_b) = connect(&broker);

        let outcome = broker.apply_edit(doc.id, "v1".into(), a).await.unwrap();

        assert_eq!(outcome.recipients.len(), 2);
        assert!(outcome.recipients.contains(&a) && outcome.recipients.contains(&b));
        assert_eq!(drain(&mut out_a).len(), 1);
        let got = drain(&mut out_b);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].document().unwrap().content, "v1");
    }

    #[tokio::test]
    async fn test_echo_to_origin_disabled() {
        let config = BrokerConfig {
            echo_to_origin: false,
            ..Default::default()
        };
        let broker = broker_with(Arc::new(MemoryStore::new()), config);
        let doc = broker.create_document(NewDocument::new("Notes", "")).await.unwrap();
        let (a, mut out_a) = connect(&broker);
        let (b, mut out_b) = connect(&broker);

        let outcome = broker.apply_edit(doc.id, "v1".into(), a).await.unwrap();

        assert_eq!(outcome.recipients, vec![b]);
        assert!(drain(&mut out_a).is_empty());
        assert_eq!(drain(&mut out_b).len(), 1);
    }

    #[tokio::test]
    async fn test_interested_fan_out() {
        let config = BrokerConfig {
            fan_out: FanOut::Interested,
            echo_to_origin: true,
        };
        let broker = broker_with(Arc::new(MemoryStore::new()), config);
        let doc = broker.create_document(NewDocument::new("Notes", "")).await.unwrap();
        let (a, _out_a) = connect(&broker);
        let (b, mut out_b) = connect(&broker);
        let (_c, mut out_c) = connect(&broker);
        broker.handle(b, ClientMessage::OpenDocument { id: doc.id }).await;

        broker
            .handle(
                a,
                ClientMessage::EditDocument {
                    id: doc.id,
                    content: "v1".into(),
                },
            )
            .await;

        assert_eq!(drain(&mut out_b).len(), 1);
        assert!(drain(&mut out_c).is_empty());
        assert_eq!(broker.sessions().list_interested(doc.id).len(), 2);
    }

    #[tokio::test]
    async fn test_disconnected_gets_no_delivery() {
        let broker = broker_with(Arc::new(MemoryStore::new()), BrokerConfig::default());
        let doc = broker.create_document(NewDocument::new("Notes", "")).await.unwrap();
        let (a, _out_a) = connect(&broker);
        let (b, _out_b) = connect(&broker);
        broker.sessions().set_active_document(b, doc.id);

        broker.sessions().unregister(b);
        let outcome = broker.apply_edit(doc.id, "v1".into(), a).await.unwrap();

        assert_eq!(outcome.recipients, vec![a]);
    }

    #[tokio::test]
    async fn test_create_announces_to_everyone() {
        let broker = broker_with(Arc::new(MemoryStore::new()), BrokerConfig::default());
        let (_a, mut out_a) = connect(&broker);

        let doc = broker.create_document(NewDocument::new("Fresh", "x")).await.unwrap();

        assert_eq!(drain(&mut out_a), vec![ServerMessage::DocumentUpdated(doc)]);
    }

    #[tokio::test]
    async fn test_create_rejects_empty_title() {
        let broker = broker_with(Arc::new(MemoryStore::new()), BrokerConfig::default());
        let err = broker.create_document(NewDocument::new(" ", "x")).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidDocument(_)));
        assert!(broker.list_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_document_clears_interest() {
        let broker = broker_with(Arc::new(MemoryStore::new()), BrokerConfig::default());
        let (a, _out) = connect(&broker);
        let id = DocumentId::new();

        broker.handle(a, ClientMessage::OpenDocument { id }).await;
        assert_eq!(broker.sessions().session(a).unwrap().active_document_id, Some(id));
        broker.handle(a, ClientMessage::CloseDocument).await;
        assert_eq!(broker.sessions().session(a).unwrap().active_document_id, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abandoned_edit_still_commits_in_order() {
        let store = Arc::new(StallingStore(MemoryStore::new()));
        let broker = Arc::new(broker_with(store, BrokerConfig::default()));
        let doc = broker.create_document(NewDocument::new("Notes", "")).await.unwrap();
        let (a, _out_a) = connect(&broker);
        let (_observer, mut observed) = connect(&broker);

        let slow = tokio::spawn({
            let broker = broker.clone();
            async move { broker.apply_edit(doc.id, "slow".into(), a).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        slow.abort();

        broker.apply_edit(doc.id, "fast".into(), a).await.unwrap();

        let broadcasts: Vec<String> = drain(&mut observed)
            .iter()
            .filter_map(|msg| msg.document().map(|d| d.content.clone()))
            .collect();
        assert_eq!(broadcasts, vec!["slow", "fast"]);
        let stored = broker.get_document(doc.id).await.unwrap().unwrap();
        assert_eq!(stored.content, "fast");
    }

    #[tokio::test]
    async fn test_lock_table_empties_after_edits() {
        let broker = broker_with(Arc::new(MemoryStore::new()), BrokerConfig::default());
        let doc = broker.create_document(NewDocument::new("Notes", "")).await.unwrap();
        let (a, _out_a) = connect(&broker);

        for _ in 0..100 {
            broker
                .apply_edit(DocumentId::new(), "x".into(), a)
                .await
                .unwrap_err();
        }
        assert_eq!(broker.core.locks.len(), 0);

        broker.apply_edit(doc.id, "v1".into(), a).await.unwrap();
        assert_eq!(broker.core.locks.len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lock_table_empties_after_contention() {
        let broker = Arc::new(broker_with(Arc::new(MemoryStore::new()), BrokerConfig::default()));
        let doc = broker.create_document(NewDocument::new("Notes", "")).await.unwrap();
        let (a, _out_a) = connect(&broker);

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let broker = broker.clone();
                tokio::spawn(async move { broker.apply_edit(doc.id, format!("v{i}"), a).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(broker.core.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_rejected_edit_leaves_session_idle() {
        let broker = broker_with(Arc::new(MemoryStore::new()), BrokerConfig::default());
        let (a, _out) = connect(&broker);

        broker
            .handle(
                a,
                ClientMessage::EditDocument {
                    id: DocumentId::new(),
                    content: "x".into(),
                },
            )
            .await;

        assert_eq!(broker.sessions().session(a).unwrap().active_document_id, None);
    }

    #[test]
    fn test_policy_name() {
        let broker = broker_with(Arc::new(MemoryStore::new()), BrokerConfig::default());
        assert_eq!(broker.policy_name(), "last-write-wins");
    }
}
