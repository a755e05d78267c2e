use anyhow::{bail, Result};
use parking_lot::RwLock;

use super::DocumentStore;
use crate::document::{Document, DocumentId};

/// Volatile store kept in insertion order. Used for `backend = "memory"`
/// and in tests.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<Vec<Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, id: &DocumentId) -> Result<Option<Document>> {
        Ok(self.docs.read().iter().find(|d| d.id == *id).cloned())
    }

    fn put(&self, doc: &Document) -> Result<()> {
        let mut docs = self.docs.write();
        match docs.iter_mut().find(|d| d.id == doc.id) {
            Some(slot) => {
                *slot = doc.clone();
                Ok(())
            }
            None => bail!("document {} is not stored", doc.id),
        }
    }

    fn insert(&self, doc: &Document) -> Result<()> {
        let mut docs = self.docs.write();
        if docs.iter().any(|d| d.id == doc.id) {
            bail!("document {} already exists", doc.id);
        }
        docs.push(doc.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<Document>> {
        Ok(self.docs.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::NewDocument;

    #[test]
    fn test_roundtrip_and_order() {
        let store = MemoryStore::new();
        let a = Document::create(NewDocument::new("a", "1"));
        let mut b = Document::create(NewDocument::new("b", "2"));
        store.insert(&a).unwrap();
        store.insert(&b).unwrap();

        b.rewrite("3".into());
        store.put(&b).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, a.id);
        assert_eq!(listed[1].content, "3");
    }

    #[test]
    fn test_rejects_duplicates_and_unknown() {
        let store = MemoryStore::new();
        let doc = Document::create(NewDocument::new("a", ""));
        assert!(store.put(&doc).is_err());
        store.insert(&doc).unwrap();
        assert!(store.insert(&doc).is_err());
    }
}
