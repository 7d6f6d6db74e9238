//! In-memory prefix store for testing and single-process use
//!
//! The store only rejects duplicate (name, parent) pairs. It does not detect
//! CIDR collisions and offers no atomic check-and-set, so racing allocations
//! on the same parent may all back off and fail where the SQLite store would
//! let exactly one of them win.

use crate::{Prefix, Result, Storage, StoreError, WriteOptions};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// An in-memory prefix store
#[derive(Clone, Default)]
pub struct MemoryStorage {
    prefixes: Arc<Mutex<Vec<Prefix>>>,
}

impl MemoryStorage {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self {
            prefixes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Get the number of prefixes stored
    pub fn len(&self) -> usize {
        self.prefixes.lock().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.prefixes.lock().is_empty()
    }
}

fn parent_label(prefix: &Prefix) -> String {
    prefix
        .parent()
        .map(|p| p.id())
        .unwrap_or_else(|| "<root>".to_string())
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn add(&self, prefix: &Prefix, _opts: &WriteOptions) -> Result<()> {
        let mut prefixes = self.prefixes.lock();
        if prefixes.iter().any(|p| p == prefix) {
            return Err(StoreError::AlreadyExists {
                name: prefix.name().to_string(),
                parent: parent_label(prefix),
            });
        }
        prefixes.push(prefix.clone());
        Ok(())
    }

    async fn update(&self, prefix: &Prefix, _opts: &WriteOptions) -> Result<()> {
        let mut prefixes = self.prefixes.lock();
        match prefixes.iter_mut().find(|p| *p == prefix) {
            Some(existing) => {
                *existing = prefix.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(prefix.id())),
        }
    }

    async fn delete(&self, prefix: &Prefix) -> Result<()> {
        self.prefixes
            .lock()
            .retain(|p| p != prefix && !p.descends_from(prefix));
        Ok(())
    }

    async fn get(&self, name: &str, parent: Option<&Prefix>) -> Result<Option<Prefix>> {
        Ok(self
            .prefixes
            .lock()
            .iter()
            .find(|p| p.name() == name && p.parent() == parent)
            .cloned())
    }

    async fn get_children(&self, parent: &Prefix) -> Result<Vec<Prefix>> {
        Ok(self
            .prefixes
            .lock()
            .iter()
            .filter(|p| p.parent() == Some(parent))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_add_get() {
        let store = MemoryStorage::new();
        let opts = WriteOptions::default();

        let p1 = Prefix::root("abc", "192.168.0.0/24");
        store.add(&p1, &opts).await.unwrap();
        assert_eq!(store.get("abc", None).await.unwrap(), Some(p1.clone()));

        let p2 = Prefix::child("abc", "192.168.0.0/32", &p1);
        store.add(&p2, &opts).await.unwrap();
        assert_eq!(store.get("abc", None).await.unwrap(), Some(p1.clone()));
        let fetched = store.get("abc", Some(&p1)).await.unwrap().unwrap();
        assert_eq!(fetched, p2);
        assert_eq!(fetched.cidr(), "192.168.0.0/32");

        let duplicate = Prefix::root("abc", "192.168.0.1/32");
        let result = store.add(&duplicate, &opts).await;
        assert!(matches!(result, Err(StoreError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_memory_children_do_not_check_cidr() {
        let store = MemoryStorage::new();
        let opts = WriteOptions::default();

        let p1 = Prefix::root("abc", "192.168.0.0/16");
        let p2 = Prefix::child("abc", "192.168.0.0/24", &p1);
        let p3 = Prefix::child("def", "192.168.0.0/24", &p1);
        let p4 = Prefix::child("def", "192.168.0.0/32", &p3);
        for p in [&p1, &p2, &p3, &p4] {
            store.add(p, &opts).await.unwrap();
        }

        let children = store.get_children(&p1).await.unwrap();
        assert_eq!(children.len(), 2);
        assert!(children.contains(&p2));
        assert!(children.contains(&p3));

        assert!(store.get_children(&p2).await.unwrap().is_empty());
        assert_eq!(store.get_children(&p3).await.unwrap(), vec![p4]);
    }

    #[tokio::test]
    async fn test_memory_delete_cascades() {
        let store = MemoryStorage::new();
        let opts = WriteOptions::default();

        let p1 = Prefix::root("abc", "192.168.0.0/24");
        let p2 = Prefix::child("abc", "192.168.0.0/32", &p1);
        let p3 = Prefix::child("def", "192.168.0.1/32", &p1);
        for p in [&p1, &p2, &p3] {
            store.add(p, &opts).await.unwrap();
        }

        store.delete(&p2).await.unwrap();
        assert_eq!(store.get_children(&p1).await.unwrap(), vec![p3.clone()]);

        store.delete(&p1).await.unwrap();
        assert!(store.get("abc", None).await.unwrap().is_none());
        assert!(store.get("def", Some(&p1)).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_memory_update() {
        let store = MemoryStorage::new();
        let opts = WriteOptions::default();

        let p1 = Prefix::root("abc", "192.168.0.0/24");
        store.add(&p1, &opts).await.unwrap();
        store.update(&p1.with_cidr("192.168.1.0/24"), &opts).await.unwrap();
        let fetched = store.get("abc", None).await.unwrap().unwrap();
        assert_eq!(fetched.cidr(), "192.168.1.0/24");

        let missing = Prefix::root("missing", "10.0.0.0/8");
        assert!(matches!(
            store.update(&missing, &opts).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
