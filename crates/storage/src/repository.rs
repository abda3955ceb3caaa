use async_trait::async_trait;
use quant_core::model::{UserId, deep_merge_into};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Device-local durable string storage (the queue and the identity cache live here).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the value cannot be written.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Remote per-user document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the user's document, or `None` if it was never written.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on network or permission failures.
    async fn read_document(
        &self,
        user: &UserId,
    ) -> Result<Option<Map<String, Value>>, StorageError>;

    /// Deep-merge `partial` into the user's document, creating it if absent.
    ///
    /// Nested objects merge key by key; scalars and arrays overwrite.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on network or permission failures. A failed
    /// merge leaves the stored document unchanged.
    async fn merge_write(
        &self,
        user: &UserId,
        partial: Map<String, Value>,
    ) -> Result<(), StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
///
/// Document calls can be switched offline to exercise the degraded paths.
#[derive(Clone)]
pub struct InMemoryRepository {
    entries: Arc<Mutex<HashMap<String, String>>>,
    documents: Arc<Mutex<HashMap<UserId, Map<String, Value>>>>,
    documents_online: Arc<AtomicBool>,
    merge_writes: Arc<AtomicUsize>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            documents: Arc::new(Mutex::new(HashMap::new())),
            documents_online: Arc::new(AtomicBool::new(true)),
            merge_writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// When offline, every document read and merge-write fails with
    /// `StorageError::Connection`.
    pub fn set_documents_online(&self, online: bool) {
        self.documents_online.store(online, Ordering::SeqCst);
    }

    /// Number of merge-writes that reached the store (including failed ones).
    #[must_use]
    pub fn merge_write_count(&self) -> usize {
        self.merge_writes.load(Ordering::SeqCst)
    }

    fn ensure_online(&self) -> Result<(), StorageError> {
        if self.documents_online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Connection("document store offline".into()))
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryRepository {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(key);
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryRepository {
    async fn read_document(
        &self,
        user: &UserId,
    ) -> Result<Option<Map<String, Value>>, StorageError> {
        self.ensure_online()?;
        let guard = self
            .documents
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(user).cloned())
    }

    async fn merge_write(
        &self,
        user: &UserId,
        partial: Map<String, Value>,
    ) -> Result<(), StorageError> {
        self.merge_writes.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        let mut guard = self
            .documents
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let document = guard.entry(user.clone()).or_default();
        deep_merge_into(document, &partial);
        Ok(())
    }
}

/// Aggregates the local and remote stores behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub local: Arc<dyn KeyValueStore>,
    pub documents: Arc<dyn DocumentStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let local: Arc<dyn KeyValueStore> = Arc::new(repo.clone());
        let documents: Arc<dyn DocumentStore> = Arc::new(repo);
        Self { local, documents }
    }
}
