#![forbid(unsafe_code)]

pub mod queue;
pub mod repository;
pub mod sqlite;

pub use queue::{CompletionQueue, DEFAULT_COMPLETION_QUEUE_KEY, DEFAULT_QUEUE_KEY, ProgressQueue};
pub use repository::{DocumentStore, InMemoryRepository, KeyValueStore, Storage, StorageError};
