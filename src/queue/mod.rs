//! Durable outbound message queue.

mod memory_store;
mod models;
mod postgres_store;
mod store;
mod submitter;

pub use memory_store::MemoryQueueStore;
pub use models::{
    MessageKind, MessageStatus, NewMessage, QueueCounts, QueueStats, QueuedMessage, SentLogEntry,
};
pub use postgres_store::PostgresQueueStore;
pub use store::{QueueStore, QueueStoreError};
pub use submitter::{
    BulkEnqueueRequest, BulkEnqueueResponse, ItemOutcome, MessageSubmitter, SubmitItem,
};
