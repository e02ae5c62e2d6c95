//! Engine state and its durable history store
//!
//! - `types`: the data model shared by every component
//! - `schema`: collection names, retention caps and key helpers
//! - `store`: [`HistoryStore`] over a pluggable document backend
//! - `rocks`: RocksDB backend (`heavy-state` feature)

pub mod schema;
pub mod store;
pub mod types;

#[cfg(feature = "heavy-state")]
pub mod rocks;

#[cfg(feature = "heavy-state")]
pub use rocks::RocksBackend;
pub use store::{
    BackendKind, Codec, DocumentBackend, HistoryStore, JsonFileBackend, MemoryBackend,
    SharedHistoryStore, StoreConfig, StoreError, StoreResult,
};
pub use types::*;
