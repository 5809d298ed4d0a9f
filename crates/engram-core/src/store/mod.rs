//! Storage Module
//!
//! Two process-local stores injected into the engine:
//! - the metadata store: a SQLite-backed, key-sorted record store with
//!   conditional writes, secondary key columns, and atomic JSON updates
//! - the raw object store: a filesystem blob store for raw thought
//!   payloads and cached theme graphs

mod metadata;
mod migrations;
mod objects;

pub use metadata::{
    keys, MetadataStore, PutOutcome, QueryPage, Record, StoreError, BATCH_DELETE_CHUNK,
};
pub use migrations::MIGRATIONS;
pub use objects::FsObjectStore;

/// Store result type
pub type Result<T> = std::result::Result<T, StoreError>;
