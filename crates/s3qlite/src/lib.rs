//! Query read-only SQLite databases stored in object storage.
//!
//! Each object under a configured prefix is exposed as a schema. SQLite reads
//! the file in place through a custom VFS that issues ranged reads against the
//! object store, so databases are never downloaded in full.

pub mod block_store;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod errors;
pub mod protocol;
pub mod storage;
pub mod vfs;

#[cfg(test)]
mod testutil;

pub use block_store::{RemoteBlockStore, RemoteObjectRef};
pub use catalog::LogicalCatalog;
pub use config::{FederationConfig, StorageConfig};
pub use dispatch::FederationDispatcher;
pub use errors::{FederationError, Result};
pub use storage::{ObjectStorage, ObjectStoreStorage};
