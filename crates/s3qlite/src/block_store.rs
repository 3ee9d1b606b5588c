//! Read-only, byte addressable view over a single remote object.
//!
//! SQLite calls into this synchronously from its own thread, so every remote
//! call blocks on the captured runtime handle. A block store must never be used
//! from inside an async task.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::debug;

use crate::errors::{FederationError, Result};
use crate::storage::ObjectStorage;

/// Identifies one remote blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteObjectRef {
    container: String,
    key: String,
}

impl RemoteObjectRef {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        RemoteObjectRef {
            container: container.into(),
            key: key.into(),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for RemoteObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.container, self.key)
    }
}

#[derive(Debug)]
pub struct RemoteBlockStore {
    storage: Arc<dyn ObjectStorage>,
    object: RemoteObjectRef,
    handle: Handle,
    /// Size probed on open. The object is immutable for the lifetime of the
    /// store, so this is never refreshed.
    size: u64,
    closed: AtomicBool,
}

impl RemoteBlockStore {
    /// Open a store over `object`, probing its size.
    ///
    /// Errors with `NotFound` if the object doesn't exist.
    pub fn open(
        storage: Arc<dyn ObjectStorage>,
        object: RemoteObjectRef,
        handle: Handle,
    ) -> Result<Self> {
        let size = handle.block_on(storage.head(&object))?;
        debug!(%object, %size, "opened remote block store");

        Ok(RemoteBlockStore {
            storage,
            object,
            handle,
            size,
            closed: AtomicBool::new(false),
        })
    }

    pub fn object(&self) -> &RemoteObjectRef {
        &self.object
    }

    /// Total size of the object in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read exactly `length` bytes starting at `offset`.
    pub fn read(&self, offset: u64, length: u64) -> Result<Bytes> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FederationError::StoreClosed(self.object.to_string()));
        }

        let end = offset
            .checked_add(length)
            .filter(|end| *end <= self.size)
            .ok_or(FederationError::OutOfRange {
                offset,
                length,
                size: self.size,
            })?;

        if length == 0 {
            return Ok(Bytes::new());
        }

        debug!(object = %self.object, %offset, %length, "remote range read");
        let bytes = self
            .handle
            .block_on(self.storage.get_range(&self.object, offset..end))?;

        if bytes.len() as u64 != length {
            return Err(FederationError::TransportError(
                format!(
                    "expected {length} bytes at offset {offset} from {}, got {}",
                    self.object,
                    bytes.len()
                )
                .into(),
            ));
        }

        Ok(bytes)
    }

    /// Writes are never permitted.
    pub fn write(&self, _offset: u64, _data: &[u8]) -> Result<()> {
        Err(FederationError::UnsupportedOperation(
            "remote block stores are read-only",
        ))
    }

    /// Release the store. Calling this more than once is a no-op.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(object = %self.object, "closed remote block store");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for RemoteBlockStore {
    fn drop(&mut self) {
        self.close();
    }
}
