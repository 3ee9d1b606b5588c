use std::collections::HashMap;
use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use object_store::path::Path as ObjectStorePath;
use object_store::ObjectStore;
use tracing::{debug, trace};

use crate::block_store::RemoteObjectRef;
use crate::errors::{FederationError, Result};

/// One page of a single-level listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Full keys of the objects directly under the listed prefix.
    pub keys: Vec<String>,
    /// Token to pass to the next `list_page` call. `None` once the listing is
    /// exhausted.
    pub continuation: Option<String>,
}

/// Read access to remote object storage.
///
/// Implementations are injected by the host and shared across requests. None
/// of the methods retry; every failure is returned to the caller as is.
pub trait ObjectStorage: Sync + Send + Debug {
    /// Total size in bytes of an object. Errors with `NotFound` if the object
    /// does not exist.
    fn head<'a>(&'a self, object: &'a RemoteObjectRef) -> BoxFuture<'a, Result<u64>>;

    /// Fetch a byte range of an object.
    fn get_range<'a>(
        &'a self,
        object: &'a RemoteObjectRef,
        range: Range<u64>,
    ) -> BoxFuture<'a, Result<Bytes>>;

    /// List objects directly under `prefix`, using `/` as the delimiter.
    fn list_page<'a>(
        &'a self,
        container: &'a str,
        prefix: &'a str,
        continuation: Option<String>,
    ) -> BoxFuture<'a, Result<ListPage>>;
}

/// Object storage backed by `object_store` clients, one per container.
#[derive(Debug, Default, Clone)]
pub struct ObjectStoreStorage {
    stores: HashMap<String, Arc<dyn ObjectStore>>,
}

impl ObjectStoreStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the client used for objects in `container`.
    pub fn with_store(mut self, container: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.stores.insert(container.into(), store);
        self
    }

    fn store(&self, container: &str) -> Result<&Arc<dyn ObjectStore>> {
        self.stores.get(container).ok_or_else(|| {
            FederationError::NotFound(format!("no object store configured for '{container}'"))
        })
    }
}

impl ObjectStorage for ObjectStoreStorage {
    fn head<'a>(&'a self, object: &'a RemoteObjectRef) -> BoxFuture<'a, Result<u64>> {
        async move {
            let store = self.store(object.container())?;
            let meta = store.head(&ObjectStorePath::from(object.key())).await?;
            debug!(%object, size = meta.size, "object head");
            Ok(meta.size as u64)
        }
        .boxed()
    }

    fn get_range<'a>(
        &'a self,
        object: &'a RemoteObjectRef,
        range: Range<u64>,
    ) -> BoxFuture<'a, Result<Bytes>> {
        async move {
            let store = self.store(object.container())?;
            let range = usize::try_from(range.start).map_err(range_err)?
                ..usize::try_from(range.end).map_err(range_err)?;
            let bytes = store
                .get_range(&ObjectStorePath::from(object.key()), range)
                .await?;
            Ok(bytes)
        }
        .boxed()
    }

    fn list_page<'a>(
        &'a self,
        container: &'a str,
        prefix: &'a str,
        continuation: Option<String>,
    ) -> BoxFuture<'a, Result<ListPage>> {
        async move {
            // `list_with_delimiter` already follows the service's continuation
            // tokens, so everything arrives in a single page.
            if continuation.is_some() {
                return Ok(ListPage::default());
            }

            let store = self.store(container)?;
            let prefix = if prefix.is_empty() {
                None
            } else {
                Some(ObjectStorePath::from(prefix))
            };
            let result = store.list_with_delimiter(prefix.as_ref()).await?;
            trace!(
                ?prefix,
                objects = result.objects.len(),
                common_prefixes = result.common_prefixes.len(),
                "listed objects"
            );

            Ok(ListPage {
                keys: result
                    .objects
                    .into_iter()
                    .map(|meta| meta.location.to_string())
                    .collect(),
                continuation: None,
            })
        }
        .boxed()
    }
}

fn range_err(err: std::num::TryFromIntError) -> FederationError {
    FederationError::Internal(format!("range does not fit in memory: {err}"))
}
