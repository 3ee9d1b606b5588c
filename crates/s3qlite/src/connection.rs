use std::fmt;
use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, Params};
use tokio::runtime::Handle;
use tracing::debug;

use crate::block_store::{RemoteBlockStore, RemoteObjectRef};
use crate::errors::{FederationError, Result};
use crate::storage::ObjectStorage;
use crate::vfs::RegisteredVfs;

/// `immutable=1` tells SQLite the file can't change underneath it, so it skips
/// locking and journal probing entirely.
const REMOTE_DB_URI: &str = "file:remote.sqlite?immutable=1";

/// Rows collected from a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Read-only SQLite connection over a remote database file.
///
/// Everything acquired for the connection is released when this is dropped.
pub struct RemoteConnection {
    // Field order is drop order. The connection has to be closed before the VFS
    // it was opened through goes away.
    conn: Connection,
    vfs: RegisteredVfs,
    store: Arc<RemoteBlockStore>,
}

impl fmt::Debug for RemoteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteConnection({})", self.store.object())
    }
}

impl RemoteConnection {
    /// Open a connection to the database stored at `object`.
    ///
    /// Blocks the current thread. Errors with `NotFound` if the object doesn't
    /// exist.
    pub fn open(
        storage: Arc<dyn ObjectStorage>,
        object: RemoteObjectRef,
        handle: Handle,
    ) -> Result<Self> {
        let store = Arc::new(RemoteBlockStore::open(storage, object, handle)?);
        let vfs = RegisteredVfs::register(store.clone())?;

        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags_and_vfs(REMOTE_DB_URI, flags, vfs.name())
            .map_err(|e| vfs.take_error().unwrap_or(FederationError::QueryError(e)))?;

        debug!(object = %store.object(), vfs = %vfs.name(), "opened remote connection");

        Ok(RemoteConnection { conn, vfs, store })
    }

    pub fn object(&self) -> &RemoteObjectRef {
        self.store.object()
    }

    /// Collects and returns all the rows from the query.
    pub fn query_all(&self, sql: &str) -> Result<QueryRows> {
        debug!(object = %self.object(), %sql, "query all");

        let mut stmt = self.conn.prepare(sql).map_err(|e| self.query_error(e))?;

        let columns = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        let num_cols = columns.len();

        let rows = stmt
            .query([])
            .map_err(|e| self.query_error(e))?
            .mapped(|r| {
                (0..num_cols)
                    .map(|idx| {
                        let v = r.get_ref(idx)?;
                        Ok(Value::from(v))
                    })
                    .collect::<Result<Vec<_>, rusqlite::Error>>()
            })
            .collect::<Result<Vec<_>, rusqlite::Error>>()
            .map_err(|e| self.query_error(e))?;

        Ok(QueryRows { columns, rows })
    }

    /// Collects the first column of every row as text.
    pub fn query_column(&self, sql: &str, params: impl Params) -> Result<Vec<String>> {
        debug!(object = %self.object(), %sql, "query column");

        let mut stmt = self.conn.prepare(sql).map_err(|e| self.query_error(e))?;
        let values = stmt
            .query_map(params, |row| row.get::<_, String>(0))
            .map_err(|e| self.query_error(e))?
            .collect::<Result<Vec<_>, rusqlite::Error>>()
            .map_err(|e| self.query_error(e))?;

        Ok(values)
    }

    /// Prefer the storage error that made SQLite fail over SQLite's generic IO
    /// error.
    fn query_error(&self, err: rusqlite::Error) -> FederationError {
        self.vfs
            .take_error()
            .unwrap_or(FederationError::QueryError(err))
    }
}
