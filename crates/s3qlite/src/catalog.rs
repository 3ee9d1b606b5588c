use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, trace};

use crate::block_store::RemoteObjectRef;
use crate::codec::TableSchema;
use crate::config::FederationConfig;
use crate::connection::{QueryRows, RemoteConnection};
use crate::errors::{FederationError, Result};
use crate::storage::ObjectStorage;

const LIST_TABLES_SQL: &str = "SELECT name FROM sqlite_master \
     WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
     ORDER BY name";

const TABLE_COLUMNS_SQL: &str = "SELECT name FROM pragma_table_info(?1) ORDER BY cid";

/// Logical databases and tables derived from the objects under the configured
/// prefix.
///
/// Nothing is cached, every call goes back to remote storage.
#[derive(Debug, Clone)]
pub struct LogicalCatalog {
    storage: Arc<dyn ObjectStorage>,
    config: FederationConfig,
}

impl LogicalCatalog {
    pub fn new(storage: Arc<dyn ObjectStorage>, config: FederationConfig) -> Self {
        LogicalCatalog { storage, config }
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    /// Names of all logical databases, sorted.
    pub async fn list_schemas(&self) -> Result<Vec<String>> {
        let prefix = self.config.normalized_prefix();
        let mut names = BTreeSet::new();
        let mut continuation = None;

        loop {
            let page = self
                .storage
                .list_page(&self.config.bucket, prefix, continuation)
                .await?;
            trace!(keys = page.keys.len(), has_more = page.continuation.is_some(), "listing page");

            names.extend(
                page.keys
                    .iter()
                    .filter_map(|key| self.config.schema_name_for_key(key))
                    .map(String::from),
            );

            match page.continuation {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        debug!(bucket = %self.config.bucket, %prefix, schemas = names.len(), "listed schemas");
        Ok(names.into_iter().collect())
    }

    /// Names of the tables in a logical database, sorted.
    pub async fn list_tables(&self, schema_name: &str) -> Result<Vec<String>> {
        self.with_connection(schema_name, |conn| conn.query_column(LIST_TABLES_SQL, []))
            .await
    }

    /// Columns of a table in declaration order, all typed as strings.
    pub async fn get_table_schema(&self, schema_name: &str, table_name: &str) -> Result<TableSchema> {
        let table = table_name.to_string();
        let columns = self
            .with_connection(schema_name, move |conn| {
                conn.query_column(TABLE_COLUMNS_SQL, [table.as_str()])
            })
            .await?;

        if columns.is_empty() {
            return Err(FederationError::NotFound(format!(
                "table '{schema_name}.{table_name}'"
            )));
        }

        Ok(TableSchema::from_names(columns))
    }

    /// Read every row of a table, projecting exactly the columns of `schema`
    /// in order.
    pub async fn read_records(
        &self,
        schema_name: &str,
        table_name: &str,
        schema: &TableSchema,
    ) -> Result<QueryRows> {
        let sql = projection_sql(table_name, schema)?;
        let table = table_name.to_string();
        let requested: Vec<String> = schema.column_names().map(String::from).collect();

        self.with_connection(schema_name, move |conn| {
            // SQLite falls back to treating an unknown double-quoted
            // identifier as a string literal, so check names up front.
            let columns = conn.query_column(TABLE_COLUMNS_SQL, [table.as_str()])?;
            if !columns.is_empty() {
                if let Some(missing) = requested
                    .iter()
                    .find(|name| !columns.iter().any(|c| c.eq_ignore_ascii_case(name)))
                {
                    return Err(FederationError::QueryError(
                        rusqlite::Error::InvalidColumnName(missing.clone()),
                    ));
                }
            }
            // An unknown table leaves `columns` empty and SQLite reports it
            // from the projection.
            conn.query_all(&sql)
        })
        .await
    }

    /// Run `f` against a connection to a logical database on a blocking
    /// thread. The connection is closed before this returns, whether or not
    /// `f` succeeded.
    async fn with_connection<F, T>(&self, schema_name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&RemoteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let storage = self.storage.clone();
        let object: RemoteObjectRef = self.config.database_ref(schema_name);
        let handle = Handle::current();

        tokio::task::spawn_blocking(move || {
            let conn = RemoteConnection::open(storage, object, handle)?;
            f(&conn)
        })
        .await
        .map_err(|e| FederationError::Internal(format!("blocking task failed: {e}")))?
    }
}

/// `SELECT "a", "b" FROM "table"` with the columns of `schema`.
pub fn projection_sql(table_name: &str, schema: &TableSchema) -> Result<String> {
    if schema.is_empty() {
        return Err(FederationError::Internal(format!(
            "no columns requested from table '{table_name}'"
        )));
    }

    let columns = schema
        .column_names()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("SELECT {columns} FROM {}", quote_ident(table_name)))
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
