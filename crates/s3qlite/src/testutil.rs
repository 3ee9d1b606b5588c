//! Fixtures shared by unit tests.

use std::sync::Arc;

use object_store::memory::InMemory;
use object_store::path::Path as ObjectStorePath;
use object_store::{ObjectStore, PutPayload};

use crate::storage::{ObjectStorage, ObjectStoreStorage};

pub const TEST_BUCKET: &str = "bucket";

/// Build a SQLite database file by running `sql` and return its bytes.
pub fn sqlite_fixture(sql: &str) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.sqlite");

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(sql).unwrap();
    conn.close().unwrap();

    std::fs::read(&path).unwrap()
}

/// In-memory object storage containing `objects` in `TEST_BUCKET`.
pub async fn memory_storage(objects: &[(&str, &[u8])]) -> Arc<dyn ObjectStorage> {
    logutil::init_test();

    let store = InMemory::new();
    for (key, data) in objects {
        store
            .put(&ObjectStorePath::from(*key), PutPayload::from(data.to_vec()))
            .await
            .unwrap();
    }
    Arc::new(ObjectStoreStorage::new().with_store(TEST_BUCKET, Arc::new(store)))
}
