use std::sync::Arc;

use object_store::memory::InMemory;
use object_store::path::Path as ObjectStorePath;
use object_store::{ObjectStore, PutPayload};
use s3qlite::{FederationConfig, FederationDispatcher, ObjectStoreStorage};

pub const BUCKET: &str = "athena-data";
pub const PREFIX: &str = "data";

pub const SAMPLE_DB: &str = "
    CREATE TABLE records (year INTEGER, month INTEGER);
    INSERT INTO records VALUES (2020, 1), (2020, 12), (2021, 6);
";

/// Bytes of a SQLite database created by running `sql`.
pub fn sqlite_db(sql: &str) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.sqlite");

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(sql).unwrap();
    conn.close().unwrap();

    std::fs::read(&path).unwrap()
}

/// Dispatcher over an in-memory bucket containing `objects`.
pub async fn dispatcher(objects: Vec<(&str, Vec<u8>)>) -> FederationDispatcher {
    logutil::init_test();

    let store = InMemory::new();
    for (key, data) in objects {
        store
            .put(&ObjectStorePath::from(key), PutPayload::from(data))
            .await
            .unwrap();
    }

    let storage = ObjectStoreStorage::new().with_store(BUCKET, Arc::new(store));
    FederationDispatcher::new(Arc::new(storage), FederationConfig::new(BUCKET, PREFIX))
}
