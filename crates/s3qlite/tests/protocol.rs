mod common;

use common::{SAMPLE_DB, dispatcher, sqlite_db};
use s3qlite::FederationError;
use s3qlite::codec::{self, TableSchema};
use serde_json::{Value, json};

fn decode_block_batch(block: &Value) -> arrow::record_batch::RecordBatch {
    let buf = codec::from_base64(block["records"].as_str().unwrap()).unwrap();
    codec::decode_batch(&buf).unwrap()
}

fn encoded_schema(names: &[&str]) -> String {
    codec::to_base64(&codec::encode_schema(&TableSchema::from_names(names.iter().copied())).unwrap())
}

#[tokio::test(flavor = "multi_thread")]
async fn ping() {
    let dispatcher = dispatcher(Vec::new()).await;
    let resp = dispatcher
        .dispatch_json(json!({
            "@type": "PingRequest",
            "identity": {"id": "UNKNOWN", "principal": "UNKNOWN", "account": "12345"},
            "catalogName": "s3qlite",
            "queryId": "7b2b96c9",
        }))
        .await
        .unwrap();

    assert_eq!(
        json!({
            "@type": "PingResponse",
            "catalogName": "s3qlite",
            "queryId": "7b2b96c9",
            "sourceType": "sqlite",
            "capabilities": 23,
            "requestType": "PING",
        }),
        resp
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn list_schemas() {
    let db = sqlite_db(SAMPLE_DB);
    let dispatcher = dispatcher(vec![
        ("data/sample.sqlite", db.clone()),
        ("data/archive/old.sqlite", db),
        ("data/notes.txt", b"not a database".to_vec()),
    ])
    .await;

    let resp = dispatcher
        .dispatch_json(json!({
            "@type": "ListSchemasRequest",
            "catalogName": "s3qlite",
            "queryId": "q",
        }))
        .await
        .unwrap();

    assert_eq!(json!(["sample"]), resp["schemas"]);
    assert_eq!("LIST_SCHEMAS", resp["requestType"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn list_schemas_nothing_under_prefix() {
    let dispatcher = dispatcher(vec![("elsewhere/sample.sqlite", sqlite_db(SAMPLE_DB))]).await;

    let resp = dispatcher
        .dispatch_json(json!({"@type": "ListSchemasRequest", "catalogName": "s3qlite"}))
        .await
        .unwrap();

    assert_eq!(json!([]), resp["schemas"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn list_tables() {
    let dispatcher = dispatcher(vec![("data/sample.sqlite", sqlite_db(SAMPLE_DB))]).await;

    let resp = dispatcher
        .dispatch_json(json!({
            "@type": "ListTablesRequest",
            "catalogName": "s3qlite",
            "schemaName": "sample",
            "nextToken": null,
            "pageSize": -1,
        }))
        .await
        .unwrap();

    assert_eq!(
        json!({
            "@type": "ListTablesResponse",
            "catalogName": "s3qlite",
            "tables": [{"schemaName": "sample", "tableName": "records"}],
            "nextToken": null,
            "requestType": "LIST_TABLES",
        }),
        resp
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn list_tables_missing_schema() {
    let dispatcher = dispatcher(vec![("data/sample.sqlite", sqlite_db(SAMPLE_DB))]).await;

    let err = dispatcher
        .dispatch_json(json!({
            "@type": "ListTablesRequest",
            "catalogName": "s3qlite",
            "schemaName": "missing",
        }))
        .await
        .unwrap_err();

    assert!(matches!(err, FederationError::NotFound(_)), "{err}");
    assert_eq!("NotFound", err.to_envelope()["errorType"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn get_table() {
    let dispatcher = dispatcher(vec![("data/sample.sqlite", sqlite_db(SAMPLE_DB))]).await;

    let resp = dispatcher
        .dispatch_json(json!({
            "@type": "GetTableRequest",
            "catalogName": "s3qlite",
            "tableName": {"schemaName": "sample", "tableName": "records"},
        }))
        .await
        .unwrap();

    assert_eq!("GetTableResponse", resp["@type"]);
    assert_eq!("GET_TABLE", resp["requestType"]);
    assert_eq!(
        json!({"schemaName": "sample", "tableName": "records"}),
        resp["tableName"]
    );
    assert_eq!(json!([]), resp["partitionColumns"]);

    let buf = codec::from_base64(resp["schema"]["schema"].as_str().unwrap()).unwrap();
    let schema = codec::decode_schema(&buf).unwrap();
    assert_eq!(TableSchema::from_names(["year", "month"]), schema);
    assert!(schema
        .columns
        .iter()
        .all(|c| c.column_type == codec::ColumnType::String));
}

#[tokio::test(flavor = "multi_thread")]
async fn get_table_missing_table() {
    let dispatcher = dispatcher(vec![("data/sample.sqlite", sqlite_db(SAMPLE_DB))]).await;

    let err = dispatcher
        .dispatch_json(json!({
            "@type": "GetTableRequest",
            "catalogName": "s3qlite",
            "tableName": {"schemaName": "sample", "tableName": "nope"},
        }))
        .await
        .unwrap_err();

    assert!(matches!(err, FederationError::NotFound(_)), "{err}");
}

#[tokio::test(flavor = "multi_thread")]
async fn get_table_layout_and_splits() {
    let dispatcher = dispatcher(vec![("data/sample.sqlite", sqlite_db(SAMPLE_DB))]).await;
    let table = json!({"schemaName": "sample", "tableName": "records"});

    let layout = dispatcher
        .dispatch_json(json!({
            "@type": "GetTableLayoutRequest",
            "catalogName": "s3qlite",
            "queryId": "q-1",
            "tableName": table,
            "constraints": {"summary": {}},
            "schema": {"schema": ""},
            "partitionCols": [],
        }))
        .await
        .unwrap();

    assert_eq!("GET_TABLE_LAYOUT", layout["requestType"]);
    let batch = decode_block_batch(&layout["partitions"]);
    assert_eq!(1, batch.num_rows());
    assert_eq!("partitionId", batch.schema().field(0).name());

    let splits = dispatcher
        .dispatch_json(json!({
            "@type": "GetSplitsRequest",
            "catalogName": "s3qlite",
            "queryId": "q-1",
            "tableName": table,
            "partitions": layout["partitions"],
            "partitionCols": [],
            "constraints": {"summary": {}},
            "continuationToken": null,
        }))
        .await
        .unwrap();

    assert_eq!("GET_SPLITS", splits["requestType"]);
    assert_eq!("s3qlite", splits["catalogName"]);
    assert_eq!(table, splits["tableName"]);
    assert_eq!(Value::Null, splits["continuationToken"]);
    let splits = splits["splits"].as_array().unwrap();
    assert_eq!(1, splits.len());

    let location = &splits[0]["spillLocation"];
    assert_eq!("S3SpillLocation", location["@type"]);
    assert_eq!(common::BUCKET, location["bucket"]);
    assert_eq!(true, location["directory"]);
    assert!(location["key"]
        .as_str()
        .unwrap()
        .starts_with("athena-spill/q-1/"));
    assert_eq!(json!({}), splits[0]["properties"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn read_records() {
    let dispatcher = dispatcher(vec![("data/sample.sqlite", sqlite_db(SAMPLE_DB))]).await;

    let resp = dispatcher
        .dispatch_json(json!({
            "@type": "ReadRecordsRequest",
            "catalogName": "s3qlite",
            "queryId": "q-1",
            "tableName": {"schemaName": "sample", "tableName": "records"},
            "schema": {"schema": encoded_schema(&["year", "month"])},
            "split": {"spillLocation": {}, "properties": {}},
            "maxBlockSize": 16000000,
            "maxInlineBlockSize": 5242880,
        }))
        .await
        .unwrap();

    assert_eq!("ReadRecordsResponse", resp["@type"]);
    assert_eq!("READ_RECORDS", resp["requestType"]);
    assert_eq!(
        json!({"schemaName": "sample", "tableName": "records"}),
        resp["tableName"]
    );

    let batch = decode_block_batch(&resp["records"]);
    assert_eq!(2, batch.num_columns());
    assert_eq!(3, batch.num_rows());

    let year = codec::string_column(&batch, 0).unwrap();
    let month = codec::string_column(&batch, 1).unwrap();
    let mut rows = year
        .into_iter()
        .zip(month)
        .map(|(y, m)| (y.unwrap(), m.unwrap()))
        .collect::<Vec<_>>();
    rows.sort();
    assert_eq!(
        vec![
            ("2020".to_string(), "1".to_string()),
            ("2020".to_string(), "12".to_string()),
            ("2021".to_string(), "6".to_string()),
        ],
        rows
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn read_records_column_order_follows_request() {
    let dispatcher = dispatcher(vec![(
        "data/wide.sqlite",
        sqlite_db(
            "CREATE TABLE t (a INTEGER, b TEXT, c REAL);
             INSERT INTO t VALUES (1, 'one', 1.5);",
        ),
    )])
    .await;

    let orders: [&[&str]; 6] = [
        &["a", "b", "c"],
        &["c", "b", "a"],
        &["b"],
        &["c", "a"],
        &["a", "a"],
        &["b", "c", "a"],
    ];

    for order in orders {
        let resp = dispatcher
            .dispatch_json(json!({
                "@type": "ReadRecordsRequest",
                "catalogName": "s3qlite",
                "tableName": {"schemaName": "wide", "tableName": "t"},
                "schema": {"schema": encoded_schema(order)},
            }))
            .await
            .unwrap();

        let batch = decode_block_batch(&resp["records"]);
        let got = batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect::<Vec<_>>();
        assert_eq!(order, got.as_slice(), "order: {order:?}");

        for (idx, name) in order.iter().enumerate() {
            let expected = match *name {
                "a" => "1",
                "b" => "one",
                _ => "1.5",
            };
            assert_eq!(
                vec![Some(expected.to_string())],
                codec::string_column(&batch, idx).unwrap(),
                "column {name}"
            );
        }
    }
}

/// Every ordering of every non-empty subset of `names`.
fn projections<'a>(names: &[&'a str]) -> Vec<Vec<&'a str>> {
    fn permute<'a>(prefix: &mut Vec<&'a str>, rest: &[&'a str], out: &mut Vec<Vec<&'a str>>) {
        if !prefix.is_empty() {
            out.push(prefix.clone());
        }
        for (idx, name) in rest.iter().enumerate() {
            let mut remaining = rest.to_vec();
            remaining.remove(idx);
            prefix.push(*name);
            permute(prefix, &remaining, out);
            prefix.pop();
        }
    }

    let mut out = Vec::new();
    permute(&mut Vec::new(), names, &mut out);
    out
}

#[tokio::test(flavor = "multi_thread")]
async fn read_records_every_projection() {
    let dispatcher = dispatcher(vec![(
        "data/sample.sqlite",
        sqlite_db(
            "CREATE TABLE records (year INTEGER, month INTEGER, someval TEXT);
             INSERT INTO records VALUES (2020, 1, 'a'), (2020, 12, NULL), (2021, 6, 'c');",
        ),
    )])
    .await;

    let expected = |name: &str| -> Vec<Option<String>> {
        let values: [Option<&str>; 3] = match name {
            "year" => [Some("2020"), Some("2020"), Some("2021")],
            "month" => [Some("1"), Some("12"), Some("6")],
            _ => [Some("a"), None, Some("c")],
        };
        values.iter().map(|v| v.map(String::from)).collect()
    };

    let projections = projections(&["year", "month", "someval"]);
    assert_eq!(15, projections.len());

    for order in projections {
        let resp = dispatcher
            .dispatch_json(json!({
                "@type": "ReadRecordsRequest",
                "catalogName": "s3qlite",
                "tableName": {"schemaName": "sample", "tableName": "records"},
                "schema": {"schema": encoded_schema(&order)},
            }))
            .await
            .unwrap();

        let batch = decode_block_batch(&resp["records"]);
        let got = batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect::<Vec<_>>();
        assert_eq!(order, got, "order: {order:?}");
        assert_eq!(3, batch.num_rows(), "order: {order:?}");

        for (idx, name) in order.iter().enumerate() {
            assert_eq!(
                expected(*name),
                codec::string_column(&batch, idx).unwrap(),
                "column {name} in {order:?}"
            );
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn read_records_unknown_column() {
    let dispatcher = dispatcher(vec![("data/sample.sqlite", sqlite_db(SAMPLE_DB))]).await;

    let err = dispatcher
        .dispatch_json(json!({
            "@type": "ReadRecordsRequest",
            "catalogName": "s3qlite",
            "tableName": {"schemaName": "sample", "tableName": "records"},
            "schema": {"schema": encoded_schema(&["year", "day"])},
        }))
        .await
        .unwrap_err();

    assert!(matches!(err, FederationError::QueryError(_)), "{err}");
    assert!(err.to_string().contains("day"), "{err}");
    assert_eq!("QueryError", err.to_envelope()["errorType"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_request_type() {
    let dispatcher = dispatcher(Vec::new()).await;

    let err = dispatcher
        .dispatch_json(json!({
            "@type": "UserDefinedFunctionRequest",
            "catalogName": "s3qlite",
        }))
        .await
        .unwrap_err();

    match &err {
        FederationError::UnsupportedRequest(tag) => assert_eq!("UserDefinedFunctionRequest", tag),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        json!({
            "@type": "FederationError",
            "errorType": "UnsupportedRequest",
            "errorMessage": err.to_string(),
        }),
        err.to_envelope()
    );
}
