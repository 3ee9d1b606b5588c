//! JSON envelopes of the federated query protocol.
//!
//! Every envelope is an object discriminated by its `@type` field with
//! camelCase field names. Fields the protocol sends that we don't use
//! (identity, constraints, block size hints) are ignored on decode.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{FederationError, Result};

/// Fully qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableName {
    pub schema_name: String,
    pub table_name: String,
}

impl TableName {
    pub fn new(schema_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        TableName {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    Ping,
    ListSchemas,
    ListTables,
    GetTable,
    GetTableLayout,
    GetSplits,
    ReadRecords,
}

/// Base64 wrapped Arrow IPC schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedSchema {
    pub schema: String,
}

/// An encoded schema and record batch pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub a_id: String,
    pub schema: String,
    pub records: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum SpillLocation {
    S3SpillLocation {
        bucket: String,
        key: String,
        directory: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    pub spill_location: SpillLocation,
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingRequest {
    pub catalog_name: String,
    pub query_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSchemasRequest {
    pub catalog_name: String,
    #[serde(default)]
    pub query_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTablesRequest {
    pub catalog_name: String,
    pub schema_name: String,
    #[serde(default)]
    pub query_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTableRequest {
    pub catalog_name: String,
    pub table_name: TableName,
    #[serde(default)]
    pub query_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTableLayoutRequest {
    pub catalog_name: String,
    pub table_name: TableName,
    #[serde(default)]
    pub query_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSplitsRequest {
    pub catalog_name: String,
    pub table_name: TableName,
    #[serde(default)]
    pub query_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRecordsRequest {
    pub catalog_name: String,
    pub table_name: TableName,
    pub schema: EncodedSchema,
    #[serde(default)]
    pub query_id: Option<String>,
}

/// A single protocol request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum FederationRequest {
    PingRequest(PingRequest),
    ListSchemasRequest(ListSchemasRequest),
    ListTablesRequest(ListTablesRequest),
    GetTableRequest(GetTableRequest),
    GetTableLayoutRequest(GetTableLayoutRequest),
    GetSplitsRequest(GetSplitsRequest),
    ReadRecordsRequest(ReadRecordsRequest),
}

impl FederationRequest {
    const KNOWN_TYPES: &'static [&'static str] = &[
        "PingRequest",
        "ListSchemasRequest",
        "ListTablesRequest",
        "GetTableRequest",
        "GetTableLayoutRequest",
        "GetSplitsRequest",
        "ReadRecordsRequest",
    ];

    /// Decode a request envelope.
    ///
    /// The discriminant is checked before anything else so that an unknown
    /// request is reported as such rather than as a decoding failure.
    pub fn from_json(value: Value) -> Result<Self> {
        let tag = match value.get("@type") {
            Some(Value::String(tag)) => tag.as_str(),
            Some(other) => return Err(FederationError::UnsupportedRequest(other.to_string())),
            None => {
                return Err(FederationError::UnsupportedRequest(
                    "<missing @type>".to_string(),
                ));
            }
        };

        if !Self::KNOWN_TYPES.contains(&tag) {
            return Err(FederationError::UnsupportedRequest(tag.to_string()));
        }

        Ok(serde_json::from_value(value)?)
    }

    pub fn request_type(&self) -> RequestType {
        match self {
            FederationRequest::PingRequest(_) => RequestType::Ping,
            FederationRequest::ListSchemasRequest(_) => RequestType::ListSchemas,
            FederationRequest::ListTablesRequest(_) => RequestType::ListTables,
            FederationRequest::GetTableRequest(_) => RequestType::GetTable,
            FederationRequest::GetTableLayoutRequest(_) => RequestType::GetTableLayout,
            FederationRequest::GetSplitsRequest(_) => RequestType::GetSplits,
            FederationRequest::ReadRecordsRequest(_) => RequestType::ReadRecords,
        }
    }

    pub fn catalog_name(&self) -> &str {
        match self {
            FederationRequest::PingRequest(r) => &r.catalog_name,
            FederationRequest::ListSchemasRequest(r) => &r.catalog_name,
            FederationRequest::ListTablesRequest(r) => &r.catalog_name,
            FederationRequest::GetTableRequest(r) => &r.catalog_name,
            FederationRequest::GetTableLayoutRequest(r) => &r.catalog_name,
            FederationRequest::GetSplitsRequest(r) => &r.catalog_name,
            FederationRequest::ReadRecordsRequest(r) => &r.catalog_name,
        }
    }

    pub fn query_id(&self) -> Option<&str> {
        match self {
            FederationRequest::PingRequest(r) => Some(&r.query_id),
            FederationRequest::ListSchemasRequest(r) => r.query_id.as_deref(),
            FederationRequest::ListTablesRequest(r) => r.query_id.as_deref(),
            FederationRequest::GetTableRequest(r) => r.query_id.as_deref(),
            FederationRequest::GetTableLayoutRequest(r) => r.query_id.as_deref(),
            FederationRequest::GetSplitsRequest(r) => r.query_id.as_deref(),
            FederationRequest::ReadRecordsRequest(r) => r.query_id.as_deref(),
        }
    }

    pub fn table_name(&self) -> Option<&TableName> {
        match self {
            FederationRequest::PingRequest(_)
            | FederationRequest::ListSchemasRequest(_)
            | FederationRequest::ListTablesRequest(_) => None,
            FederationRequest::GetTableRequest(r) => Some(&r.table_name),
            FederationRequest::GetTableLayoutRequest(r) => Some(&r.table_name),
            FederationRequest::GetSplitsRequest(r) => Some(&r.table_name),
            FederationRequest::ReadRecordsRequest(r) => Some(&r.table_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    pub catalog_name: String,
    pub query_id: String,
    pub source_type: String,
    pub capabilities: i32,
    pub request_type: RequestType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSchemasResponse {
    pub catalog_name: String,
    pub schemas: Vec<String>,
    pub request_type: RequestType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTablesResponse {
    pub catalog_name: String,
    pub tables: Vec<TableName>,
    pub next_token: Option<String>,
    pub request_type: RequestType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTableResponse {
    pub catalog_name: String,
    pub table_name: TableName,
    pub schema: EncodedSchema,
    pub partition_columns: Vec<String>,
    pub request_type: RequestType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTableLayoutResponse {
    pub catalog_name: String,
    pub table_name: TableName,
    pub partitions: Block,
    pub request_type: RequestType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSplitsResponse {
    pub catalog_name: String,
    pub table_name: TableName,
    pub splits: Vec<Split>,
    pub continuation_token: Option<String>,
    pub request_type: RequestType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRecordsResponse {
    pub catalog_name: String,
    pub table_name: TableName,
    pub records: Block,
    pub request_type: RequestType,
}

/// Response to a `FederationRequest`. Each request variant has exactly one
/// response variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum FederationResponse {
    PingResponse(PingResponse),
    ListSchemasResponse(ListSchemasResponse),
    ListTablesResponse(ListTablesResponse),
    GetTableResponse(GetTableResponse),
    GetTableLayoutResponse(GetTableLayoutResponse),
    GetSplitsResponse(GetSplitsResponse),
    ReadRecordsResponse(ReadRecordsResponse),
}

impl FederationResponse {
    pub fn request_type(&self) -> RequestType {
        match self {
            FederationResponse::PingResponse(r) => r.request_type,
            FederationResponse::ListSchemasResponse(r) => r.request_type,
            FederationResponse::ListTablesResponse(r) => r.request_type,
            FederationResponse::GetTableResponse(r) => r.request_type,
            FederationResponse::GetTableLayoutResponse(r) => r.request_type,
            FederationResponse::GetSplitsResponse(r) => r.request_type,
            FederationResponse::ReadRecordsResponse(r) => r.request_type,
        }
    }

    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
