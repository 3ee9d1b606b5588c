use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::LogicalCatalog;
use crate::codec::{self, TableSchema};
use crate::config::FederationConfig;
use crate::errors::Result;
use crate::protocol::{
    Block,
    EncodedSchema,
    FederationRequest,
    FederationResponse,
    GetSplitsRequest,
    GetSplitsResponse,
    GetTableLayoutRequest,
    GetTableLayoutResponse,
    GetTableRequest,
    GetTableResponse,
    ListSchemasRequest,
    ListSchemasResponse,
    ListTablesRequest,
    ListTablesResponse,
    PingRequest,
    PingResponse,
    ReadRecordsRequest,
    ReadRecordsResponse,
    RequestType,
    SpillLocation,
    Split,
    TableName,
};
use crate::storage::ObjectStorage;

/// Capability bits advertised in ping responses.
pub const CAPABILITIES: i32 = 23;

pub const SOURCE_TYPE: &str = "sqlite";

/// Maps protocol requests to responses.
///
/// Holds no state between requests. Every request that needs table data opens
/// and closes its own connection.
#[derive(Debug, Clone)]
pub struct FederationDispatcher {
    catalog: LogicalCatalog,
}

impl FederationDispatcher {
    pub fn new(storage: Arc<dyn ObjectStorage>, config: FederationConfig) -> Self {
        FederationDispatcher {
            catalog: LogicalCatalog::new(storage, config),
        }
    }

    pub fn catalog(&self) -> &LogicalCatalog {
        &self.catalog
    }

    fn config(&self) -> &FederationConfig {
        self.catalog.config()
    }

    /// Decode a JSON request envelope, dispatch it and encode the response.
    pub async fn dispatch_json(&self, request: Value) -> Result<Value> {
        let request = FederationRequest::from_json(request)?;
        let response = self.dispatch(request).await?;
        response.to_json()
    }

    pub async fn dispatch(&self, request: FederationRequest) -> Result<FederationResponse> {
        info!(
            request_type = ?request.request_type(),
            catalog = %request.catalog_name(),
            query_id = ?request.query_id(),
            table = ?request.table_name(),
            "handling federation request"
        );

        Ok(match request {
            FederationRequest::PingRequest(req) => {
                FederationResponse::PingResponse(self.ping(req))
            }
            FederationRequest::ListSchemasRequest(req) => {
                FederationResponse::ListSchemasResponse(self.list_schemas(req).await?)
            }
            FederationRequest::ListTablesRequest(req) => {
                FederationResponse::ListTablesResponse(self.list_tables(req).await?)
            }
            FederationRequest::GetTableRequest(req) => {
                FederationResponse::GetTableResponse(self.get_table(req).await?)
            }
            FederationRequest::GetTableLayoutRequest(req) => {
                FederationResponse::GetTableLayoutResponse(self.get_table_layout(req)?)
            }
            FederationRequest::GetSplitsRequest(req) => {
                FederationResponse::GetSplitsResponse(self.get_splits(req))
            }
            FederationRequest::ReadRecordsRequest(req) => {
                FederationResponse::ReadRecordsResponse(self.read_records(req).await?)
            }
        })
    }

    fn ping(&self, req: PingRequest) -> PingResponse {
        PingResponse {
            catalog_name: req.catalog_name,
            query_id: req.query_id,
            source_type: SOURCE_TYPE.to_string(),
            capabilities: CAPABILITIES,
            request_type: RequestType::Ping,
        }
    }

    async fn list_schemas(&self, req: ListSchemasRequest) -> Result<ListSchemasResponse> {
        let schemas = self.catalog.list_schemas().await?;
        Ok(ListSchemasResponse {
            catalog_name: req.catalog_name,
            schemas,
            request_type: RequestType::ListSchemas,
        })
    }

    async fn list_tables(&self, req: ListTablesRequest) -> Result<ListTablesResponse> {
        let tables = self
            .catalog
            .list_tables(&req.schema_name)
            .await?
            .into_iter()
            .map(|table| TableName::new(req.schema_name.clone(), table))
            .collect();

        Ok(ListTablesResponse {
            catalog_name: req.catalog_name,
            tables,
            next_token: None,
            request_type: RequestType::ListTables,
        })
    }

    async fn get_table(&self, req: GetTableRequest) -> Result<GetTableResponse> {
        let schema = self
            .catalog
            .get_table_schema(&req.table_name.schema_name, &req.table_name.table_name)
            .await?;
        let encoded = codec::to_base64(&codec::encode_schema(&schema)?);

        Ok(GetTableResponse {
            catalog_name: req.catalog_name,
            table_name: req.table_name,
            schema: EncodedSchema { schema: encoded },
            partition_columns: Vec::new(),
            request_type: RequestType::GetTable,
        })
    }

    fn get_table_layout(&self, req: GetTableLayoutRequest) -> Result<GetTableLayoutResponse> {
        let (schema, records) = codec::encode_layout_block()?;

        Ok(GetTableLayoutResponse {
            catalog_name: req.catalog_name,
            table_name: req.table_name,
            partitions: Block {
                a_id: Uuid::new_v4().to_string(),
                schema: codec::to_base64(&schema),
                records: codec::to_base64(&records),
            },
            request_type: RequestType::GetTableLayout,
        })
    }

    fn get_splits(&self, req: GetSplitsRequest) -> GetSplitsResponse {
        let config = self.config();
        let query_id = req
            .query_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let spill_prefix = config.spill_prefix.trim_matches('/');
        let key = format!("{spill_prefix}/{query_id}/{}", Uuid::new_v4());
        debug!(bucket = %config.spill_bucket(), %key, "spill location for split");

        GetSplitsResponse {
            catalog_name: req.catalog_name,
            table_name: req.table_name,
            splits: vec![Split {
                spill_location: SpillLocation::S3SpillLocation {
                    bucket: config.spill_bucket().to_string(),
                    key,
                    directory: true,
                },
                properties: BTreeMap::new(),
            }],
            continuation_token: None,
            request_type: RequestType::GetSplits,
        }
    }

    async fn read_records(&self, req: ReadRecordsRequest) -> Result<ReadRecordsResponse> {
        let schema_buf = codec::from_base64(&req.schema.schema)?;
        let schema: TableSchema = codec::decode_schema(&schema_buf)?;

        let rows = self
            .catalog
            .read_records(
                &req.table_name.schema_name,
                &req.table_name.table_name,
                &schema,
            )
            .await?;
        let records = codec::encode_batch(&schema, &rows)?;
        debug!(rows = rows.rows.len(), bytes = records.len(), "encoded records");

        Ok(ReadRecordsResponse {
            catalog_name: req.catalog_name,
            table_name: req.table_name,
            records: Block {
                a_id: Uuid::new_v4().to_string(),
                schema: codec::to_base64(&codec::encode_schema(&schema)?),
                records: codec::to_base64(&records),
            },
            request_type: RequestType::ReadRecords,
        })
    }
}
