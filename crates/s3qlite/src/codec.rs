//! Translation between SQLite results and Arrow IPC.
//!
//! Every column is carried as a nullable string column regardless of what type
//! it was declared with in SQLite. Consumers always receive stringified values.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Int32Array, StringArray, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rusqlite::types::Value;

use crate::connection::QueryRows;
use crate::errors::{FederationError, Result};

/// Portable column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
}

impl ColumnType {
    pub fn arrow_type(&self) -> DataType {
        match self {
            ColumnType::String => DataType::Utf8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDescriptor {
    pub fn string(name: impl Into<String>) -> Self {
        ColumnDescriptor {
            name: name.into(),
            column_type: ColumnType::String,
        }
    }
}

/// Ordered columns of a table. Column order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableSchema {
    pub columns: Vec<ColumnDescriptor>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        TableSchema { columns }
    }

    /// Schema with string columns for each of `names`, in order.
    pub fn from_names<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        TableSchema {
            columns: names.into_iter().map(ColumnDescriptor::string).collect(),
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn to_arrow(&self) -> Schema {
        Schema::new(
            self.columns
                .iter()
                .map(|c| Field::new(&c.name, c.column_type.arrow_type(), true))
                .collect::<Vec<_>>(),
        )
    }

    /// Build from an arrow schema. Field types are normalized to strings.
    pub fn from_arrow(schema: &Schema) -> Self {
        TableSchema::from_names(schema.fields().iter().map(|f| f.name().clone()))
    }
}

pub fn encode_schema(schema: &TableSchema) -> Result<Vec<u8>> {
    encode_stream(&schema.to_arrow(), None)
}

pub fn decode_schema(buf: &[u8]) -> Result<TableSchema> {
    let reader = StreamReader::try_new(buf, None)?;
    Ok(TableSchema::from_arrow(&reader.schema()))
}

/// Encode query rows as a single record batch of string columns.
///
/// The rows must have been produced by a projection over exactly the columns
/// of `schema`, in the same order.
pub fn encode_batch(schema: &TableSchema, rows: &QueryRows) -> Result<Vec<u8>> {
    let batch = rows_to_batch(schema, rows)?;
    encode_stream(&batch.schema(), Some(&batch))
}

/// Decode a record batch produced by `encode_batch`.
pub fn decode_batch(buf: &[u8]) -> Result<RecordBatch> {
    let reader = StreamReader::try_new(buf, None)?;
    let mut batches = reader.into_iter().collect::<Result<Vec<_>, _>>()?;
    if batches.len() != 1 {
        return Err(FederationError::SerializationError(format!(
            "expected exactly one record batch, got {}",
            batches.len()
        )));
    }
    Ok(batches.remove(0))
}

pub fn rows_to_batch(schema: &TableSchema, rows: &QueryRows) -> Result<RecordBatch> {
    if rows.columns.len() != schema.len() {
        return Err(FederationError::Internal(format!(
            "query returned {} columns, schema has {}",
            rows.columns.len(),
            schema.len()
        )));
    }

    let mut cols: Vec<ArrayRef> = Vec::with_capacity(schema.len());
    let mut buf = String::new();

    for col_idx in 0..schema.len() {
        // Assuming an average length of each string to be 10
        let mut builder = StringBuilder::with_capacity(rows.rows.len(), 10 * rows.rows.len());
        for row in rows.rows.iter() {
            let value = row.get(col_idx).ok_or_else(|| {
                FederationError::Internal(format!("missing data for column {col_idx}"))
            })?;
            if matches!(value, Value::Null) {
                builder.append_null();
            } else {
                buf.clear();
                encode_value(&mut buf, value).map_err(|e| {
                    FederationError::Internal(format!("failed to format value: {e}"))
                })?;
                builder.append_value(&buf);
            }
        }
        cols.push(Arc::new(builder.finish()));
    }

    Ok(RecordBatch::try_new(Arc::new(schema.to_arrow()), cols)?)
}

/// Write the text form of a non-null value.
fn encode_value(buf: &mut String, value: &Value) -> fmt::Result {
    match value {
        Value::Null => Ok(()),
        Value::Integer(i) => write!(buf, "{i}"),
        Value::Real(r) => write!(buf, "{r:?}"),
        Value::Text(t) => buf.write_str(t),
        Value::Blob(b) => {
            buf.write_str("\\x")?;
            b.iter().try_for_each(|byte| write!(buf, "{byte:02x}"))
        }
    }
}

/// Schema and batch for the single, unpartitioned table layout.
pub fn encode_layout_block() -> Result<(Vec<u8>, Vec<u8>)> {
    let schema = Arc::new(Schema::new(vec![Field::new(
        "partitionId",
        DataType::Int32,
        false,
    )]));
    let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(Int32Array::from(vec![1]))])?;

    let schema_buf = encode_stream(&schema, None)?;
    let batch_buf = encode_stream(&schema, Some(&batch))?;
    Ok((schema_buf, batch_buf))
}

fn encode_stream(schema: &Schema, batch: Option<&RecordBatch>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut buf, schema)?;
        if let Some(batch) = batch {
            writer.write(batch)?;
        }
        writer.finish()?;
    }
    Ok(buf)
}

/// Wrap binary for embedding in a JSON envelope.
pub fn to_base64(buf: &[u8]) -> String {
    STANDARD.encode(buf)
}

pub fn from_base64(s: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(s)?)
}

/// Values of a string column, `None` for nulls.
pub fn string_column(batch: &RecordBatch, idx: usize) -> Result<Vec<Option<String>>> {
    let col = batch
        .column(idx)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| {
            FederationError::SerializationError(format!("column {idx} is not a string column"))
        })?;
    Ok((0..col.len())
        .map(|i| (!col.is_null(i)).then(|| col.value(i).to_string()))
        .collect())
}
