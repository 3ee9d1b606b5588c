use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Read of {length} bytes at offset {offset} is out of range for object of size {size}")]
    OutOfRange { offset: u64, length: u64, size: u64 },

    #[error("Transport error: {0}")]
    TransportError(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("Unsupported request type: {0}")]
    UnsupportedRequest(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Query error: {0}")]
    QueryError(#[from] rusqlite::Error),

    #[error("Store for '{0}' has already been closed")]
    StoreClosed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FederationError {
    /// Short, stable name for the error variant.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::OutOfRange { .. } => "OutOfRange",
            Self::TransportError(_) => "TransportError",
            Self::UnsupportedOperation(_) => "UnsupportedOperation",
            Self::UnsupportedRequest(_) => "UnsupportedRequest",
            Self::SerializationError(_) => "SerializationError",
            Self::QueryError(_) => "QueryError",
            Self::StoreClosed(_) => "StoreClosed",
            Self::Internal(_) => "Internal",
        }
    }

    /// Error envelope reported back to the invoking caller.
    pub fn to_envelope(&self) -> serde_json::Value {
        json!({
            "@type": "FederationError",
            "errorType": self.error_type(),
            "errorMessage": self.to_string(),
        })
    }
}

impl From<object_store::Error> for FederationError {
    fn from(value: object_store::Error) -> Self {
        match value {
            object_store::Error::NotFound { path, .. } => FederationError::NotFound(path),
            other => FederationError::TransportError(Box::new(other)),
        }
    }
}

impl From<arrow::error::ArrowError> for FederationError {
    fn from(value: arrow::error::ArrowError) -> Self {
        FederationError::SerializationError(value.to_string())
    }
}

impl From<serde_json::Error> for FederationError {
    fn from(value: serde_json::Error) -> Self {
        FederationError::SerializationError(value.to_string())
    }
}

impl From<base64::DecodeError> for FederationError {
    fn from(value: base64::DecodeError) -> Self {
        FederationError::SerializationError(format!("invalid base64: {value}"))
    }
}

pub type Result<T, E = FederationError> = std::result::Result<T, E>;
