use std::path::PathBuf;
use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{Error as ObjectStoreError, ObjectStore};
use serde::{Deserialize, Serialize};

use crate::block_store::RemoteObjectRef;

pub const DEFAULT_SUFFIX: &str = ".sqlite";
pub const DEFAULT_SPILL_PREFIX: &str = "athena-spill";

/// Where logical databases live and where spill placeholders point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Container (bucket) holding the database files.
    pub bucket: String,
    /// Key prefix under which database files are listed. Leading and trailing
    /// delimiters are ignored.
    pub prefix: String,
    /// Fixed suffix appended to a schema name to form the object key.
    #[serde(default = "default_suffix")]
    pub suffix: String,
    /// Bucket named in split spill locations. Defaults to `bucket`.
    #[serde(default)]
    pub spill_bucket: Option<String>,
    #[serde(default = "default_spill_prefix")]
    pub spill_prefix: String,
}

fn default_suffix() -> String {
    DEFAULT_SUFFIX.to_string()
}

fn default_spill_prefix() -> String {
    DEFAULT_SPILL_PREFIX.to_string()
}

impl FederationConfig {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        FederationConfig {
            bucket: bucket.into(),
            prefix: prefix.into(),
            suffix: default_suffix(),
            spill_bucket: None,
            spill_prefix: default_spill_prefix(),
        }
    }

    /// The prefix with surrounding delimiters removed.
    pub fn normalized_prefix(&self) -> &str {
        self.prefix.trim_matches('/')
    }

    /// Maps a logical database (schema) name to the remote object holding it.
    pub fn database_ref(&self, schema_name: &str) -> RemoteObjectRef {
        let prefix = self.normalized_prefix();
        let key = if prefix.is_empty() {
            format!("{schema_name}{}", self.suffix)
        } else {
            format!("{prefix}/{schema_name}{}", self.suffix)
        };
        RemoteObjectRef::new(self.bucket.clone(), key)
    }

    /// Recovers a logical database name from an object key listed directly
    /// under the prefix.
    ///
    /// Returns `None` for keys outside the prefix, keys without the suffix, and
    /// keys nested more than one level below the prefix.
    pub fn schema_name_for_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        let prefix = self.normalized_prefix();
        let rest = if prefix.is_empty() {
            key
        } else {
            key.strip_prefix(prefix)?.strip_prefix('/')?
        };
        let name = rest.strip_suffix(self.suffix.as_str())?;
        if name.is_empty() || name.contains('/') {
            return None;
        }
        Some(name)
    }

    pub fn spill_bucket(&self) -> &str {
        self.spill_bucket.as_deref().unwrap_or(&self.bucket)
    }
}

/// Configuration options for the object stores we can read from.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageConfig {
    S3 {
        bucket: String,
        region: Option<String>,
        endpoint: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
    },
    Local {
        path: PathBuf,
    },
    Memory,
}

impl StorageConfig {
    /// Create a new object store using this config.
    ///
    /// S3 credentials not provided explicitly are resolved from the
    /// environment.
    pub fn new_object_store(&self) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
        Ok(match self {
            StorageConfig::S3 {
                bucket,
                region,
                endpoint,
                access_key_id,
                secret_access_key,
            } => {
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

                if let Some(region) = region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = endpoint {
                    if endpoint.starts_with("http://") {
                        builder = builder.with_allow_http(true);
                    }
                    builder = builder.with_endpoint(endpoint);
                }
                if let (Some(id), Some(secret)) = (access_key_id, secret_access_key) {
                    builder = builder
                        .with_access_key_id(id)
                        .with_secret_access_key(secret);
                }

                Arc::new(builder.build()?)
            }
            StorageConfig::Local { path } => Arc::new(LocalFileSystem::new_with_prefix(path)?),
            StorageConfig::Memory => Arc::new(InMemory::new()),
        })
    }
}
