use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use s3qlite::config::DEFAULT_SPILL_PREFIX;
use s3qlite::{
    FederationConfig,
    FederationDispatcher,
    FederationError,
    ObjectStoreStorage,
    Result,
    StorageConfig,
};
use serde_json::Value;
use tracing::{Level, debug};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Human,
    Json,
}

impl From<LogFormatArg> for logutil::LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Human => logutil::LogFormat::HumanReadable,
            LogFormatArg::Json => logutil::LogFormat::Json,
        }
    }
}

#[derive(Parser)]
#[clap(name = "s3qlite_handler")]
struct Arguments {
    /// File containing the JSON request envelope. Reads stdin if omitted.
    #[clap(short, long)]
    input: Option<PathBuf>,

    /// Bucket holding the database files.
    #[clap(long, env = "TARGET_BUCKET")]
    bucket: String,

    /// Key prefix the database files are listed under.
    #[clap(long, env = "TARGET_PREFIX", default_value = "")]
    prefix: String,

    #[clap(long, env = "AWS_REGION")]
    region: Option<String>,

    /// Custom S3 endpoint, e.g. for MinIO.
    #[clap(long, env = "S3_ENDPOINT")]
    endpoint: Option<String>,

    /// Bucket named in spill locations. Defaults to the target bucket.
    #[clap(long, env = "SPILL_BUCKET")]
    spill_bucket: Option<String>,

    #[clap(long, env = "SPILL_PREFIX", default_value = DEFAULT_SPILL_PREFIX)]
    spill_prefix: String,

    /// Serve database files from this local directory instead of S3. Keys are
    /// resolved relative to it.
    #[clap(long)]
    local_root: Option<PathBuf>,

    #[clap(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    #[clap(long, value_enum, default_value_t = LogFormatArg::Human)]
    log_format: LogFormatArg,
}

/// Answers a single federation request and prints the response envelope.
fn main() {
    let args = Arguments::parse();
    logutil::configure_global_logger(args.log_level, args.log_format.into(), io::stderr);

    // Nested result. Outer result for the panic, inner is the request result.
    let result = std::panic::catch_unwind(|| {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| FederationError::Internal(format!("failed to build runtime: {e}")))?;
        runtime.block_on(inner(args))
    });

    match result {
        Ok(Ok(response)) => println!("{response}"),
        Ok(Err(err)) => {
            println!("{}", err.to_envelope());
            std::process::exit(1);
        }
        Err(err) => {
            println!("PANIC: {err:?}");
            std::process::exit(2);
        }
    }
}

async fn inner(args: Arguments) -> Result<Value> {
    let request = read_request(args.input.as_ref())?;

    let storage_conf = match &args.local_root {
        Some(path) => StorageConfig::Local { path: path.clone() },
        None => StorageConfig::S3 {
            bucket: args.bucket.clone(),
            region: args.region.clone(),
            endpoint: args.endpoint.clone(),
            access_key_id: None,
            secret_access_key: None,
        },
    };
    debug!(?storage_conf, "building object store");
    let store = storage_conf.new_object_store()?;
    let storage = ObjectStoreStorage::new().with_store(args.bucket.clone(), store);

    let mut conf = FederationConfig::new(args.bucket, args.prefix);
    conf.spill_bucket = args.spill_bucket;
    conf.spill_prefix = args.spill_prefix;

    let dispatcher = FederationDispatcher::new(Arc::new(storage), conf);
    dispatcher.dispatch_json(request).await
}

fn read_request(input: Option<&PathBuf>) -> Result<Value> {
    let buf = match input {
        Some(path) => fs::read_to_string(path).map_err(|e| {
            FederationError::Internal(format!("failed to read {}: {e}", path.display()))
        })?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| FederationError::Internal(format!("failed to read stdin: {e}")))?;
            buf
        }
    };
    Ok(serde_json::from_str(&buf)?)
}
