//! Utilities for logging.

use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    HumanReadable,
    Json,
}

fn env_filter(default_level: Level) -> EnvFilter {
    // RUST_LOG takes precedence over the default level.
    EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy()
}

/// Configure the global tracing subscriber.
///
/// Does nothing if a global subscriber has already been set.
pub fn configure_global_logger<W>(default_level: Level, format: LogFormat, make_writer: W)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let builder = FmtSubscriber::builder()
        .with_env_filter(env_filter(default_level))
        .with_writer(make_writer);

    let result = match format {
        LogFormat::HumanReadable => {
            let subscriber = builder
                .with_file(true)
                .with_line_number(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        LogFormat::Json => {
            let subscriber = builder.json().with_current_span(false).finish();
            tracing::subscriber::set_global_default(subscriber)
        }
    };

    if let Err(e) = result {
        eprintln!("Failed to set global logger: {e}");
    }
}

/// Logger for tests. Output is captured by the test harness.
///
/// Safe to call from every test, only the first call installs anything.
pub fn init_test() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter(Level::DEBUG))
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
