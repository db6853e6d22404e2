//! Diagnostic sink
//!
//! Installed once at startup from [`LoggingConfig`]; every module logs
//! through `tracing` and never touches the sink directly.

#[cfg(feature = "tls")]
mod remote;

#[cfg(feature = "tls")]
pub use remote::RemoteSink;

use crate::config::{LogFormat, LogSink, LoggingConfig};
use std::fs::OpenOptions;
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Logging setup errors
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("The {0} sink needs a target")]
    MissingTarget(&'static str),

    #[error("Sink unavailable: {0}")]
    Unsupported(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to install subscriber: {0}")]
    Init(String),
}

/// Filter from `RUST_LOG`, falling back to the configured level
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| LoggingError::Filter(e.to_string()))?;

    if config.sink == LogSink::Remote {
        // The remote sink runs its own TLS session; its library logs must not loop back
        let quiet: Directive = "rustls=off"
            .parse()
            .map_err(|e| LoggingError::Filter(format!("{}", e)))?;
        return Ok(filter.add_directive(quiet));
    }
    Ok(filter)
}

/// Install the global subscriber
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    match config.sink {
        LogSink::Off => Ok(()),
        LogSink::Console => install(config, std::io::stderr, true),
        LogSink::File => {
            let path = config
                .file
                .as_deref()
                .ok_or(LoggingError::MissingTarget("file"))?;
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            install(config, Mutex::new(file), false)
        }
        LogSink::Remote => init_remote(config),
    }
}

#[cfg(feature = "tls")]
fn init_remote(config: &LoggingConfig) -> Result<(), LoggingError> {
    let addr = config
        .remote
        .as_deref()
        .ok_or(LoggingError::MissingTarget("remote"))?;
    let sink = RemoteSink::new(addr).map_err(|e| LoggingError::Init(e.to_string()))?;
    install(config, sink, false)
}

#[cfg(not(feature = "tls"))]
fn init_remote(_config: &LoggingConfig) -> Result<(), LoggingError> {
    Err(LoggingError::Unsupported("remote (built without tls)"))
}

fn install<W>(config: &LoggingConfig, writer: W, ansi: bool) -> Result<(), LoggingError>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let filter = build_filter(config)?;
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true);
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry.with(layer.json()).try_init(),
        LogFormat::Compact => registry.with(layer.compact()).try_init(),
        LogFormat::Pretty => registry.with(layer.pretty()).try_init(),
    }
    .map_err(|e| LoggingError::Init(e.to_string()))
}
