//! Process-wide log level control for embedders that do not install their own
//! `tracing` subscriber.

use std::sync::OnceLock;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, Registry};

use crate::error::{AdapterError, Result};

type LevelHandle = reload::Handle<LevelFilter, Registry>;

/// `None` when another subscriber was already installed.
static LEVEL_HANDLE: OnceLock<Option<LevelHandle>> = OnceLock::new();

const DEFAULT_LEVEL: LevelFilter = LevelFilter::INFO;

/// Map a numeric level (0 trace, 1 debug, 2 info, 3 warn, 4 error, 5 critical,
/// 6 off) to a filter.
pub fn level_from_code(code: i32) -> Result<LevelFilter> {
    match code {
        0 => Ok(LevelFilter::TRACE),
        1 => Ok(LevelFilter::DEBUG),
        2 => Ok(LevelFilter::INFO),
        3 => Ok(LevelFilter::WARN),
        4 | 5 => Ok(LevelFilter::ERROR),
        6 => Ok(LevelFilter::OFF),
        other => Err(AdapterError::InvalidArgument(format!(
            "log level must be in 0..=6, got {other}"
        ))),
    }
}

fn level_handle() -> Option<&'static LevelHandle> {
    LEVEL_HANDLE
        .get_or_init(|| {
            let (filter, handle) = reload::Layer::new(DEFAULT_LEVEL);
            let installed = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true))
                .try_init()
                .is_ok();
            installed.then_some(handle)
        })
        .as_ref()
}

/// Change the log level. Installs the subscriber on first use.
pub fn set_log_level(code: i32) -> Result<()> {
    let level = level_from_code(code)?;
    match level_handle() {
        Some(handle) => handle
            .reload(level)
            .map_err(|e| AdapterError::Engine(format!("failed to reload log filter: {e}"))),
        None => {
            tracing::debug!(%level, "external subscriber installed, log level unchanged");
            Ok(())
        }
    }
}

/// Crate name and version.
pub fn version() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}
