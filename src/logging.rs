//! Tracing subscriber setup: colored stdout plus a JSON log file rolled daily.
//!
//! Each module logs under its own target (`empire_state::mta`,
//! `empire_state::weather`, ...), which names the source of every line.

use anyhow::Result;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub const LOG_FILE_PREFIX: &str = "empire_state";

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Installs the global subscriber, writing `<logs_dir>/empire_state.<date>.log`.
///
/// Only the first call does anything; it returns the guard that flushes the
/// file writer on drop, which the caller must keep alive. Later calls return
/// `None`.
pub fn init_logging(logs_dir: &Path) -> Result<Option<WorkerGuard>> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(None);
    }

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(logs_dir)?;
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let stdout_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stdout)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive(LevelFilter::INFO.into()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive(LevelFilter::DEBUG.into()));

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(json_layer)
        .try_init()?;

    Ok(Some(guard))
}
