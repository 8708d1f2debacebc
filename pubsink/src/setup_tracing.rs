use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::PanicHookInfo;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, filter::EnvFilter, fmt};

const ENV_DEBUG: &str = "PUBSINK_DEBUG";

/// Logs panics through `tracing` with the panic location as a field, so they end up in the
/// same JSON stream as every other log line.
fn report_panic(panic_info: &PanicHookInfo<'_>) {
    let payload = panic_info
        .payload()
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<String>()
                .map(String::as_str)
        })
        .unwrap_or("non-string panic payload");
    let location = panic_info
        .location()
        .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
        .unwrap_or_default();

    // only captured when RUST_BACKTRACE or RUST_LIB_BACKTRACE is set
    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        tracing::error!(%location, %backtrace, "Panicked: {payload}");
    } else {
        tracing::error!(%location, "Panicked: {payload}");
    }
}

/// Whether PUBSINK_DEBUG asks for debug logs in text format.
fn debug_mode(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Installs the global subscriber. RUST_LOG overrides the default level, which is `info`,
/// or `debug` in debug mode. Output is flattened JSON unless in debug mode.
pub fn register() {
    let debug_mode = debug_mode(std::env::var(ENV_DEBUG).ok().as_deref());
    let default_level = if debug_mode { Level::DEBUG } else { Level::INFO };

    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let layer = if debug_mode {
        fmt::layer().boxed()
    } else {
        fmt::layer()
            .with_ansi(false)
            .json()
            .flatten_event(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .init();

    std::panic::set_hook(Box::new(report_panic));
}
