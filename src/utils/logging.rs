//! Structured logging setup

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Output formats accepted by [`init_logging`]
pub const LOG_FORMATS: &[&str] = &["plain", "pretty", "json"];

/// Install the global subscriber, writing to stderr
///
/// Stdout is reserved for found blocks.
///
/// `level` is an `EnvFilter` directive (`info`, `stratum_pool=debug`, ...);
/// an unparsable directive falls back to `info`. Unknown formats log plain.
pub fn init_logging(level: &str, format: &str) {
    let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        "json" => {
            let fmt_layer = fmt::layer()
                .json()
                .with_target(false)
                .with_thread_ids(true)
                .with_current_span(true)
                .with_writer(std::io::stderr);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
        }
        "pretty" => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_writer(std::io::stderr);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
        }
        _ => {
            let fmt_layer = fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
        }
    }
}

/// Log a Stratum session event inside a `stratum_event` span
///
/// ```ignore
/// log_stratum_event!(tracing::Level::INFO, session_id, "Worker authorized", worker => name);
/// ```
#[macro_export]
macro_rules! log_stratum_event {
    ($level:expr, $session_id:expr, $event:expr $(, $key:ident => $value:expr)* $(,)?) => {{
        let span = tracing::span!(
            tracing::Level::INFO,
            "stratum_event",
            session_id = %$session_id
        );
        let _enter = span.enter();
        match $level {
            tracing::Level::ERROR => tracing::error!($($key = %$value,)* $event),
            tracing::Level::WARN => tracing::warn!($($key = %$value,)* $event),
            tracing::Level::INFO => tracing::info!($($key = %$value,)* $event),
            tracing::Level::DEBUG => tracing::debug!($($key = %$value,)* $event),
            _ => tracing::trace!($($key = %$value,)* $event),
        }
    }};
}
