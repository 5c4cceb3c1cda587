//! Logger setup and message tracing
//!
//! The config `syslog` flag selects the default level: `info` when set,
//! `error` otherwise. `RUST_LOG` overrides either.

use log::{debug, LevelFilter};

use crate::dispatcher::Reply;

/// Default filter for the logging flag
pub fn default_filter(enabled: bool) -> LevelFilter {
    if enabled {
        LevelFilter::Info
    } else {
        LevelFilter::Error
    }
}

/// Install the global logger
///
/// Returns false when a logger was already installed, which is harmless.
pub fn init(enabled: bool) -> bool {
    let level = default_filter(enabled).to_string().to_lowercase();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .try_init()
        .is_ok()
}

/// Log one bus exchange at debug level
pub fn log_exchange(mode: &str, payload: &[u8], reply: &Reply) {
    debug!(
        "recv [{}] {} -> send [{}] {}",
        mode,
        String::from_utf8_lossy(payload),
        reply.function_code,
        reply.response.to_json()
    );
}
