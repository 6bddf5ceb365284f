//! Logging setup and per-module gated logging macros.
//!
//! Chatty modules (detection, sessions) declare a module-level switch and use
//! the macros below so their per-element traces can be silenced without
//! touching `RUST_LOG`:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_debug, log_info};
//!
//! log_info!("scan found {} candidates", n);
//! ```

use std::sync::Once;

static INIT: Once = Once::new();

/// Install the `env_logger` backend once. Reads `RUST_LOG`, defaults to info.
pub fn init_logging() {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(log::LevelFilter::Info);
        builder.parse_default_env();
        // Tests and embedders may already have a logger installed.
        let _ = builder.try_init();
    });
}

/// Debug-level log gated on the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// Info-level log gated on the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Warn-level log gated on the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Error-level log gated on the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
