//! Forkguard stops fork bombs as they happen.
//!
//! Every new process is compared with its ancestor a few generations up: when
//! both run the same program and the ancestor was born less than a threshold
//! before, the new process is terminated. The detection pipeline lives in
//! [`forkguard_core`], process creations are observed by the
//! [`process_monitor`] module and decisions are reported by the
//! [`threat_logger`] module.
//!
//! ```sh
//! # Detect and terminate
//! forkguard
//!
//! # Only report, with a tighter threshold
//! forkguard --dry-run --min-interval-ns 500000000
//! ```

pub mod cli;
pub mod daemon;
pub mod utils;

/// Init logger. We log from info level and above.
/// If RUST_LOG is set, we assume the user wants to debug something
/// and use env_logger default behaviour.
pub fn init_logger(override_log_level: Option<log::LevelFilter>) {
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::init();
    } else {
        let level_filter = override_log_level.unwrap_or(log::LevelFilter::Info);

        env_logger::builder().filter_level(level_filter).init();
    }
}
