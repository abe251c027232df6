//! Process-wide env_logger setup: one coloured line per record.

use env_logger::{Builder, Env};
use log::{info, Level};
use std::io::Write;

pub const RESET: &str = "\x1B[0m";

/// ANSI colour used for a level tag, and by the request logger for status codes.
pub fn level_colour(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1B[1;31m",
        Level::Warn => "\x1B[1;33m",
        Level::Info => "\x1B[1;32m",
        Level::Debug => "\x1B[1;36m",
        Level::Trace => "\x1B[1;35m",
    }
}

/// `RUST_LOG` overrides the `info` default. Later calls are no-ops.
pub fn setup_logger() {
    let installed = Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {}{:<5}{} {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                level_colour(record.level()),
                record.level(),
                RESET,
                record.target(),
                record.args()
            )
        })
        .try_init()
        .is_ok();

    if installed {
        info!("Logging at {} and below", log::max_level());
    }
}
