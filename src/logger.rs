use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{SecondsFormat, Utc};
use log::{Level, LevelFilter, Metadata, Record};
use once_cell::sync::Lazy;

static GLOBAL_LOG_LEVEL: AtomicU8 = AtomicU8::new(level_to_u8(Level::Info));

static LOGGER: Lazy<StderrLogger> = Lazy::new(|| StderrLogger);

const fn level_to_u8(level: Level) -> u8 {
    match level {
        Level::Error => 1,
        Level::Warn => 2,
        Level::Info => 3,
        Level::Debug => 4,
        Level::Trace => 5,
    }
}

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        level_to_u8(metadata.level()) <= GLOBAL_LOG_LEVEL.load(Ordering::SeqCst)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "{timestamp} {:<5} [{}] {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

fn parse_level(value: &str) -> Option<Level> {
    match value.to_ascii_lowercase().as_str() {
        "error" => Some(Level::Error),
        "warn" | "warning" => Some(Level::Warn),
        "info" => Some(Level::Info),
        "debug" => Some(Level::Debug),
        "trace" | "verbose" => Some(Level::Trace),
        _ => None,
    }
}

pub fn set_level(level: Level) {
    GLOBAL_LOG_LEVEL.store(level_to_u8(level), Ordering::SeqCst);
    log::set_max_level(level.to_level_filter());
}

/// Installs the process-wide logger. The level comes from `EMBERSTORE_LOG`
/// (error/warn/info/debug/trace), defaulting to `info`. Safe to call more
/// than once; later calls only adjust the level.
pub fn init() {
    let level = std::env::var("EMBERSTORE_LOG")
        .ok()
        .and_then(|value| parse_level(&value))
        .unwrap_or(Level::Info);

    if log::set_logger(&*LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Trace);
    }
    set_level(level);
}
