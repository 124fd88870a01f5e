//! Logging infrastructure
//!
//! This module provides logging via the `log` crate. The firmware hands us a
//! console sink (serial port, cbmem console, framebuffer...) and every record
//! is formatted as `[LEVEL] target: message` and passed to it.

use core::fmt;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

/// Console sink receiving one formatted log line per call
pub type ConsoleSink = fn(fmt::Arguments<'_>);

/// Sink installed by [`init`]
static SINK: spin::Once<ConsoleSink> = spin::Once::new();

/// Console logger implementation
struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let Some(sink) = SINK.get() else {
            return;
        };

        let level_str = match record.level() {
            Level::Error => "\x1b[31mERROR\x1b[0m",
            Level::Warn => "\x1b[33mWARN\x1b[0m ",
            Level::Info => "\x1b[32mINFO\x1b[0m ",
            Level::Debug => "\x1b[34mDEBUG\x1b[0m",
            Level::Trace => "\x1b[35mTRACE\x1b[0m",
        };

        // Format: [LEVEL] target: message
        sink(format_args!(
            "[{}] {}: {}",
            level_str,
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

/// Initialize the logging subsystem
///
/// Fails if another logger has already been registered with the `log` crate.
/// The sink is only installed once; later calls keep the first sink.
pub fn init(sink: ConsoleSink, level: LevelFilter) -> Result<(), SetLoggerError> {
    SINK.call_once(|| sink);
    log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}

/// Set the maximum log level
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}
