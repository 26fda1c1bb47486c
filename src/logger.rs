use ndjsonloggercore::{Atom, Entry, Level, StdoutOutputter, Value};

use crate::session::{LogLevel, Logger};

/// [`Logger`] writing NDJSON lines to stdout.
pub struct NdjsonLogger {
    min_level: LogLevel,
}

impl NdjsonLogger {
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }
}

impl Logger for NdjsonLogger {
    fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    fn log(&self, level: LogLevel, msg: &str, tags: &[(&'static str, &str)]) {
        if !self.enabled(level) {
            return;
        }

        let entries = tags.iter().map(|&(key, value)| Entry {
            key,
            value: Value::Atom(Atom::String(value)),
        });

        ndjsonloggercore::log(
            None,
            &mut StdoutOutputter::new(),
            msg,
            ndjson_level(level),
            entries,
        );
    }
}

fn ndjson_level(level: LogLevel) -> Level {
    match level {
        LogLevel::Debug => Level::Debug,
        LogLevel::Info => Level::Info,
        LogLevel::Warn => Level::Warn,
        LogLevel::Error => Level::Error,
    }
}
