// A super simple logger for the CLI that works with the `log` crate. We
// don't need anything fancy; just basic log levels and the ability to print
// to stderr, without bringing in extra dependencies for it.

use log::Log;

/// The simplest possible logger that logs to stderr.
///
/// This logger does no filtering. Instead, it relies on the `log` crate's
/// filtering via its global max_level setting.
#[derive(Debug)]
pub struct Logger(());

impl Logger {
    /// Create a new logger that logs to stderr and initialize it as the
    /// global logger. If there was a problem setting the logger, then an
    /// error is returned.
    pub fn init() -> Result<(), log::SetLoggerError> {
        static LOGGER: Logger = Logger(());
        log::set_logger(&LOGGER)
    }
}

impl Log for Logger {
    fn enabled(&self, _: &log::Metadata<'_>) -> bool {
        // We set the log level via log::set_max_level, so we don't need to
        // implement filtering here.
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        match (record.file(), record.line()) {
            (Some(file), Some(line)) => {
                eprintln!(
                    "{}|{}:{}: {}",
                    record.level(),
                    file,
                    line,
                    record.args(),
                );
            }
            _ => {
                eprintln!("{}: {}", record.level(), record.args());
            }
        }
    }

    fn flush(&self) {
        // We use eprintln! which is flushed on every call.
    }
}
