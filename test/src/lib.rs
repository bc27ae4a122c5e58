//! Testing utilities for `bulwark` crates.
pub mod gen;

/// Assert that an expression matches a pattern.
#[macro_export]
macro_rules! assert_matches {
    ($expr:expr, $pat:pat $(if $guard:expr)? $(,)?) => {
        match $expr {
            $pat $(if $guard)? => {}
            ref other => panic!(
                "assertion failed: `{:?}` does not match `{}`",
                other,
                stringify!($pat $(if $guard)?)
            ),
        }
    };
    ($expr:expr, $pat:pat $(if $guard:expr)?, $($arg:tt)+) => {
        match $expr {
            $pat $(if $guard)? => {}
            ref other => panic!(
                "assertion failed: `{:?}` does not match `{}`: {}",
                other,
                stringify!($pat $(if $guard)?),
                format_args!($($arg)+)
            ),
        }
    };
}

pub mod logger {
    use std::io::{self, Write};

    use chrono::prelude::*;
    use colored::*;
    use log::*;

    struct Logger {
        level: Level,
    }

    impl Log for Logger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= self.level
        }

        fn log(&self, record: &Record) {
            if !self.enabled(record.metadata()) {
                return;
            }
            let level = match record.level() {
                Level::Error => record.level().to_string().red(),
                Level::Warn => record.level().to_string().yellow(),
                Level::Info => record.level().to_string().green(),
                Level::Debug => record.level().to_string().white(),
                Level::Trace => record.level().to_string().white().dimmed(),
            };
            // Nb. Failing to write a log line in a test is not worth failing the test over.
            writeln!(
                io::stdout(),
                "test> {} {:<5} {} {}",
                Local::now()
                    .to_rfc3339_opts(SecondsFormat::Millis, true)
                    .white(),
                level,
                record.target().bold(),
                record.args()
            )
            .ok();
        }

        fn flush(&self) {}
    }

    /// Install the test logger. Subsequent calls have no effect.
    pub fn init(level: Level) {
        let logger = Logger { level };

        log::set_boxed_logger(Box::new(logger)).ok();
        log::set_max_level(level.to_level_filter());
    }
}
