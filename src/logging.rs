//! Kernel logger for the `log` facade, printing through the console.

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::proc::cpuid;
use crate::println;

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        println!(
            "\u{1B}[{}m[{:>5}][hart {}] {}\u{1B}[0m",
            level_to_color_code(record.level()),
            record.level(),
            cpuid(),
            record.args(),
        );
    }

    fn flush(&self) {}
}

/// Install the logger, at the level named by `LOG` when the kernel was built.
pub fn init() {
    static LOGGER: KernelLogger = KernelLogger;
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level_filter(option_env!("LOG")));
    }
}

/// `off|error|warn|info|debug|trace`, any case. Anything else is `Info`.
pub fn level_filter(name: Option<&str>) -> LevelFilter {
    const LEVELS: [(&str, LevelFilter); 6] = [
        ("off", LevelFilter::Off),
        ("error", LevelFilter::Error),
        ("warn", LevelFilter::Warn),
        ("info", LevelFilter::Info),
        ("debug", LevelFilter::Debug),
        ("trace", LevelFilter::Trace),
    ];
    name.and_then(|name| {
        LEVELS
            .iter()
            .find(|(level, _)| level.eq_ignore_ascii_case(name.trim()))
            .map(|&(_, filter)| filter)
    })
    .unwrap_or(LevelFilter::Info)
}

fn level_to_color_code(level: Level) -> u8 {
    match level {
        Level::Error => 31, // Red
        Level::Warn => 93,  // BrightYellow
        Level::Info => 34,  // Blue
        Level::Debug => 32, // Green
        Level::Trace => 90, // BrightBlack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!(level_filter(Some("TRACE")), LevelFilter::Trace);
        assert_eq!(level_filter(Some("Warn")), LevelFilter::Warn);
        assert_eq!(level_filter(Some("off")), LevelFilter::Off);
    }

    #[test]
    fn missing_or_unknown_falls_back_to_info() {
        assert_eq!(level_filter(None), LevelFilter::Info);
        assert_eq!(level_filter(Some("verbose")), LevelFilter::Info);
        assert_eq!(level_filter(Some("")), LevelFilter::Info);
    }
}
