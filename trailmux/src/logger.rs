use colored::{ColoredString, Colorize};
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

static LOGGER: Logger = Logger;

pub struct Logger;

impl Logger {
    pub fn init(verbose: u8, quiet: bool) -> Result<(), SetLoggerError> {
        log::set_logger(&LOGGER)?;
        Self::set_level(verbose, quiet, false);
        Ok(())
    }

    /// `-q` wins over `-v`; `debug` acts like one `-v`.
    pub fn set_level(verbose: u8, quiet: bool, debug: bool) {
        log::set_max_level(level_filter(verbose, quiet, debug));
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        // Debug records of dependencies only show up at trace level.
        metadata.level() <= Level::Info
            || metadata.target().starts_with(env!("CARGO_CRATE_NAME"))
            || log::max_level() == LevelFilter::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        match log::max_level() {
            LevelFilter::Off => (),
            LevelFilter::Error | LevelFilter::Warn | LevelFilter::Info => match record.level() {
                Level::Info => println!("{}", record.args()),
                _ => eprintln!("{} {}", label(record.level()), record.args()),
            },
            LevelFilter::Debug | LevelFilter::Trace => {
                let location = match (record.file(), record.line()) {
                    (Some(file), Some(line)) => format!("[{file}:{line}]").dimmed(),
                    _ => "[unk]".dimmed(),
                };

                eprintln!(
                    "{} {} {} {}",
                    label(record.level()),
                    record.target().dimmed(),
                    location,
                    record.args()
                );
            }
        }
    }

    fn flush(&self) {}
}

fn level_filter(verbose: u8, quiet: bool, debug: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Warn;
    }

    match verbose.max(u8::from(debug)) {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn label(level: Level) -> ColoredString {
    match level {
        Level::Debug => "[DEBUG]".bold().blue(),
        Level::Error => "[ERROR]".bold().red(),
        Level::Info => "[INFO]".bold().green(),
        Level::Trace => "[TRACE]".bold().purple(),
        Level::Warn => "[WARN]".bold().yellow(),
    }
}
