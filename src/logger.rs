//! `log` backend that writes formatted lines to the console
//!
//! Lines are rendered into a fixed buffer so logging never allocates; long
//! messages are cut at [`MAX_LINE`].

use core::fmt::Write;

use heapless::String as HeaplessString;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Once;

pub const MAX_LINE: usize = 256;

/// Where rendered lines go
pub type Sink = fn(&[u8]);

struct ConsoleLogger {
    sink: Once<Sink>,
}

static LOGGER: ConsoleLogger = ConsoleLogger { sink: Once::new() };

/// Keeps whatever fits, dropping the rest
struct Truncating<'a>(&'a mut HeaplessString<MAX_LINE>);

impl Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                return Err(core::fmt::Error);
            }
        }
        Ok(())
    }
}

/// `[LEVEL target] message`, truncated to fit
pub fn format_line(record: &Record<'_>) -> HeaplessString<MAX_LINE> {
    let mut line = HeaplessString::new();
    let _ = write!(
        Truncating(&mut line),
        "[{level} {target}] {message}",
        level = record.level(),
        target = record.target(),
        message = record.args(),
    );
    line
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(sink) = self.sink.get() {
            let line = format_line(record);
            sink(line.as_bytes());
            sink(b"\r\n");
        }
    }

    fn flush(&self) {}
}

/// Install the console logger
///
/// Only the first call takes effect.
pub fn init(sink: Sink, level: LevelFilter) -> Result<(), SetLoggerError> {
    LOGGER.sink.call_once(|| sink);
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
