//! Console logger
//!
//! Sends `log` records to a console shared with the runtime:
//!
//! ```text
//! [INFO] panther_rt::runtime: runtime: program exited\r\n
//! ```
//!
//! Log output uses the drop policy, so a disconnected console never stalls
//! the kernel. Newlines are sent as CRLF for serial terminals.

use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

use crate::config::{OutputPolicy, RuntimeConfig};
use crate::console::{self, Console};

/// A `log` backend writing to a console.
pub struct ConsoleLogger<'a, C> {
    console: &'a Mutex<C>,
    level: LevelFilter,
}

impl<'a, C: Console> ConsoleLogger<'a, C> {
    pub const fn new(console: &'a Mutex<C>, level: LevelFilter) -> Self {
        Self { console, level }
    }

    /// Logger at the verbosity chosen by `config` (the `log=` boot argument).
    pub const fn from_config(console: &'a Mutex<C>, config: &RuntimeConfig) -> Self {
        Self::new(console, config.log_level)
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }
}

impl<C: Console + Send> Log for ConsoleLogger<'_, C> {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut console = self.console.lock();
        let mut out = LineWriter {
            console: &mut *console,
        };
        let _ = writeln!(out, "[{}] {}: {}", record.level(), record.target(), record.args());
    }

    fn flush(&self) {
        self.console.lock().flush();
    }
}

/// Install `logger` as the global logger.
pub fn init<C: Console + Send + 'static>(
    logger: &'static ConsoleLogger<'static, C>,
) -> Result<(), SetLoggerError> {
    log::set_logger(logger)?;
    log::set_max_level(logger.level);
    Ok(())
}

/// `fmt::Write` adapter with `\n` → `\r\n` translation.
struct LineWriter<'c, C: ?Sized> {
    console: &'c mut C,
}

impl<C: Console + ?Sized> Write for LineWriter<'_, C> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                console::put(&mut *self.console, b'\r', OutputPolicy::Drop);
            }
            console::put(&mut *self.console, byte, OutputPolicy::Drop);
        }
        Ok(())
    }
}
