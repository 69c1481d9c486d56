//! Runtime Configuration
//!
//! Console policies, log verbosity and store limits for one runtime instance.
//!
//! Configuration is fixed when the runtime is built. The console policies in
//! particular must not change while a program runs: a program observes one
//! `getchar` convention and one `putchar` convention for its whole life.
//!
//! # Boot Arguments
//! ```text
//! console.input=blocking|nonblocking
//! console.output=block|drop
//! log=off|error|warn|info|debug|trace
//! store.bytes=<n>
//! store.files=<n>
//! ```

use core::fmt;

use log::LevelFilter;

/// Default arena size for the in-memory file store (64 KiB).
pub const DEFAULT_STORE_BYTES: usize = 64 * 1024;

/// Default maximum number of files in the in-memory file store.
pub const DEFAULT_STORE_FILES: usize = 64;

/// How `getchar` behaves when no byte is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// Wait until a byte arrives. The "no data" sentinel is never returned.
    Blocking,
    /// Poll once; return the sentinel when nothing is pending.
    NonBlocking,
}

/// What `putchar` does when the console cannot deliver the byte.
///
/// FIFO backpressure is always waited out. The policies differ only when
/// the device reports itself disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPolicy {
    /// Keep retrying until the device takes the byte.
    Block,
    /// Discard the byte.
    Drop,
}

/// Capacity limits of the in-memory file store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    /// Size of the content arena in bytes.
    pub bytes: usize,
    /// Maximum number of distinct file names.
    pub files: usize,
}

impl StoreLimits {
    pub const fn new() -> Self {
        Self {
            bytes: DEFAULT_STORE_BYTES,
            files: DEFAULT_STORE_FILES,
        }
    }
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration of a [`Runtime`](crate::runtime::Runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub input: InputMode,
    pub output: OutputPolicy,
    /// Verbosity of a logger built with
    /// [`ConsoleLogger::from_config`](crate::logger::ConsoleLogger::from_config).
    pub log_level: LevelFilter,
    pub store: StoreLimits,
}

impl RuntimeConfig {
    /// Bare-metal defaults: blocking input, blocking output.
    pub const fn new() -> Self {
        Self {
            input: InputMode::Blocking,
            output: OutputPolicy::Block,
            log_level: LevelFilter::Info,
            store: StoreLimits::new(),
        }
    }

    /// Defaults for a hosted runtime, where stdin can reach end-of-file and
    /// stdout can be a closed pipe.
    pub const fn hosted() -> Self {
        Self {
            input: InputMode::NonBlocking,
            output: OutputPolicy::Drop,
            log_level: LevelFilter::Warn,
            store: StoreLimits::new(),
        }
    }

    pub const fn with_input(mut self, input: InputMode) -> Self {
        self.input = input;
        self
    }

    pub const fn with_output(mut self, output: OutputPolicy) -> Self {
        self.output = output;
        self
    }

    pub const fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }

    pub const fn with_store(mut self, store: StoreLimits) -> Self {
        self.store = store;
        self
    }

    /// Build a configuration from a boot command line.
    ///
    /// Tokens are whitespace separated. Tokens without `=` and unknown keys
    /// belong to other subsystems and are skipped.
    pub fn from_cmdline(cmdline: &str) -> Result<Self, ConfigError> {
        let mut config = Self::new();
        for token in cmdline.split_whitespace() {
            config.apply_token(token)?;
        }
        Ok(config)
    }

    fn apply_token(&mut self, token: &str) -> Result<(), ConfigError> {
        let Some((key, value)) = token.split_once('=') else {
            return Ok(());
        };

        match key {
            "console.input" => {
                self.input = if value.eq_ignore_ascii_case("blocking") {
                    InputMode::Blocking
                } else if value.eq_ignore_ascii_case("nonblocking") {
                    InputMode::NonBlocking
                } else {
                    return Err(ConfigError::InvalidValue { key: "console.input" });
                };
            }
            "console.output" => {
                self.output = if value.eq_ignore_ascii_case("block") {
                    OutputPolicy::Block
                } else if value.eq_ignore_ascii_case("drop") {
                    OutputPolicy::Drop
                } else {
                    return Err(ConfigError::InvalidValue { key: "console.output" });
                };
            }
            "log" => {
                self.log_level = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue { key: "log" })?;
            }
            "store.bytes" => {
                self.store.bytes = parse_size(value, "store.bytes")?;
            }
            "store.files" => {
                self.store.files = parse_size(value, "store.files")?;
            }
            _ => {}
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Accepts a decimal count with an optional `K`/`M` suffix.
fn parse_size(value: &str, key: &'static str) -> Result<usize, ConfigError> {
    let (digits, scale) = match value.as_bytes().last() {
        Some(b'k' | b'K') => (&value[..value.len() - 1], 1024),
        Some(b'm' | b'M') => (&value[..value.len() - 1], 1024 * 1024),
        _ => (value, 1),
    };
    digits
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(scale))
        .ok_or(ConfigError::InvalidValue { key })
}

/// Error type for boot argument parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A known key carried a value it does not accept.
    InvalidValue { key: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key } => write!(f, "invalid value for `{}`", key),
        }
    }
}
