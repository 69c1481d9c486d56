//! PantherOS program runtime
//!
//! The boundary between a user program and the PantherOS kernel: five
//! calls and the substrates behind them.
//!
//! # Calls
//! - `exit`: terminate the program, never returns
//! - `putchar` / `getchar`: one byte to or from the console
//! - `readfile` / `writefile`: whole-file access to a flat named store
//!
//! # Layers
//! - [`runtime::Runtime`] owns a [`console::Console`], a
//!   [`store::FileStore`] and a [`process::Supervisor`]
//! - [`syscall`] decodes the `svc #0` ABI and validates user pointers
//! - [`exception`] routes traps taken from EL0 into the runtime
//! - [`user`] is the program side of the same calls
//!
//! # Security Features
//! - User pointers are range-checked before the kernel touches them
//! - A terminated program is never serviced again
//! - Freed file content is scrubbed before its memory is reused
//!
//! # Targets
//! - AArch64 bare metal (`no_std` + `alloc`): PL011 console, RAM store
//! - Hosted with the `std` feature: stdio, a directory, the host process

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod config;
pub mod console;
pub mod exception;
pub mod logger;
pub mod process;
pub mod runtime;
pub mod store;
pub mod syscall;
pub mod user;

#[cfg(any(test, feature = "std"))]
pub mod host;

pub use config::{ConfigError, InputMode, OutputPolicy, RuntimeConfig, StoreLimits};
pub use console::{Console, ConsoleError, MemConsole, Pl011, GETCHAR_NONE};
pub use process::{ExitReason, Halt, RunState, Supervisor};
pub use runtime::Runtime;
pub use store::{FileMode, FileName, FileStore, RamStore, StoreError, NAME_MAX};
pub use syscall::SyscallError;
pub use user::{InProcess, Sys, Syscall, Trap};

/// Runtime version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
