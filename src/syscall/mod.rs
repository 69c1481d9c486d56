//! System Call Interface
//!
//! The register-level door into the runtime boundary for programs running
//! at EL0.
//!
//! # Security Model
//! - Whitelist approach: only explicitly implemented syscalls are allowed
//! - All parameters are validated before use
//! - Invalid inputs return errors, never panic
//!
//! # Current Syscalls
//! - 1: putchar(ch) - write one byte to the console
//! - 2: getchar() - read one byte from the console
//! - 3: exit() - terminate the current program
//! - 4: readfile(path, buf, size) - read the start of a file
//! - 5: writefile(path, buf, size) - replace a file's content

mod handler;
mod validate;

pub use handler::{dispatch, numbers, SyscallError, SyscallOutcome};
pub use validate::{regions, UserSpace};
