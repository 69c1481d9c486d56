//! System Call Handler
//!
//! Dispatches system calls and implements individual syscall handlers.
//!
//! # Security Considerations
//! - All syscall numbers are validated against the whitelist
//! - Unknown syscalls return ENOSYS
//! - Pointers and sizes are validated against user memory before use
//! - A terminated program never reaches a handler

use core::fmt;

use crate::console::Console;
use crate::exception::ExceptionContext;
use crate::process::{ExitReason, Supervisor};
use crate::runtime::Runtime;
use crate::store::{FileName, FileStore, StoreError};

use super::validate::UserSpace;

/// System call numbers
pub mod numbers {
    pub const SYS_PUTCHAR: usize = 1;
    pub const SYS_GETCHAR: usize = 2;
    pub const SYS_EXIT: usize = 3;
    pub const SYS_READFILE: usize = 4;
    pub const SYS_WRITEFILE: usize = 5;
}

/// System call error codes
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// No such file
    Enoent = -2,
    /// Program no longer running
    Esrch = -3,
    /// I/O error in the backing store
    Eio = -5,
    /// Permission denied
    Eacces = -13,
    /// Bad address (invalid pointer)
    Efault = -14,
    /// Invalid argument
    Einval = -22,
    /// No space left in the store
    Enospc = -28,
    /// File name too long
    Enametoolong = -36,
    /// Invalid system call number
    Enosys = -38,
}

impl SyscallError {
    /// The negative value returned to the program.
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub const fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -2 => Self::Enoent,
            -3 => Self::Esrch,
            -5 => Self::Eio,
            -13 => Self::Eacces,
            -14 => Self::Efault,
            -22 => Self::Einval,
            -28 => Self::Enospc,
            -36 => Self::Enametoolong,
            -38 => Self::Enosys,
            _ => return None,
        })
    }

    /// Split a count-or-errno result. Unknown negative codes read as `Eio`.
    pub fn decode(ret: i32) -> Result<usize, Self> {
        if ret >= 0 {
            Ok(ret as usize)
        } else {
            Err(Self::from_code(ret).unwrap_or(Self::Eio))
        }
    }
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Enoent => "no such file",
            Self::Esrch => "program terminated",
            Self::Eio => "i/o error",
            Self::Eacces => "permission denied",
            Self::Efault => "bad address",
            Self::Einval => "invalid argument",
            Self::Enospc => "no space left in store",
            Self::Enametoolong => "file name too long",
            Self::Enosys => "unknown system call",
        };
        write!(f, "{} ({})", text, self.code())
    }
}

impl From<StoreError> for SyscallError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::Enoent,
            StoreError::NoSpace => Self::Enospc,
            StoreError::InvalidName => Self::Einval,
            StoreError::NameTooLong => Self::Enametoolong,
            StoreError::PermissionDenied => Self::Eacces,
            StoreError::Io => Self::Eio,
        }
    }
}

/// What the trap handler does after a system call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// Place the value in x0 and return to the program.
    Return(i64),
    /// The program is gone; do not return to it.
    Exited,
}

/// Dispatch a system call
///
/// # Arguments
/// * `syscall_num` - System call number (from x8)
/// * `ctx` - Exception context with arguments (x0-x2)
/// * `user` - The calling program's memory
/// * `rt` - The calling program's runtime
///
/// # Security
/// - Unknown syscall numbers are rejected with ENOSYS
/// - Each handler validates its own arguments
pub fn dispatch<C, S, P>(
    syscall_num: usize,
    ctx: &ExceptionContext,
    user: &mut UserSpace<'_>,
    rt: &mut Runtime<C, S, P>,
) -> SyscallOutcome
where
    C: Console,
    S: FileStore,
    P: Supervisor,
{
    if !rt.is_running() {
        log::warn!("[SYSCALL] {} from terminated program dropped", syscall_num);
        return SyscallOutcome::Exited;
    }

    match syscall_num {
        numbers::SYS_EXIT => sys_exit(rt),
        numbers::SYS_PUTCHAR => {
            rt.putchar(ctx.gpr[0] as u8);
            SyscallOutcome::Return(0)
        }
        numbers::SYS_GETCHAR => SyscallOutcome::Return(i64::from(rt.getchar())),
        numbers::SYS_READFILE => SyscallOutcome::Return(i64::from(sys_readfile(
            rt,
            user,
            ctx.gpr[0] as usize, // path
            ctx.gpr[1] as usize, // buf
            ctx.gpr[2] as i32,   // size
        ))),
        numbers::SYS_WRITEFILE => SyscallOutcome::Return(i64::from(sys_writefile(
            rt,
            user,
            ctx.gpr[0] as usize, // path
            ctx.gpr[1] as usize, // buf
            ctx.gpr[2] as i32,   // size
        ))),
        _ => {
            log::warn!("[SYSCALL] Unknown syscall: {}", syscall_num);
            SyscallOutcome::Return(i64::from(SyscallError::Enosys.code()))
        }
    }
}

/// Exit system call
///
/// Marks the program terminated; the trap handler must not resume it.
fn sys_exit<C: Console, S: FileStore, P: Supervisor>(rt: &mut Runtime<C, S, P>) -> SyscallOutcome {
    rt.terminate(ExitReason::Exited);
    SyscallOutcome::Exited
}

/// Read file system call
///
/// # Returns
/// Bytes copied on success, negative error code on failure
///
/// # Security
/// - Path must be NUL-terminated within NAME_MAX + 1 bytes of user memory
/// - `size` must be non-negative and `buf..buf+size` must be user memory
fn sys_readfile<C: Console, S: FileStore, P: Supervisor>(
    rt: &mut Runtime<C, S, P>,
    user: &mut UserSpace<'_>,
    path: usize,
    buf: usize,
    size: i32,
) -> i32 {
    match readfile_args(user, path, buf, size) {
        Ok((name, dst)) => rt.readfile(name.as_bytes(), dst),
        Err(e) => {
            log::debug!("[SYSCALL] readfile: argument validation failed: {}", e);
            e.code()
        }
    }
}

fn readfile_args<'u>(
    user: &'u mut UserSpace<'_>,
    path: usize,
    buf: usize,
    size: i32,
) -> Result<(FileName, &'u mut [u8]), SyscallError> {
    let name = user.read_path(path)?;
    let len = user_size(size)?;
    let dst = user.validate_write(buf, len)?;
    Ok((name, dst))
}

/// Write file system call
///
/// # Returns
/// `size` on success, negative error code on failure
///
/// # Security
/// Same argument checks as readfile; the source buffer is only read.
fn sys_writefile<C: Console, S: FileStore, P: Supervisor>(
    rt: &mut Runtime<C, S, P>,
    user: &UserSpace<'_>,
    path: usize,
    buf: usize,
    size: i32,
) -> i32 {
    match writefile_args(user, path, buf, size) {
        Ok((name, src)) => rt.writefile(name.as_bytes(), src),
        Err(e) => {
            log::debug!("[SYSCALL] writefile: argument validation failed: {}", e);
            e.code()
        }
    }
}

fn writefile_args<'u>(
    user: &'u UserSpace<'_>,
    path: usize,
    buf: usize,
    size: i32,
) -> Result<(FileName, &'u [u8]), SyscallError> {
    let name = user.read_path(path)?;
    let len = user_size(size)?;
    let src = user.validate_read(buf, len)?;
    Ok((name, src))
}

/// A C `int` size from a register.
fn user_size(size: i32) -> Result<usize, SyscallError> {
    usize::try_from(size).map_err(|_| SyscallError::Einval)
}
