//! Program-side interface
//!
//! What a program links against: `exit`, `putchar`, `getchar`, `readfile`
//! and `writefile`, issued through a [`Trap`].
//!
//! - [`Svc`] enters the kernel with `svc #0` (AArch64 bare metal only)
//! - [`InProcess`] calls a [`Runtime`] owned by the same address space
//!
//! Buffers are slices, so the size passed to the kernel is always the
//! slice length. Read fewer bytes by passing a shorter slice.

use core::fmt;

use crate::console::Console;
use crate::process::Supervisor;
use crate::runtime::Runtime;
use crate::store::{FileStore, NAME_MAX};
use crate::syscall::{numbers, SyscallError};

/// One request to the runtime boundary. `exit` is not a request: it never
/// comes back, see [`Trap::exit`].
#[derive(Debug)]
pub enum Syscall<'a> {
    PutChar(u8),
    GetChar,
    ReadFile { path: &'a [u8], buf: &'a mut [u8] },
    WriteFile { path: &'a [u8], buf: &'a [u8] },
}

/// A way into the runtime.
pub trait Trap {
    /// Perform `request`; returns the raw `int` result.
    fn call(&mut self, request: Syscall<'_>) -> i32;

    /// Terminate the program.
    fn exit(self) -> !;
}

/// A program's handle on its runtime.
pub struct Sys<T> {
    trap: T,
}

impl<T: Trap> Sys<T> {
    pub fn new(trap: T) -> Self {
        Self { trap }
    }

    pub fn trap(&self) -> &T {
        &self.trap
    }

    pub fn trap_mut(&mut self) -> &mut T {
        &mut self.trap
    }

    /// End the program. Nothing after this call runs.
    pub fn exit(self) -> ! {
        self.trap.exit()
    }

    pub fn putchar(&mut self, ch: u8) {
        self.trap.call(Syscall::PutChar(ch));
    }

    /// A byte `0..=255`, or a negative value when no byte is available.
    pub fn getchar(&mut self) -> i32 {
        self.trap.call(Syscall::GetChar)
    }

    /// Read the start of `path` into `buf`; count or negative errno.
    pub fn readfile(&mut self, path: impl AsRef<[u8]>, buf: &mut [u8]) -> i32 {
        self.trap.call(Syscall::ReadFile {
            path: path.as_ref(),
            buf,
        })
    }

    /// Replace the content of `path` with `buf`; `buf.len()` or negative errno.
    pub fn writefile(&mut self, path: impl AsRef<[u8]>, buf: &[u8]) -> i32 {
        self.trap.call(Syscall::WriteFile {
            path: path.as_ref(),
            buf,
        })
    }

    pub fn try_readfile(&mut self, path: impl AsRef<[u8]>, buf: &mut [u8]) -> Result<usize, SyscallError> {
        SyscallError::decode(self.readfile(path, buf))
    }

    pub fn try_writefile(&mut self, path: impl AsRef<[u8]>, buf: &[u8]) -> Result<usize, SyscallError> {
        SyscallError::decode(self.writefile(path, buf))
    }

    /// Write every byte of `s` with `putchar`.
    pub fn print(&mut self, s: &str) {
        for byte in s.bytes() {
            self.putchar(byte);
        }
    }
}

impl<T: Trap> fmt::Write for Sys<T> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.print(s);
        Ok(())
    }
}

/// Trap into a runtime living in the same address space.
pub struct InProcess<C, S, P> {
    rt: Runtime<C, S, P>,
}

impl<C: Console, S: FileStore, P: Supervisor> InProcess<C, S, P> {
    pub fn new(rt: Runtime<C, S, P>) -> Self {
        Self { rt }
    }

    pub fn runtime(&self) -> &Runtime<C, S, P> {
        &self.rt
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime<C, S, P> {
        &mut self.rt
    }
}

impl<C: Console, S: FileStore, P: Supervisor> Trap for InProcess<C, S, P> {
    fn call(&mut self, request: Syscall<'_>) -> i32 {
        match request {
            Syscall::PutChar(ch) => {
                self.rt.putchar(ch);
                0
            }
            Syscall::GetChar => self.rt.getchar(),
            Syscall::ReadFile { path, buf } => self.rt.readfile(path, buf),
            Syscall::WriteFile { path, buf } => self.rt.writefile(path, buf),
        }
    }

    fn exit(self) -> ! {
        self.rt.exit()
    }
}

/// A path with its NUL terminator, as the kernel expects it.
type CPath = [u8; NAME_MAX + 1];

/// Lower a request to a syscall number and x0-x2.
///
/// `path_buf` receives the NUL-terminated copy of the path and must outlive
/// the trap. Requests the kernel would reject for size alone fail here.
#[cfg_attr(not(all(target_arch = "aarch64", target_os = "none")), allow(dead_code))]
fn encode(request: Syscall<'_>, path_buf: &mut CPath) -> Result<(usize, [usize; 3]), SyscallError> {
    match request {
        Syscall::PutChar(ch) => Ok((numbers::SYS_PUTCHAR, [usize::from(ch), 0, 0])),
        Syscall::GetChar => Ok((numbers::SYS_GETCHAR, [0; 3])),
        Syscall::ReadFile { path, buf } => {
            let path = terminate_path(path, path_buf)?;
            let size = register_size(buf.len())?;
            Ok((numbers::SYS_READFILE, [path, buf.as_mut_ptr() as usize, size]))
        }
        Syscall::WriteFile { path, buf } => {
            let path = terminate_path(path, path_buf)?;
            let size = register_size(buf.len())?;
            Ok((numbers::SYS_WRITEFILE, [path, buf.as_ptr() as usize, size]))
        }
    }
}

#[cfg_attr(not(all(target_arch = "aarch64", target_os = "none")), allow(dead_code))]
fn terminate_path(path: &[u8], path_buf: &mut CPath) -> Result<usize, SyscallError> {
    if path.len() > NAME_MAX {
        return Err(SyscallError::Enametoolong);
    }
    path_buf[..path.len()].copy_from_slice(path);
    path_buf[path.len()] = 0;
    Ok(path_buf.as_ptr() as usize)
}

#[cfg_attr(not(all(target_arch = "aarch64", target_os = "none")), allow(dead_code))]
fn register_size(len: usize) -> Result<usize, SyscallError> {
    if len > i32::MAX as usize {
        return Err(SyscallError::Einval);
    }
    Ok(len)
}

/// Trap into the kernel with `svc #0`.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
#[derive(Debug, Default)]
pub struct Svc;

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
impl Trap for Svc {
    fn call(&mut self, request: Syscall<'_>) -> i32 {
        let mut path_buf: CPath = [0; NAME_MAX + 1];
        match encode(request, &mut path_buf) {
            // SAFETY: every pointer argument refers to a live borrow (the
            // request's buffers or path_buf) for the duration of the trap
            Ok((num, args)) => unsafe { svc(num, args) as i32 },
            Err(e) => e.code(),
        }
    }

    fn exit(self) -> ! {
        // SAFETY: SYS_EXIT takes no arguments and the kernel never returns
        // from it
        unsafe {
            core::arch::asm!(
                "svc #0",
                in("x8") numbers::SYS_EXIT,
                options(noreturn, nostack)
            );
        }
    }
}

/// # Safety
/// Pointer arguments must be valid for the access the syscall performs.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
unsafe fn svc(num: usize, args: [usize; 3]) -> i64 {
    let ret: i64;
    // SAFETY: Caller guarantees the arguments; the kernel preserves every
    // register except x0
    unsafe {
        core::arch::asm!(
            "svc #0",
            in("x8") num,
            inlateout("x0") args[0] => ret,
            in("x1") args[1],
            in("x2") args[2],
            options(nostack)
        );
    }
    ret
}
