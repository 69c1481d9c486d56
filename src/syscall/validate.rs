//! System Call Input Validation
//!
//! Provides secure validation for all system call inputs.
//!
//! # Security Principles
//! - Validate ALL inputs before use
//! - Fail-secure: deny by default
//! - Prevent common vulnerabilities:
//!   - Buffer overflows (bounds checking against the program's memory)
//!   - Integer overflow in address arithmetic (checked adds)
//!   - Null pointer dereference (explicit checks)
//!   - Unterminated strings (bounded NUL scan)
//!
//! Raw `(address, size)` pairs from registers become slices here and nowhere
//! else; handlers only ever see bounds-checked views.

use core::ops::Range;

use crate::store::{FileName, NAME_MAX};

use super::handler::SyscallError;

/// User-space memory regions
///
/// The default window a program is loaded into (kernel is at 0x40080000,
/// user space is below).
pub mod regions {
    /// Start of user-accessible memory
    pub const USER_START: usize = 0x4000_0000;
    /// End of user-accessible memory (before kernel)
    pub const USER_END: usize = 0x4008_0000;
}

/// A program's memory: `mem[0]` lives at virtual address `base`.
#[derive(Debug)]
pub struct UserSpace<'a> {
    base: usize,
    mem: &'a mut [u8],
}

impl<'a> UserSpace<'a> {
    pub fn new(base: usize, mem: &'a mut [u8]) -> Self {
        Self { base, mem }
    }

    /// View the region `[base, base + len)` of the current address space.
    ///
    /// # Safety
    /// - The region must be mapped, readable and writable for `'a`
    /// - Nothing else may access it while the returned value is alive
    pub unsafe fn from_raw_parts(base: usize, len: usize) -> Self {
        // SAFETY: Caller guarantees the region is valid and exclusive
        let mem = unsafe { core::slice::from_raw_parts_mut(base as *mut u8, len) };
        Self { base, mem }
    }

    /// A program loaded at [`regions::USER_START`]. Memory beyond
    /// [`regions::USER_END`] is not part of the program.
    pub fn at_user_start(mem: &'a mut [u8]) -> Self {
        let len = mem.len().min(regions::USER_END - regions::USER_START);
        Self::new(regions::USER_START, &mut mem[..len])
    }

    /// The whole default user window of the current address space.
    ///
    /// # Safety
    /// `USER_START..USER_END` must be mapped, readable and writable for
    /// `'a`, and used by nothing else while the returned value is alive.
    pub unsafe fn user_window() -> Self {
        // SAFETY: Caller guarantees the window is valid and exclusive
        unsafe {
            Self::from_raw_parts(
                regions::USER_START,
                regions::USER_END - regions::USER_START,
            )
        }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    /// One past the last user address.
    pub fn end(&self) -> usize {
        self.base + self.mem.len()
    }

    /// Validate a user-space buffer the kernel will read from
    ///
    /// # Security Checks
    /// 1. Pointer is non-null and within user space
    /// 2. Pointer + length doesn't overflow
    /// 3. End address is within user space
    pub fn validate_read(&self, addr: usize, len: usize) -> Result<&[u8], SyscallError> {
        let range = self.range(addr, len)?;
        Ok(&self.mem[range])
    }

    /// Validate a user-space buffer the kernel will write into
    ///
    /// Same checks as [`validate_read`](Self::validate_read).
    pub fn validate_write(&mut self, addr: usize, len: usize) -> Result<&mut [u8], SyscallError> {
        let range = self.range(addr, len)?;
        Ok(&mut self.mem[range])
    }

    /// Copy in a NUL-terminated file name.
    ///
    /// The terminator must appear within `NAME_MAX + 1` bytes and inside
    /// user memory.
    pub fn read_path(&self, addr: usize) -> Result<FileName, SyscallError> {
        if addr == 0 || addr < self.base || addr >= self.end() {
            return Err(SyscallError::Efault);
        }
        let tail = &self.mem[addr - self.base..];
        let window = &tail[..tail.len().min(NAME_MAX + 1)];

        match window.iter().position(|&b| b == 0) {
            Some(len) => Ok(FileName::new(&window[..len])?),
            None if window.len() > NAME_MAX => Err(SyscallError::Enametoolong),
            None => Err(SyscallError::Efault),
        }
    }

    fn range(&self, addr: usize, len: usize) -> Result<Range<usize>, SyscallError> {
        // Zero-length buffers are valid anywhere
        if len == 0 {
            return Ok(0..0);
        }

        // Check null pointer
        if addr == 0 {
            return Err(SyscallError::Efault);
        }

        // Check start is in user space
        if addr < self.base || addr >= self.end() {
            return Err(SyscallError::Efault);
        }

        // Check for overflow
        let end = addr.checked_add(len).ok_or(SyscallError::Efault)?;

        // Check end is in user space
        if end > self.end() {
            return Err(SyscallError::Efault);
        }

        Ok(addr - self.base..end - self.base)
    }
}
