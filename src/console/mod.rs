//! Console substrate
//!
//! A console is a byte device with a transmit side (`putchar`) and a receive
//! side (`getchar`). Devices only ever poll; blocking behaviour lives here,
//! in [`put`] and [`get`], so that every device gets the same policy.
//!
//! - `Pl011`: the QEMU virt serial port
//! - `MemConsole`: an in-memory device for tests and embedders

pub mod memory;
pub mod pl011;

pub use memory::MemConsole;
pub use pl011::Pl011;

use spin::Mutex;

use crate::config::{InputMode, OutputPolicy};

/// `getchar` result when no character is available.
pub const GETCHAR_NONE: i32 = -1;

/// Why a device could not move a byte right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleError {
    /// The device is busy (TX FIFO full, or no RX data pending).
    WouldBlock,
    /// The device is gone: unplugged, not initialized, or input closed.
    Disconnected,
}

impl core::fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::WouldBlock => write!(f, "console busy"),
            Self::Disconnected => write!(f, "console disconnected"),
        }
    }
}

/// A polled byte device.
pub trait Console {
    /// Offer one byte to the transmitter.
    fn try_write_byte(&mut self, byte: u8) -> Result<(), ConsoleError>;

    /// Take one byte from the receiver, if one is pending.
    fn try_read_byte(&mut self) -> Result<u8, ConsoleError>;

    /// Push any buffered output to the device.
    fn flush(&mut self) {}

    /// Called between two polls of a waiting loop.
    fn relax(&mut self) {
        core::hint::spin_loop();
    }
}

/// A shared device: the lock is held for a single poll only, so a waiting
/// `getchar` does not starve other users of the console.
impl<C: Console> Console for &Mutex<C> {
    fn try_write_byte(&mut self, byte: u8) -> Result<(), ConsoleError> {
        self.lock().try_write_byte(byte)
    }

    fn try_read_byte(&mut self) -> Result<u8, ConsoleError> {
        self.lock().try_read_byte()
    }

    fn flush(&mut self) {
        self.lock().flush();
    }

    fn relax(&mut self) {
        self.lock().relax();
    }
}

/// Deliver one byte under `policy`.
///
/// Returns `true` if the device accepted the byte, `false` if it was dropped.
pub fn put<C: Console + ?Sized>(console: &mut C, byte: u8, policy: OutputPolicy) -> bool {
    loop {
        match console.try_write_byte(byte) {
            Ok(()) => return true,
            Err(ConsoleError::Disconnected) if policy == OutputPolicy::Drop => return false,
            Err(_) => console.relax(),
        }
    }
}

/// Receive one byte under `mode`.
///
/// Returns the byte value, or [`GETCHAR_NONE`] in non-blocking mode.
pub fn get<C: Console + ?Sized>(console: &mut C, mode: InputMode) -> i32 {
    loop {
        match console.try_read_byte() {
            Ok(byte) => return i32::from(byte),
            Err(_) if mode == InputMode::NonBlocking => return GETCHAR_NONE,
            Err(_) => console.relax(),
        }
    }
}
