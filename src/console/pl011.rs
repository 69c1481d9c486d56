//! PL011 UART Driver for QEMU virt machine
//!
//! Serial console behind `putchar`/`getchar`, and the sink for kernel logs.
//!
//! # Memory Map (QEMU virt)
//! - Base address: 0x0900_0000
//! - Register size: 0x1000 bytes
//!
//! # Security Considerations
//! - Unsafe code is limited to volatile MMIO accesses at fixed offsets
//! - Received bytes with line errors are discarded, never handed to programs

use super::{Console, ConsoleError};

/// QEMU virt machine PL011 UART base address
pub const QEMU_VIRT_BASE: usize = 0x0900_0000;

/// PL011 Register offsets
mod regs {
    /// Data Register - read/write data
    pub const DR: usize = 0x00;
    /// Flag Register - status flags
    pub const FR: usize = 0x18;
}

/// Flag Register bits
mod flags {
    /// Receive FIFO empty
    pub const RXFE: u32 = 1 << 4;
    /// Transmit FIFO full
    pub const TXFF: u32 = 1 << 5;
}

/// Data Register receive error bits (framing, parity, break, overrun)
const DR_ERROR_MASK: u32 = 0xF << 8;

/// PL011 UART driver
pub struct Pl011 {
    base: usize,
    initialized: bool,
    rx_errors: u32,
}

impl Pl011 {
    /// Create a new UART instance (not yet initialized)
    ///
    /// An uninitialized UART reports itself disconnected.
    pub const fn new(base: usize) -> Self {
        Self {
            base,
            initialized: false,
            rx_errors: 0,
        }
    }

    /// Initialize the UART
    ///
    /// # Safety
    /// - `base` must point to a PL011 register block (or memory laid out
    ///   like one) that stays mapped for the life of this driver
    /// - No other code may access the register block concurrently
    pub unsafe fn init(&mut self) {
        // PL011 is already initialized by QEMU, just mark as ready
        self.initialized = true;
    }

    /// Received bytes discarded because of line errors.
    pub fn rx_errors(&self) -> u32 {
        self.rx_errors
    }

    fn read_reg(&self, offset: usize) -> u32 {
        // SAFETY: `init` established that base points to a live register
        // block; offsets are fixed PL011 register offsets
        unsafe { core::ptr::read_volatile((self.base + offset) as *const u32) }
    }

    fn write_reg(&self, offset: usize, value: u32) {
        // SAFETY: Same as read_reg
        unsafe { core::ptr::write_volatile((self.base + offset) as *mut u32, value) }
    }
}

impl Console for Pl011 {
    fn try_write_byte(&mut self, byte: u8) -> Result<(), ConsoleError> {
        if !self.initialized {
            return Err(ConsoleError::Disconnected);
        }
        if self.read_reg(regs::FR) & flags::TXFF != 0 {
            return Err(ConsoleError::WouldBlock);
        }
        self.write_reg(regs::DR, u32::from(byte));
        Ok(())
    }

    fn try_read_byte(&mut self) -> Result<u8, ConsoleError> {
        if !self.initialized {
            return Err(ConsoleError::Disconnected);
        }
        if self.read_reg(regs::FR) & flags::RXFE != 0 {
            return Err(ConsoleError::WouldBlock);
        }
        let data = self.read_reg(regs::DR);
        // No logging here: the logger may share this device's lock
        if data & DR_ERROR_MASK != 0 {
            self.rx_errors = self.rx_errors.wrapping_add(1);
            return Err(ConsoleError::WouldBlock);
        }
        Ok((data & 0xFF) as u8)
    }
}
