//! In-memory console
//!
//! Input is a byte queue fed by the embedder, output is captured in a buffer.
//! Stalls and disconnection can be scripted to exercise the waiting paths of
//! `putchar` and `getchar`.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use super::{Console, ConsoleError};

/// A console backed by memory.
#[derive(Debug)]
pub struct MemConsole {
    input: VecDeque<u8>,
    output: Vec<u8>,
    input_closed: bool,
    disconnected: bool,
    /// Relaxes left until a disconnected transmitter comes back.
    reconnect_in: Option<usize>,
    rx_stall: usize,
    tx_stall: usize,
    relaxes: usize,
    flushes: usize,
}

impl MemConsole {
    pub const fn new() -> Self {
        Self {
            input: VecDeque::new(),
            output: Vec::new(),
            input_closed: false,
            disconnected: false,
            reconnect_in: None,
            rx_stall: 0,
            tx_stall: 0,
            relaxes: 0,
            flushes: 0,
        }
    }

    /// Queue bytes for `getchar`.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.input.extend(bytes.iter().copied());
    }

    /// Report end of input once the queue drains.
    pub fn close_input(&mut self) {
        self.input_closed = true;
    }

    /// Everything written so far, in order.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Take the captured output, leaving the buffer empty.
    pub fn take_output(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.output)
    }

    /// Bytes still queued for input.
    pub fn pending_input(&self) -> usize {
        self.input.len()
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.disconnected = !connected;
        self.reconnect_in = None;
    }

    /// Reconnect the transmitter after `relaxes` waiting rounds.
    pub fn reconnect_after(&mut self, relaxes: usize) {
        self.reconnect_in = Some(relaxes);
    }

    /// Make the next `polls` receive polls report `WouldBlock`.
    pub fn stall_rx(&mut self, polls: usize) {
        self.rx_stall = polls;
    }

    /// Make the next `polls` transmit polls report `WouldBlock`.
    pub fn stall_tx(&mut self, polls: usize) {
        self.tx_stall = polls;
    }

    /// How many waiting rounds callers have spent on this device.
    pub fn relax_count(&self) -> usize {
        self.relaxes
    }

    pub fn flush_count(&self) -> usize {
        self.flushes
    }
}

impl Default for MemConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for MemConsole {
    fn try_write_byte(&mut self, byte: u8) -> Result<(), ConsoleError> {
        if self.disconnected {
            return Err(ConsoleError::Disconnected);
        }
        if self.tx_stall > 0 {
            self.tx_stall -= 1;
            return Err(ConsoleError::WouldBlock);
        }
        self.output.push(byte);
        Ok(())
    }

    fn try_read_byte(&mut self) -> Result<u8, ConsoleError> {
        if self.rx_stall > 0 {
            self.rx_stall -= 1;
            return Err(ConsoleError::WouldBlock);
        }
        match self.input.pop_front() {
            Some(byte) => Ok(byte),
            None if self.input_closed => Err(ConsoleError::Disconnected),
            None => Err(ConsoleError::WouldBlock),
        }
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }

    fn relax(&mut self) {
        self.relaxes += 1;
        match self.reconnect_in {
            Some(n) if n <= 1 => {
                self.disconnected = false;
                self.reconnect_in = None;
            }
            Some(n) => self.reconnect_in = Some(n - 1),
            None => {}
        }
    }
}
