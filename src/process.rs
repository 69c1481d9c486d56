//! Process lifecycle
//!
//! A program is `Running` from the moment its runtime exists and becomes
//! `Terminated` exactly once. The state lives in an explicit token held by
//! the supervisor; nothing else records whether the program is alive.
//!
//! ```text
//! Running --exit()--------------> Terminated(Exited)
//!         --abort from EL0------> Terminated(Fault { .. })
//! ```

use core::fmt;

/// Why a program stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The program called `exit`.
    Exited,
    /// The program was stopped by an exception it cannot recover from.
    Fault {
        /// Exception Syndrome Register at the time of the fault
        esr: u64,
        /// Fault Address Register at the time of the fault
        far: u64,
    },
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited => write!(f, "exited"),
            Self::Fault { esr, far } => write!(f, "fault (esr={:#x}, far={:#x})", esr, far),
        }
    }
}

/// Lifecycle state of the supervised program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Terminated(ExitReason),
}

/// The once-only running → terminated token.
#[derive(Debug)]
pub struct ProcessState {
    state: RunState,
}

impl ProcessState {
    pub const fn new() -> Self {
        Self {
            state: RunState::Running,
        }
    }

    #[inline]
    pub fn get(&self) -> RunState {
        self.state
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    /// Move to `Terminated(reason)`.
    ///
    /// Returns `false` and keeps the first reason if already terminated.
    pub fn terminate(&mut self, reason: ExitReason) -> bool {
        match self.state {
            RunState::Running => {
                self.state = RunState::Terminated(reason);
                true
            }
            RunState::Terminated(_) => false,
        }
    }
}

impl Default for ProcessState {
    fn default() -> Self {
        Self::new()
    }
}

/// The collaborator that owns a program's lifecycle.
pub trait Supervisor {
    fn state(&self) -> RunState;

    /// Record that the program has stopped. Returns `false` if it already had.
    fn notify_exit(&mut self, reason: ExitReason) -> bool;

    /// Take control away from the terminated program for good.
    fn park(&mut self) -> !;

    fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }
}

/// Supervisor for a bare-metal single-program system: parking stops the CPU.
#[derive(Debug, Default)]
pub struct Halt {
    process: ProcessState,
}

impl Halt {
    pub const fn new() -> Self {
        Self {
            process: ProcessState::new(),
        }
    }
}

impl Supervisor for Halt {
    fn state(&self) -> RunState {
        self.process.get()
    }

    fn notify_exit(&mut self, reason: ExitReason) -> bool {
        self.process.terminate(reason)
    }

    fn park(&mut self) -> ! {
        log::info!("process: halting ({:?})", self.process.get());
        halt()
    }
}

/// Halt the CPU in a low-power state
pub fn halt() -> ! {
    loop {
        wait_for_interrupt();
    }
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
fn wait_for_interrupt() {
    // SAFETY: WFI is always safe to execute
    unsafe {
        core::arch::asm!("wfi", options(nostack, nomem));
    }
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
fn wait_for_interrupt() {
    core::hint::spin_loop();
}
