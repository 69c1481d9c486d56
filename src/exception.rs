//! ARM64 Exception Handling
//!
//! Routes synchronous exceptions taken from a program into the runtime.
//!
//! # Exception Levels
//! - EL0: User programs
//! - EL1: Kernel (where we run)
//!
//! # Exception Types
//! - SVC: system calls, dispatched to the runtime boundary
//! - Instruction/data aborts: the program is killed
//! - Anything else from EL0: the program is killed
//!
//! # Security Considerations
//! - A program that faults never resumes
//! - Register state is only modified in x0 (the syscall result)

use crate::console::Console;
use crate::process::{ExitReason, Supervisor};
use crate::runtime::Runtime;
use crate::store::FileStore;
use crate::syscall::{self, SyscallOutcome, UserSpace};

/// Exception context saved on the stack
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ExceptionContext {
    /// General purpose registers x0-x30
    pub gpr: [u64; 31],
    /// Exception Link Register (return address)
    pub elr: u64,
    /// Saved Program Status Register
    pub spsr: u64,
    /// Exception Syndrome Register
    pub esr: u64,
    /// Fault Address Register
    pub far: u64,
}

impl ExceptionContext {
    /// An all-zero context.
    pub const fn zeroed() -> Self {
        Self {
            gpr: [0; 31],
            elr: 0,
            spsr: 0,
            esr: 0,
            far: 0,
        }
    }

    /// The context of an `svc #0` with `num` in x8 and `args` in x0-x2.
    pub const fn svc(num: u64, args: [u64; 3]) -> Self {
        let mut ctx = Self::zeroed();
        ctx.gpr[0] = args[0];
        ctx.gpr[1] = args[1];
        ctx.gpr[2] = args[2];
        ctx.gpr[8] = num;
        ctx.esr = (ExceptionClass::SvcAarch64 as u64) << 26;
        ctx
    }
}

/// Exception class extracted from ESR_EL1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionClass {
    Unknown = 0x00,
    SvcAarch64 = 0x15,
    InstructionAbortLowerEl = 0x20,
    InstructionAbortSameEl = 0x21,
    DataAbortLowerEl = 0x24,
    DataAbortSameEl = 0x25,
    Other = 0xFF,
}

impl From<u64> for ExceptionClass {
    fn from(esr: u64) -> Self {
        let ec = ((esr >> 26) & 0x3F) as u8;
        match ec {
            0x00 => ExceptionClass::Unknown,
            0x15 => ExceptionClass::SvcAarch64,
            0x20 => ExceptionClass::InstructionAbortLowerEl,
            0x21 => ExceptionClass::InstructionAbortSameEl,
            0x24 => ExceptionClass::DataAbortLowerEl,
            0x25 => ExceptionClass::DataAbortSameEl,
            _ => ExceptionClass::Other,
        }
    }
}

/// Whether the kernel may return to the program after a trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapOutcome {
    /// `eret` back into the program.
    Resume,
    /// The program is terminated; hand control to the supervisor.
    Exited,
}

/// Handle a synchronous exception from lower EL (user mode)
///
/// This is the main entry point for syscalls (SVC instruction). The vector
/// stub saves `ctx`, calls this, and restores `ctx` only on `Resume`.
pub fn handle_sync_exception_lower_el<C, S, P>(
    ctx: &mut ExceptionContext,
    user: &mut UserSpace<'_>,
    rt: &mut Runtime<C, S, P>,
) -> TrapOutcome
where
    C: Console,
    S: FileStore,
    P: Supervisor,
{
    let ec = ExceptionClass::from(ctx.esr);

    match ec {
        ExceptionClass::SvcAarch64 => {
            let syscall_num = ctx.gpr[8] as usize; // x8 = syscall number
            match syscall::dispatch(syscall_num, ctx, user, rt) {
                SyscallOutcome::Return(result) => {
                    ctx.gpr[0] = result as u64; // Return value in x0
                    TrapOutcome::Resume
                }
                SyscallOutcome::Exited => TrapOutcome::Exited,
            }
        }
        ExceptionClass::DataAbortLowerEl | ExceptionClass::InstructionAbortLowerEl => {
            log::warn!("[EXCEPTION] User mode abort at 0x{:016x}", ctx.far);
            log::warn!("[EXCEPTION] ESR: 0x{:016x}", ctx.esr);
            kill(ctx, rt)
        }
        _ => {
            log::warn!("[EXCEPTION] Unhandled exception from user mode");
            log::warn!("[EXCEPTION] EC: {:?}, ESR: 0x{:016x}", ec, ctx.esr);
            kill(ctx, rt)
        }
    }
}

fn kill<C: Console, S: FileStore, P: Supervisor>(
    ctx: &ExceptionContext,
    rt: &mut Runtime<C, S, P>,
) -> TrapOutcome {
    rt.terminate(ExitReason::Fault {
        esr: ctx.esr,
        far: ctx.far,
    });
    TrapOutcome::Exited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::console::MemConsole;
    use crate::process::{Halt, RunState};
    use crate::store::RamStore;
    use crate::syscall::numbers;
    use alloc::vec;

    fn runtime() -> Runtime<MemConsole, RamStore, Halt> {
        let config = RuntimeConfig::new();
        Runtime::new(MemConsole::new(), RamStore::new(config.store), Halt::new(), config)
    }

    #[test]
    fn test_exception_class_decode() {
        assert_eq!(ExceptionClass::from(0x15u64 << 26), ExceptionClass::SvcAarch64);
        assert_eq!(ExceptionClass::from(0x24u64 << 26 | 0x46), ExceptionClass::DataAbortLowerEl);
        assert_eq!(ExceptionClass::from(0x3Fu64 << 26), ExceptionClass::Other);
    }

    #[test]
    fn test_svc_result_in_x0() {
        let mut mem = vec![0u8; 16];
        let mut user = UserSpace::at_user_start(&mut mem);
        let mut rt = runtime();
        rt.console_mut().feed(b"g");

        let mut ctx = ExceptionContext::svc(numbers::SYS_GETCHAR as u64, [0xDEAD, 0, 0]);
        let outcome = handle_sync_exception_lower_el(&mut ctx, &mut user, &mut rt);
        assert_eq!(outcome, TrapOutcome::Resume);
        assert_eq!(ctx.gpr[0], u64::from(b'g'));
    }

    #[test]
    fn test_negative_result_sign_extends() {
        let mut mem = vec![0u8; 16];
        let mut user = UserSpace::at_user_start(&mut mem);
        let mut rt = runtime();

        let mut ctx = ExceptionContext::svc(77, [0; 3]);
        handle_sync_exception_lower_el(&mut ctx, &mut user, &mut rt);
        assert_eq!(ctx.gpr[0] as i64, -38);
    }

    #[test]
    fn test_exit_does_not_resume() {
        let mut mem = vec![0u8; 16];
        let mut user = UserSpace::at_user_start(&mut mem);
        let mut rt = runtime();

        let mut ctx = ExceptionContext::svc(numbers::SYS_EXIT as u64, [5, 6, 7]);
        let outcome = handle_sync_exception_lower_el(&mut ctx, &mut user, &mut rt);
        assert_eq!(outcome, TrapOutcome::Exited);
        assert_eq!(ctx.gpr[0], 5);
        assert_eq!(rt.state(), RunState::Terminated(ExitReason::Exited));
    }

    #[test]
    fn test_abort_kills_program() {
        let mut mem = vec![0u8; 16];
        let mut user = UserSpace::at_user_start(&mut mem);
        let mut rt = runtime();

        let mut ctx = ExceptionContext::zeroed();
        ctx.esr = 0x24 << 26;
        ctx.far = 0xBAD0;
        let outcome = handle_sync_exception_lower_el(&mut ctx, &mut user, &mut rt);
        assert_eq!(outcome, TrapOutcome::Exited);
        assert_eq!(
            rt.state(),
            RunState::Terminated(ExitReason::Fault { esr: 0x24 << 26, far: 0xBAD0 })
        );

        // Later traps from the same program are not serviced
        let mut ctx = ExceptionContext::svc(numbers::SYS_PUTCHAR as u64, [b'x' as u64, 0, 0]);
        let outcome = handle_sync_exception_lower_el(&mut ctx, &mut user, &mut rt);
        assert_eq!(outcome, TrapOutcome::Exited);
        assert!(rt.console().output().is_empty());
    }

    #[test]
    fn test_unknown_class_kills_program() {
        let mut mem = vec![0u8; 16];
        let mut user = UserSpace::at_user_start(&mut mem);
        let mut rt = runtime();

        let mut ctx = ExceptionContext::zeroed();
        let outcome = handle_sync_exception_lower_el(&mut ctx, &mut user, &mut rt);
        assert_eq!(outcome, TrapOutcome::Exited);
        assert!(!rt.is_running());
    }
}
