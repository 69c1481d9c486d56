//! Runtime I/O Boundary
//!
//! The complete set of operations a running program can use to affect the
//! world outside its memory: `exit`, `putchar`, `getchar`, `readfile` and
//! `writefile`.
//!
//! # Contract
//! - One caller, no reentrancy: every operation takes `&mut self`
//! - `readfile`/`writefile` report failure as a negative errno, never panic
//! - `readfile` never writes more than `buf.len()` bytes, and writes nothing
//!   on failure
//! - `writefile` replaces the whole file or leaves it untouched
//! - `exit` consumes the runtime and never returns
//!
//! The console, store and supervisor are collaborators; the runtime does not
//! model their internals.

use crate::config::RuntimeConfig;
use crate::console::{self, Console, GETCHAR_NONE};
use crate::process::{ExitReason, RunState, Supervisor};
use crate::store::{FileName, FileStore};
use crate::syscall::SyscallError;

/// A program's view of its execution environment.
pub struct Runtime<C, S, P> {
    console: C,
    store: S,
    supervisor: P,
    config: RuntimeConfig,
}

impl<C: Console, S: FileStore, P: Supervisor> Runtime<C, S, P> {
    pub fn new(console: C, store: S, supervisor: P, config: RuntimeConfig) -> Self {
        log::debug!(
            "runtime: input={:?} output={:?}",
            config.input,
            config.output
        );
        Self {
            console,
            store,
            supervisor,
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn supervisor(&self) -> &P {
        &self.supervisor
    }

    pub fn state(&self) -> RunState {
        self.supervisor.state()
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    /// Write one byte to the console.
    ///
    /// Bytes appear in call order. A disconnected console either holds the
    /// caller or loses the byte, per [`OutputPolicy`](crate::config::OutputPolicy).
    pub fn putchar(&mut self, ch: u8) {
        if !self.is_running() {
            log::warn!("runtime: putchar after termination ignored");
            return;
        }
        if !console::put(&mut self.console, ch, self.config.output) {
            log::trace!("runtime: putchar {:#04x} dropped, console disconnected", ch);
        }
    }

    /// Read one byte from the console.
    ///
    /// Returns `0..=255`, or [`GETCHAR_NONE`] when no byte is available.
    /// In blocking mode the sentinel is never returned.
    pub fn getchar(&mut self) -> i32 {
        if !self.is_running() {
            log::warn!("runtime: getchar after termination ignored");
            return GETCHAR_NONE;
        }
        console::get(&mut self.console, self.config.input)
    }

    /// Copy the first `buf.len()` bytes (or fewer) of `path` into `buf`.
    ///
    /// Returns the byte count, or a negative errno.
    pub fn readfile(&mut self, path: &[u8], buf: &mut [u8]) -> i32 {
        let result = self.try_readfile(path, buf);
        to_ret("readfile", path, result)
    }

    /// Make `buf` the complete content of `path`.
    ///
    /// Returns `buf.len()`, or a negative errno.
    pub fn writefile(&mut self, path: &[u8], buf: &[u8]) -> i32 {
        let result = self.try_writefile(path, buf);
        to_ret("writefile", path, result)
    }

    pub fn try_readfile(&mut self, path: &[u8], buf: &mut [u8]) -> Result<usize, SyscallError> {
        self.ensure_running()?;
        check_size(buf.len())?;
        let name = FileName::new(path)?;
        let count = self.store.read(&name, buf)?;
        log::trace!("runtime: readfile {} -> {} bytes", name, count);
        Ok(count)
    }

    pub fn try_writefile(&mut self, path: &[u8], buf: &[u8]) -> Result<usize, SyscallError> {
        self.ensure_running()?;
        check_size(buf.len())?;
        let name = FileName::new(path)?;
        self.store.replace(&name, buf)?;
        log::trace!("runtime: writefile {} <- {} bytes", name, buf.len());
        Ok(buf.len())
    }

    /// Stop the program without leaving the current context.
    ///
    /// Used by the trap layer, which must still return from the exception
    /// handler. Returns `false` if the program had already stopped.
    pub fn terminate(&mut self, reason: ExitReason) -> bool {
        if !self.supervisor.notify_exit(reason) {
            return false;
        }
        self.console.flush();
        match reason {
            ExitReason::Exited => log::info!("runtime: program exited"),
            ExitReason::Fault { .. } => log::warn!("runtime: program killed: {}", reason),
        }
        true
    }

    /// End the program.
    ///
    /// The console is flushed, console and store are released, and control
    /// passes to the supervisor for good.
    pub fn exit(mut self) -> ! {
        self.terminate(ExitReason::Exited);
        let Runtime {
            console,
            store,
            mut supervisor,
            ..
        } = self;
        drop(console);
        drop(store);
        supervisor.park()
    }

    fn ensure_running(&self) -> Result<(), SyscallError> {
        if self.is_running() {
            Ok(())
        } else {
            log::warn!("runtime: file operation after termination refused");
            Err(SyscallError::Esrch)
        }
    }
}

/// Every successful count must be representable in the `int` result.
fn check_size(len: usize) -> Result<(), SyscallError> {
    if len > i32::MAX as usize {
        return Err(SyscallError::Einval);
    }
    Ok(())
}

fn to_ret(op: &str, path: &[u8], result: Result<usize, SyscallError>) -> i32 {
    match result {
        Ok(count) => count as i32,
        Err(err) => {
            log::debug!("runtime: {} \"{}\" failed: {}", op, path.escape_ascii(), err);
            err.code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputMode, OutputPolicy, StoreLimits};
    use crate::console::MemConsole;
    use crate::process::ProcessState;
    use crate::store::{FileMode, RamStore, StoreError, NAME_MAX};
    use alloc::vec::Vec;
    use core::cell::Cell;
    use spin::Mutex;
    use std::panic::{self, AssertUnwindSafe};
    use std::rc::Rc;

    /// Records the lifecycle; parking unwinds so tests can observe it.
    #[derive(Default)]
    struct Recorder {
        process: ProcessState,
    }

    impl Supervisor for Recorder {
        fn state(&self) -> RunState {
            self.process.get()
        }

        fn notify_exit(&mut self, reason: ExitReason) -> bool {
            self.process.terminate(reason)
        }

        fn park(&mut self) -> ! {
            panic!("parked: {:?}", self.process.get())
        }
    }

    /// Store wrapper that reports when it is released.
    struct Tracked {
        inner: RamStore,
        dropped: Rc<Cell<bool>>,
    }

    impl FileStore for Tracked {
        fn read(&self, name: &FileName, dst: &mut [u8]) -> Result<usize, StoreError> {
            self.inner.read(name, dst)
        }

        fn replace(&mut self, name: &FileName, data: &[u8]) -> Result<(), StoreError> {
            self.inner.replace(name, data)
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.dropped.set(true);
        }
    }

    type TestRuntime = Runtime<MemConsole, RamStore, Recorder>;

    fn runtime(config: RuntimeConfig) -> TestRuntime {
        Runtime::new(
            MemConsole::new(),
            RamStore::new(config.store),
            Recorder::default(),
            config,
        )
    }

    fn catch_exit<C: Console, S: FileStore, P: Supervisor>(
        rt: Runtime<C, S, P>,
    ) -> std::thread::Result<()> {
        panic::catch_unwind(AssertUnwindSafe(move || -> () { rt.exit() }))
    }

    #[test]
    fn test_round_trip() {
        let mut rt = runtime(RuntimeConfig::new());
        let data: Vec<u8> = (0..=255u8).collect();
        assert_eq!(rt.writefile(b"blob", &data), 256);

        let mut buf = [0u8; 256];
        assert_eq!(rt.readfile(b"blob", &mut buf), 256);
        assert_eq!(&buf[..], &data[..]);
    }

    #[test]
    fn test_truncating_read() {
        let mut rt = runtime(RuntimeConfig::new());
        assert_eq!(rt.writefile(b"log", b"0123456789"), 10);

        let mut buf = [0xEEu8; 10];
        assert_eq!(rt.readfile(b"log", &mut buf[..4]), 4);
        assert_eq!(&buf[..4], b"0123");
        assert!(buf[4..].iter().all(|&b| b == 0xEE));
    }

    #[test]
    fn test_short_file_read() {
        let mut rt = runtime(RuntimeConfig::new());
        rt.writefile(b"short", b"abc");
        let mut buf = [0u8; 32];
        assert_eq!(rt.readfile(b"short", &mut buf), 3);
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn test_missing_file_leaves_buffer_untouched() {
        let mut rt = runtime(RuntimeConfig::new());
        let mut buf = [0x5Au8; 16];
        assert_eq!(rt.readfile(b"absent", &mut buf), SyscallError::Enoent.code());
        assert!(rt.readfile(b"absent", &mut buf) < 0);
        assert_eq!(buf, [0x5A; 16]);
    }

    #[test]
    fn test_full_replace() {
        let mut rt = runtime(RuntimeConfig::new());
        assert_eq!(rt.writefile(b"cfg", b"first content"), 13);
        assert_eq!(rt.writefile(b"cfg", b"C2"), 2);

        let mut buf = [0u8; 32];
        assert_eq!(rt.readfile(b"cfg", &mut buf), 2);
        assert_eq!(&buf[..2], b"C2");
    }

    #[test]
    fn test_write_failure_is_negative_and_keeps_content() {
        let config = RuntimeConfig::new().with_store(StoreLimits { bytes: 256, files: 4 });
        let mut rt = runtime(config);
        assert_eq!(rt.writefile(b"f", &[1u8; 200]), 200);
        assert_eq!(rt.writefile(b"f", &[2u8; 200]), SyscallError::Enospc.code());

        let mut buf = [0u8; 200];
        assert_eq!(rt.readfile(b"f", &mut buf), 200);
        assert!(buf.iter().all(|&b| b == 1));
    }

    #[test]
    fn test_path_errors() {
        let mut rt = runtime(RuntimeConfig::new());
        let mut buf = [0u8; 4];
        assert_eq!(rt.writefile(b"", b"x"), SyscallError::Einval.code());
        assert_eq!(rt.writefile(b"dir/file", b"x"), SyscallError::Einval.code());
        assert_eq!(
            rt.readfile(&[b'n'; NAME_MAX + 1], &mut buf),
            SyscallError::Enametoolong.code()
        );
    }

    #[test]
    fn test_permission_errors() {
        let mut rt = runtime(RuntimeConfig::new());
        let name = FileName::new(b"ro").unwrap();
        rt.store_mut()
            .insert_with_mode(&name, b"locked", FileMode::READ)
            .unwrap();
        assert_eq!(rt.writefile(b"ro", b"x"), SyscallError::Eacces.code());

        let mut buf = [0u8; 6];
        assert_eq!(rt.readfile(b"ro", &mut buf), 6);
        assert_eq!(&buf, b"locked");
    }

    #[test]
    fn test_putchar_order() {
        let mut rt = runtime(RuntimeConfig::new());
        for &b in b"b1b2b3" {
            rt.putchar(b);
        }
        assert_eq!(rt.console().output(), b"b1b2b3");
    }

    #[test]
    fn test_putchar_drop_policy() {
        let mut rt = runtime(RuntimeConfig::new().with_output(OutputPolicy::Drop));
        rt.console_mut().set_connected(false);
        rt.putchar(b'x');
        rt.console_mut().set_connected(true);
        rt.putchar(b'y');
        assert_eq!(rt.console().output(), b"y");
    }

    #[test]
    fn test_getchar_nonblocking() {
        let mut rt = runtime(RuntimeConfig::new().with_input(InputMode::NonBlocking));
        assert_eq!(rt.getchar(), GETCHAR_NONE);
        rt.console_mut().feed(b"k");
        assert_eq!(rt.getchar(), i32::from(b'k'));
        assert_eq!(rt.getchar(), GETCHAR_NONE);
    }

    #[test]
    fn test_getchar_blocking_returns_next_supplied_byte() {
        let mut rt = runtime(RuntimeConfig::new());
        rt.console_mut().feed(b"mn");
        rt.console_mut().stall_rx(10);
        assert_eq!(rt.getchar(), i32::from(b'm'));
        assert_eq!(rt.console().relax_count(), 10);
        assert_eq!(rt.getchar(), i32::from(b'n'));
    }

    #[test]
    fn test_getchar_through_shared_console() {
        let shared = Mutex::new(MemConsole::new());
        shared.lock().stall_rx(2);
        shared.lock().feed(b"z");
        let store = RamStore::new(StoreLimits::new());
        let mut rt = Runtime::new(&shared, store, Recorder::default(), RuntimeConfig::new());
        assert_eq!(rt.getchar(), i32::from(b'z'));
        assert_eq!(shared.lock().relax_count(), 2);
    }

    #[test]
    fn test_exit_releases_and_parks() {
        let shared = Mutex::new(MemConsole::new());
        let dropped = Rc::new(Cell::new(false));
        let store = Tracked {
            inner: RamStore::new(StoreLimits::new()),
            dropped: Rc::clone(&dropped),
        };
        let mut rt = Runtime::new(&shared, store, Recorder::default(), RuntimeConfig::new());
        rt.putchar(b'!');

        let outcome = catch_exit(rt);
        let payload = outcome.unwrap_err();
        let message = payload.downcast_ref::<String>().cloned().unwrap_or_default();
        assert!(message.contains("Terminated(Exited)"));
        assert!(dropped.get());
        assert_eq!(shared.lock().flush_count(), 1);
        assert_eq!(shared.lock().output(), b"!");
    }

    #[test]
    fn test_nothing_runs_after_termination() {
        let mut rt = runtime(RuntimeConfig::new().with_input(InputMode::NonBlocking));
        rt.console_mut().feed(b"q");
        assert!(rt.terminate(ExitReason::Exited));
        assert!(!rt.terminate(ExitReason::Exited));

        rt.putchar(b'x');
        assert_eq!(rt.getchar(), GETCHAR_NONE);
        assert_eq!(rt.writefile(b"late", b"data"), SyscallError::Esrch.code());
        let mut buf = [0u8; 4];
        assert_eq!(rt.readfile(b"late", &mut buf), SyscallError::Esrch.code());

        assert!(rt.console().output().is_empty());
        assert_eq!(rt.console().pending_input(), 1);
        assert!(rt.store().is_empty());
        assert_eq!(rt.state(), RunState::Terminated(ExitReason::Exited));
    }

    #[test]
    fn test_exit_after_fault_keeps_fault_reason() {
        let mut rt = runtime(RuntimeConfig::new());
        let fault = ExitReason::Fault { esr: 0x9200_0000, far: 0x8 };
        assert!(rt.terminate(fault));
        let payload = catch_exit(rt).unwrap_err();
        let message = payload.downcast_ref::<String>().cloned().unwrap_or_default();
        assert!(message.contains("Fault"));
    }
}
