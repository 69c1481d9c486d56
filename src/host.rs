//! Hosted substrates
//!
//! Run a program under an ordinary operating system: stdio is the console,
//! one directory is the flat file store, and `exit` ends the host process.
//! Pair these with [`RuntimeConfig::hosted`](crate::config::RuntimeConfig::hosted).

use std::fs;
use std::io::{self, ErrorKind, Read, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;

use crate::console::{Console, ConsoleError};
use crate::process::{ExitReason, ProcessState, RunState, Supervisor};
use crate::store::{FileName, FileStore, StoreError};

/// Console over the process's stdin and stdout.
///
/// Input is read by a helper thread and handed over through a channel, so
/// polling never blocks: an open but idle stdin is `WouldBlock`, end-of-file
/// is `Disconnected`. The thread starts on the first read.
pub struct StdConsole {
    input: Input,
    output: Box<dyn Write + Send>,
}

enum Input {
    Idle(Box<dyn Read + Send>),
    Reading(Receiver<u8>),
}

impl StdConsole {
    pub fn new() -> Self {
        Self::with_streams(io::stdin(), io::stdout())
    }

    /// Console over arbitrary streams instead of stdio.
    pub fn with_streams(
        input: impl Read + Send + 'static,
        output: impl Write + Send + 'static,
    ) -> Self {
        Self {
            input: Input::Idle(Box::new(input)),
            output: Box::new(output),
        }
    }

    fn receiver(&mut self) -> Result<&Receiver<u8>, ConsoleError> {
        if let Input::Idle(_) = self.input {
            let (tx, rx) = mpsc::channel();
            let Input::Idle(source) = mem::replace(&mut self.input, Input::Reading(rx)) else {
                return Err(ConsoleError::Disconnected);
            };
            thread::Builder::new()
                .name("stdin-reader".into())
                .spawn(move || pump(source, tx))
                .map_err(|err| {
                    log::warn!("stdconsole: cannot start input thread: {}", err);
                    ConsoleError::Disconnected
                })?;
        }
        match &self.input {
            Input::Reading(rx) => Ok(rx),
            Input::Idle(_) => Err(ConsoleError::Disconnected),
        }
    }
}

/// Forward bytes until end-of-file or a hard error; dropping `tx` reports
/// the input closed.
fn pump(mut source: Box<dyn Read + Send>, tx: Sender<u8>) {
    let mut buf = [0u8; 256];
    loop {
        match source.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                for &byte in &buf[..n] {
                    if tx.send(byte).is_err() {
                        return;
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                log::debug!("stdconsole: input closed: {}", err);
                return;
            }
        }
    }
}

impl Default for StdConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for StdConsole {
    fn try_write_byte(&mut self, byte: u8) -> Result<(), ConsoleError> {
        let out = &mut self.output;
        let result = out.write_all(&[byte]).and_then(|()| {
            if byte == b'\n' {
                out.flush()
            } else {
                Ok(())
            }
        });
        result.map_err(|e| match e.kind() {
            ErrorKind::Interrupted | ErrorKind::WouldBlock => ConsoleError::WouldBlock,
            _ => ConsoleError::Disconnected,
        })
    }

    fn try_read_byte(&mut self) -> Result<u8, ConsoleError> {
        match self.receiver()?.try_recv() {
            Ok(byte) => Ok(byte),
            Err(TryRecvError::Empty) => Err(ConsoleError::WouldBlock),
            Err(TryRecvError::Disconnected) => Err(ConsoleError::Disconnected),
        }
    }

    fn flush(&mut self) {
        let _ = self.output.flush();
    }

    fn relax(&mut self) {
        thread::yield_now();
    }
}

/// A flat file store kept in one host directory.
///
/// Names must be UTF-8 and must not be `.`, `..` or [`STAGING_DIR`].
/// Replacement writes the new content under `STAGING_DIR` and renames it
/// over the target, so the old content survives any failure.
#[derive(Debug)]
pub struct DirStore {
    root: PathBuf,
}

/// Subdirectory of the root holding partially written files. It is not a
/// file name the store hands out.
pub const STAGING_DIR: &str = ".staging";

impl DirStore {
    /// Use `root` as the store, creating it if needed.
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(STAGING_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &FileName) -> Result<PathBuf, StoreError> {
        let name = name.to_str().ok_or(StoreError::InvalidName)?;
        if matches!(name, "." | ".." | STAGING_DIR) {
            return Err(StoreError::InvalidName);
        }
        Ok(self.root.join(name))
    }

    fn staging_path(&self, name: &FileName) -> Result<PathBuf, StoreError> {
        let name = name.to_str().ok_or(StoreError::InvalidName)?;
        Ok(self
            .root
            .join(STAGING_DIR)
            .join(format!("{}.{}", name, std::process::id())))
    }
}

/// ENOSPC on Linux and macOS
const ENOSPC: i32 = 28;

fn map_io(err: io::Error) -> StoreError {
    match err.kind() {
        ErrorKind::NotFound => StoreError::NotFound,
        ErrorKind::PermissionDenied => StoreError::PermissionDenied,
        _ if err.raw_os_error() == Some(ENOSPC) => StoreError::NoSpace,
        _ => StoreError::Io,
    }
}

impl FileStore for DirStore {
    fn read(&self, name: &FileName, dst: &mut [u8]) -> Result<usize, StoreError> {
        let path = self.path_of(name)?;
        let file = fs::File::open(&path).map_err(map_io)?;
        if file.metadata().map_err(map_io)?.is_dir() {
            return Err(StoreError::NotFound);
        }

        // Stage the bytes so a mid-read failure leaves `dst` untouched
        let mut staged = Vec::with_capacity(dst.len());
        file.take(dst.len() as u64)
            .read_to_end(&mut staged)
            .map_err(map_io)?;
        dst[..staged.len()].copy_from_slice(&staged);
        Ok(staged.len())
    }

    fn replace(&mut self, name: &FileName, data: &[u8]) -> Result<(), StoreError> {
        let target = self.path_of(name)?;
        let staging = self.staging_path(name)?;

        let written = fs::write(&staging, data).and_then(|()| fs::rename(&staging, &target));
        if let Err(err) = written {
            let _ = fs::remove_file(&staging);
            log::debug!("dirstore: replace {} failed: {}", name, err);
            return Err(map_io(err));
        }
        Ok(())
    }
}

/// Supervisor that ends the host process when the program exits.
///
/// Exit status is 0 after `exit` and 1 after a fault.
#[derive(Debug, Default)]
pub struct ProcessExit {
    process: ProcessState,
}

impl ProcessExit {
    pub const fn new() -> Self {
        Self {
            process: ProcessState::new(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.process.get() {
            RunState::Terminated(ExitReason::Fault { .. }) => 1,
            _ => 0,
        }
    }
}

impl Supervisor for ProcessExit {
    fn state(&self) -> RunState {
        self.process.get()
    }

    fn notify_exit(&mut self, reason: ExitReason) -> bool {
        self.process.terminate(reason)
    }

    fn park(&mut self) -> ! {
        let _ = io::stdout().flush();
        std::process::exit(self.exit_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::console::{MemConsole, GETCHAR_NONE};
    use crate::runtime::Runtime;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    fn name(s: &str) -> FileName {
        FileName::new(s.as_bytes()).unwrap()
    }

    #[test]
    fn test_dir_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirStore::open(dir.path()).unwrap();

        store.replace(&name("data.bin"), b"0123456789").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(store.read(&name("data.bin"), &mut buf), Ok(4));
        assert_eq!(&buf, b"0123");

        store.replace(&name("data.bin"), b"z").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(store.read(&name("data.bin"), &mut buf), Ok(1));
        assert_eq!(fs::read(dir.path().join("data.bin")).unwrap(), b"z");
    }

    #[test]
    fn test_dir_store_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirStore::open(dir.path()).unwrap();
        let mut buf = [9u8; 4];
        assert_eq!(store.read(&name("nothing"), &mut buf), Err(StoreError::NotFound));
        assert_eq!(buf, [9; 4]);

        assert_eq!(store.replace(&name(".."), b"x"), Err(StoreError::InvalidName));
        let latin1 = FileName::new(b"caf\xe9").unwrap();
        assert_eq!(store.replace(&latin1, b"x"), Err(StoreError::InvalidName));
    }

    #[test]
    fn test_dir_store_leaves_no_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirStore::open(dir.path()).unwrap();
        store.replace(&name("a"), b"1").unwrap();
        store.replace(&name("a"), b"2").unwrap();

        let mut entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        entries.sort();
        assert_eq!(entries, [STAGING_DIR, "a"]);
        assert_eq!(fs::read_dir(dir.path().join(STAGING_DIR)).unwrap().count(), 0);
    }

    #[test]
    fn test_dir_store_names_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirStore::open(dir.path()).unwrap();
        let pid = std::process::id();
        let neighbours = [format!(".x.{}.partial", pid), format!("x.{}", pid)];
        for other in &neighbours {
            store.replace(&name(other), b"precious").unwrap();
        }

        store.replace(&name("x"), b"other").unwrap();
        for other in &neighbours {
            let mut buf = [0u8; 8];
            assert_eq!(store.read(&name(other), &mut buf), Ok(8));
            assert_eq!(&buf, b"precious");
        }
    }

    #[test]
    fn test_dir_store_staging_dir_is_reserved() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirStore::open(dir.path()).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(store.replace(&name(STAGING_DIR), b"x"), Err(StoreError::InvalidName));
        assert_eq!(store.read(&name(STAGING_DIR), &mut buf), Err(StoreError::InvalidName));
    }

    #[test]
    fn test_dir_store_directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let store = DirStore::open(dir.path()).unwrap();
        let mut buf = [0u8; 4];
        assert!(store.read(&name("sub"), &mut buf).is_err());
    }

    #[test]
    fn test_runtime_over_dir_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::open(dir.path().join("nested")).unwrap();
        let config = RuntimeConfig::hosted();
        let mut rt = Runtime::new(MemConsole::new(), store, ProcessExit::new(), config);

        assert_eq!(rt.writefile(b"report", b"all good"), 8);
        let mut buf = [0u8; 8];
        assert_eq!(rt.readfile(b"report", &mut buf), 8);
        assert_eq!(&buf, b"all good");
        assert_eq!(rt.store().root(), dir.path().join("nested"));
    }

    /// An input stream that stays open until its sender is dropped.
    struct OpenPipe(mpsc::Receiver<Vec<u8>>);

    impl Read for OpenPipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.recv() {
                Ok(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Err(_) => Ok(0),
            }
        }
    }

    #[derive(Clone, Default)]
    struct Capture {
        bytes: Arc<Mutex<Vec<u8>>>,
        flushes: Arc<AtomicUsize>,
    }

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.bytes.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Poll until the reader thread delivers something other than `WouldBlock`.
    fn next_event(console: &mut StdConsole) -> Result<u8, ConsoleError> {
        for _ in 0..5000 {
            match console.try_read_byte() {
                Err(ConsoleError::WouldBlock) => thread::sleep(Duration::from_millis(1)),
                other => return other,
            }
        }
        panic!("no input event within 5s");
    }

    #[test]
    fn test_std_console_idle_input_does_not_block() {
        let (tx, rx) = mpsc::channel();
        let console = StdConsole::with_streams(OpenPipe(rx), io::sink());
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::open(dir.path()).unwrap();
        let mut rt = Runtime::new(console, store, ProcessExit::new(), RuntimeConfig::hosted());

        let started = Instant::now();
        assert_eq!(rt.getchar(), GETCHAR_NONE);
        assert_eq!(rt.getchar(), GETCHAR_NONE);
        assert!(started.elapsed() < Duration::from_secs(1));

        tx.send(b"hi".to_vec()).unwrap();
        assert_eq!(next_event(rt.console_mut()), Ok(b'h'));
        assert_eq!(rt.getchar(), i32::from(b'i'));

        drop(tx);
        assert_eq!(next_event(rt.console_mut()), Err(ConsoleError::Disconnected));
    }

    #[test]
    fn test_std_console_end_of_input_is_disconnected() {
        let mut console = StdConsole::with_streams(&b"x"[..], io::sink());
        assert_eq!(next_event(&mut console), Ok(b'x'));
        assert_eq!(next_event(&mut console), Err(ConsoleError::Disconnected));
        assert_eq!(console.try_read_byte(), Err(ConsoleError::Disconnected));
    }

    #[test]
    fn test_std_console_flushes_on_newline() {
        let capture = Capture::default();
        let mut console = StdConsole::with_streams(io::empty(), capture.clone());

        console.try_write_byte(b'o').unwrap();
        console.try_write_byte(b'k').unwrap();
        assert_eq!(capture.flushes.load(AtomicOrdering::SeqCst), 0);
        console.try_write_byte(b'\n').unwrap();
        assert_eq!(capture.flushes.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(*capture.bytes.lock().unwrap(), b"ok\n");
    }

    #[test]
    fn test_std_console_broken_pipe_is_disconnected() {
        let mut console = StdConsole::with_streams(io::empty(), BrokenPipe);
        assert_eq!(console.try_write_byte(b'a'), Err(ConsoleError::Disconnected));

        // The hosted drop policy loses the byte instead of spinning
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::open(dir.path()).unwrap();
        let mut rt = Runtime::new(console, store, ProcessExit::new(), RuntimeConfig::hosted());
        rt.putchar(b'a');
        assert!(rt.is_running());
    }

    #[test]
    fn test_exit_codes() {
        let mut supervisor = ProcessExit::new();
        assert_eq!(supervisor.exit_code(), 0);
        supervisor.notify_exit(ExitReason::Fault { esr: 0, far: 0 });
        assert_eq!(supervisor.exit_code(), 1);
    }
}
