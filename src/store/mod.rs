//! Flat file store
//!
//! A single-level namespace of named byte strings. The only operations are a
//! bounded read from the start of a file and a full replacement of its
//! content; there are no directories, offsets or metadata beyond a mode.

pub mod ram;

pub use ram::RamStore;

use core::cmp::Ordering;
use core::fmt;

use bitflags::bitflags;

/// Maximum length of a file name in bytes.
pub const NAME_MAX: usize = 64;

bitflags! {
    /// Access permitted on a stored file.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileMode: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl Default for FileMode {
    fn default() -> Self {
        Self::READ_WRITE
    }
}

/// Error type for store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// No file has this name.
    NotFound,
    /// The store cannot hold the new content.
    NoSpace,
    /// The name is empty or contains `/` or NUL.
    InvalidName,
    /// The name is longer than [`NAME_MAX`].
    NameTooLong,
    /// The file's mode forbids the operation.
    PermissionDenied,
    /// The backing medium failed.
    Io,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "file not found"),
            Self::NoSpace => write!(f, "store full"),
            Self::InvalidName => write!(f, "invalid file name"),
            Self::NameTooLong => write!(f, "file name too long"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::Io => write!(f, "i/o error"),
        }
    }
}

/// A validated flat file name.
///
/// Stored inline so that lookups never allocate.
#[derive(Clone, Copy)]
pub struct FileName {
    bytes: [u8; NAME_MAX],
    len: u8,
}

impl FileName {
    /// Validate a name.
    ///
    /// Names are 1..=`NAME_MAX` bytes of anything except `/` and NUL.
    pub fn new(name: &[u8]) -> Result<Self, StoreError> {
        if name.is_empty() {
            return Err(StoreError::InvalidName);
        }
        if name.len() > NAME_MAX {
            return Err(StoreError::NameTooLong);
        }
        if name.iter().any(|&b| b == b'/' || b == 0) {
            return Err(StoreError::InvalidName);
        }

        let mut bytes = [0u8; NAME_MAX];
        bytes[..name.len()].copy_from_slice(name);
        Ok(Self {
            bytes,
            len: name.len() as u8,
        })
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// The name as UTF-8, if it is.
    pub fn to_str(&self) -> Option<&str> {
        core::str::from_utf8(self.as_bytes()).ok()
    }
}

impl PartialEq for FileName {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for FileName {}

impl PartialOrd for FileName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl fmt::Debug for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileName(\"{}\")", self.as_bytes().escape_ascii())
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_bytes().escape_ascii())
    }
}

/// Backing storage for `readfile`/`writefile`.
pub trait FileStore {
    /// Copy up to `dst.len()` bytes from the start of `name` into `dst`.
    ///
    /// Returns the number of bytes copied. On error `dst` is not written.
    fn read(&self, name: &FileName, dst: &mut [u8]) -> Result<usize, StoreError>;

    /// Make `data` the complete content of `name`, creating it if needed.
    ///
    /// On error the previous content of `name` (or its absence) is unchanged.
    fn replace(&mut self, name: &FileName, data: &[u8]) -> Result<(), StoreError>;
}
