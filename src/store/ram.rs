//! In-memory flat file store
//!
//! File contents live in one fixed-size arena, carved into extents by
//! `linked_list_allocator`. The arena never grows, so "store full" is a real,
//! reportable condition rather than an allocation failure in the kernel heap.
//!
//! # Memory Layout
//! ```text
//! arena: [ extent "a" | hole | extent "config" | ... | hole ]
//! files: BTreeMap<FileName, Entry { extent, mode }>
//! ```
//!
//! # Security Considerations
//! - Extents are scrubbed with volatile writes before they return to the arena
//! - A replacement allocates the new extent before releasing the old one, so
//!   a failed write leaves the previous content in place

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec;
use core::alloc::Layout;
use core::ptr::{self, NonNull};
use core::sync::atomic::{compiler_fence, Ordering};

use linked_list_allocator::Heap;

use super::{FileMode, FileName, FileStore, StoreError};
use crate::config::StoreLimits;

/// Smallest arena the allocator can manage (hole metadata plus alignment slack).
pub const MIN_ARENA_BYTES: usize = 4 * core::mem::size_of::<usize>();

/// One file's content inside the arena.
struct Extent {
    ptr: NonNull<u8>,
    layout: Layout,
}

struct Entry {
    /// `None` for an empty file.
    extent: Option<Extent>,
    mode: FileMode,
}

/// A flat file store held entirely in memory.
pub struct RamStore {
    arena: NonNull<[u8]>,
    heap: Heap,
    files: BTreeMap<FileName, Entry>,
    max_files: usize,
}

// SAFETY: the arena and every extent pointer are owned exclusively by the
// store; nothing else holds references into them.
unsafe impl Send for RamStore {}

impl RamStore {
    /// Create an empty store. Arenas smaller than [`MIN_ARENA_BYTES`] are
    /// rounded up.
    pub fn new(limits: StoreLimits) -> Self {
        let bytes = limits.bytes.max(MIN_ARENA_BYTES);
        let arena = NonNull::from(Box::leak(vec![0u8; bytes].into_boxed_slice()));

        let mut heap = Heap::empty();
        // SAFETY:
        // - arena is a fresh allocation of `bytes` bytes
        // - it is only reachable through this store and freed in Drop
        // - bytes >= MIN_ARENA_BYTES, enough for the allocator's metadata
        unsafe {
            heap.init(arena.as_ptr() as *mut u8, bytes);
        }

        Self {
            arena,
            heap,
            files: BTreeMap::new(),
            max_files: limits.files,
        }
    }

    /// Create or overwrite a file with an explicit mode.
    ///
    /// Unlike [`FileStore::replace`] this ignores the current mode; it is the
    /// provisioning path used to seed a store before a program runs.
    pub fn insert_with_mode(
        &mut self,
        name: &FileName,
        data: &[u8],
        mode: FileMode,
    ) -> Result<(), StoreError> {
        if !self.files.contains_key(name) && self.files.len() >= self.max_files {
            return Err(StoreError::NoSpace);
        }
        self.install(name, data, mode)
    }

    /// Change the mode of an existing file.
    pub fn set_mode(&mut self, name: &FileName, mode: FileMode) -> Result<(), StoreError> {
        let entry = self.files.get_mut(name).ok_or(StoreError::NotFound)?;
        entry.mode = mode;
        Ok(())
    }

    pub fn mode(&self, name: &FileName) -> Option<FileMode> {
        self.files.get(name).map(|entry| entry.mode)
    }

    pub fn contains(&self, name: &FileName) -> bool {
        self.files.contains_key(name)
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// File names in byte order.
    pub fn names(&self) -> impl Iterator<Item = &FileName> {
        self.files.keys()
    }

    /// Arena bytes not currently holding file content.
    pub fn free_bytes(&self) -> usize {
        self.heap.free()
    }

    /// Total arena size.
    pub fn capacity(&self) -> usize {
        self.heap.size()
    }

    fn install(&mut self, name: &FileName, data: &[u8], mode: FileMode) -> Result<(), StoreError> {
        let extent = self.allocate(data)?;
        let previous = self.files.insert(*name, Entry { extent, mode });
        if let Some(old) = previous.and_then(|entry| entry.extent) {
            self.release(old);
        }
        log::trace!("ramstore: {} <- {} bytes", name, data.len());
        Ok(())
    }

    fn allocate(&mut self, data: &[u8]) -> Result<Option<Extent>, StoreError> {
        if data.is_empty() {
            return Ok(None);
        }
        let layout = Layout::array::<u8>(data.len()).map_err(|_| StoreError::NoSpace)?;
        let ptr = self
            .heap
            .allocate_first_fit(layout)
            .map_err(|()| StoreError::NoSpace)?;

        // SAFETY: ptr is a fresh arena block of layout.size() == data.len()
        // bytes, disjoint from `data`
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len());
        }
        Ok(Some(Extent { ptr, layout }))
    }

    fn release(&mut self, extent: Extent) {
        // SAFETY: extent came from allocate_first_fit on this heap with this
        // layout and is released exactly once
        unsafe {
            scrub(extent.ptr.as_ptr(), extent.layout.size());
            self.heap.deallocate(extent.ptr, extent.layout);
        }
    }

    fn content(entry: &Entry) -> &[u8] {
        match &entry.extent {
            // SAFETY: the extent is a live arena block of layout.size() bytes,
            // initialized in allocate and only freed by release
            Some(extent) => unsafe {
                core::slice::from_raw_parts(extent.ptr.as_ptr(), extent.layout.size())
            },
            None => &[],
        }
    }
}

impl FileStore for RamStore {
    fn read(&self, name: &FileName, dst: &mut [u8]) -> Result<usize, StoreError> {
        let entry = self.files.get(name).ok_or(StoreError::NotFound)?;
        if !entry.mode.contains(FileMode::READ) {
            return Err(StoreError::PermissionDenied);
        }

        let content = Self::content(entry);
        let count = content.len().min(dst.len());
        dst[..count].copy_from_slice(&content[..count]);
        Ok(count)
    }

    fn replace(&mut self, name: &FileName, data: &[u8]) -> Result<(), StoreError> {
        let mode = match self.files.get(name) {
            Some(entry) if !entry.mode.contains(FileMode::WRITE) => {
                return Err(StoreError::PermissionDenied);
            }
            Some(entry) => entry.mode,
            None if self.files.len() >= self.max_files => return Err(StoreError::NoSpace),
            None => FileMode::default(),
        };
        self.install(name, data, mode)
    }
}

impl Drop for RamStore {
    fn drop(&mut self) {
        let len = self.arena.len();
        // SAFETY: the arena was leaked from a Box in new and is reclaimed
        // exactly once, here; no extent outlives the store
        unsafe {
            scrub(self.arena.as_ptr() as *mut u8, len);
            drop(Box::from_raw(self.arena.as_ptr()));
        }
    }
}

/// Volatile memset to zero that cannot be optimized away.
///
/// # Safety
/// `dst` must be valid for writes of `count` bytes.
unsafe fn scrub(dst: *mut u8, count: usize) {
    for i in 0..count {
        // SAFETY: Caller guarantees dst is valid for count bytes
        unsafe {
            ptr::write_volatile(dst.add(i), 0);
        }
    }
    compiler_fence(Ordering::SeqCst);
}
