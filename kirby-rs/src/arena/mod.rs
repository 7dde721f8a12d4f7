//! Region allocator backing every buffer the parser and session create.
//!
//! An [`Arena`] reserves one large range of address space up front with
//! `PROT_NONE` and commits pages on demand with `mprotect`, doubling the
//! committed size each time it runs out.  Because the reservation is never
//! remapped, nothing handed out by an arena ever moves.
//!
//! Every allocation is preceded by an 8-byte header holding its logical size.
//! [`Arena::realloc`] uses the header to decide whether a block is the
//! trailing one (grow or shrink in place by moving the bump offset) or must be
//! copied to a fresh block.  Individual blocks are never freed; the arena is
//! the unit of reclamation.
//!
//! Allocation takes `&self` and returns a borrow tied to the arena, while
//! [`Arena::reset`] takes `&mut self`.  The borrow checker therefore rejects
//! any attempt to keep a block alive across a reset.

use std::cell::Cell;
use std::io;
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};
use std::slice;

use thiserror::Error;
use tracing::{debug, error, trace};

mod vec;

pub use vec::ArenaVec;

/// Address space reserved by [`Arena::new`].
#[cfg(target_pointer_width = "64")]
pub const DEFAULT_RESERVE: usize = 1 << 35;
#[cfg(not(target_pointer_width = "64"))]
pub const DEFAULT_RESERVE: usize = 1 << 30;

/// Alignment of every block returned by an arena.
pub const ALIGN: usize = 8;

/// Size of the per-block header.  Must stay a multiple of [`ALIGN`].
const HEADER: usize = 8;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors raised by [`Arena`] operations.
#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("arena {name}: cannot reserve {size} bytes of address space: {source}")]
    Reserve {
        name: &'static str,
        size: usize,
        #[source]
        source: io::Error,
    },

    #[error("arena {name}: cannot commit pages: {source}")]
    Commit {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    /// The reservation cannot hold the request.
    #[error("arena {name}: out of memory ({requested} bytes requested, {reserved} reserved)")]
    OutOfMemory {
        name: &'static str,
        requested: usize,
        reserved: usize,
    },

    /// A block passed to [`Arena::realloc`] was not allocated by this arena.
    #[error("arena {name}: block was not allocated by this arena")]
    Foreign { name: &'static str },

    /// A reallocation returned fewer bytes than were asked for.
    #[error("arena {name}: reallocation returned {got} bytes, {needed} needed")]
    ShortBlock {
        name: &'static str,
        got: usize,
        needed: usize,
    },

    #[error("arena {name}: cannot release reservation: {source}")]
    Release {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

// ── Arena ─────────────────────────────────────────────────────────────────────

/// A growable bump allocator over one reserved, contiguous address range.
///
/// Invariant: `used <= committed <= reserved`.
pub struct Arena {
    name: &'static str,
    base: NonNull<u8>,
    reserved: usize,
    committed: Cell<usize>,
    used: Cell<usize>,
}

// SAFETY: the mapping is owned exclusively by this value; moving the owner to
// another thread moves the whole region with it.  `Cell` keeps it `!Sync`.
unsafe impl Send for Arena {}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("name", &self.name)
            .field("used", &self.used.get())
            .field("committed", &self.committed.get())
            .field("reserved", &self.reserved)
            .finish()
    }
}

impl Arena {
    /// Reserve [`DEFAULT_RESERVE`] bytes of address space and commit one page.
    pub fn new(name: &'static str) -> Result<Self, ArenaError> {
        Self::with_reserve(name, DEFAULT_RESERVE)
    }

    /// Like [`Arena::new`] with a caller-chosen reservation, rounded up to a
    /// whole number of pages (at least one).
    pub fn with_reserve(name: &'static str, reserve: usize) -> Result<Self, ArenaError> {
        let page = page_size();
        let reserved = reserve
            .max(page)
            .checked_add(page - 1)
            .map(|n| n / page * page)
            .ok_or(ArenaError::OutOfMemory { name, requested: reserve, reserved: 0 })?;

        // SAFETY: anonymous private mapping with no fixed address.
        let p = unsafe {
            libc::mmap(
                ptr::null_mut(),
                reserved,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if p == libc::MAP_FAILED {
            return Err(ArenaError::Reserve {
                name,
                size: reserved,
                source: io::Error::last_os_error(),
            });
        }

        // SAFETY: `p` is the start of a mapping at least one page long.
        if unsafe { libc::mprotect(p, page, libc::PROT_READ | libc::PROT_WRITE) } == -1 {
            let source = io::Error::last_os_error();
            // SAFETY: unmapping the region mapped just above.
            unsafe { libc::munmap(p, reserved) };
            return Err(ArenaError::Commit { name, source });
        }

        let base = NonNull::new(p.cast::<u8>()).ok_or_else(|| ArenaError::Reserve {
            name,
            size: reserved,
            source: io::Error::other("mmap returned a null mapping"),
        })?;

        debug!(arena = name, reserved, committed = page, "arena created");
        Ok(Self {
            name,
            base,
            reserved,
            committed: Cell::new(page),
            used: Cell::new(0),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Bytes handed out so far, headers and padding included.
    pub fn used(&self) -> usize {
        self.used.get()
    }

    /// Bytes currently readable and writable.
    pub fn committed(&self) -> usize {
        self.committed.get()
    }

    /// Size of the address-space reservation.
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Bump-allocate `size` bytes.
    ///
    /// The contents are unspecified: fresh pages read as zero, pages reused
    /// after [`Arena::reset`] keep whatever was written before.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc(&self, size: usize) -> Result<&mut [u8], ArenaError> {
        let start = self.used.get();
        let data = start + HEADER;
        let end = align_up(size)
            .and_then(|n| data.checked_add(n))
            .ok_or(self.out_of_memory(size))?;
        self.ensure_committed(end)?;

        // SAFETY: `start..end` lies inside the committed region and past every
        // block handed out so far, so nothing else aliases it.
        unsafe {
            self.write_header(data, size);
            self.used.set(end);
            Ok(slice::from_raw_parts_mut(self.base.as_ptr().add(data), size))
        }
    }

    /// Allocate `count * size` zeroed bytes.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_zeroed(&self, count: usize, size: usize) -> Result<&mut [u8], ArenaError> {
        let total = count
            .checked_mul(size)
            .ok_or(self.out_of_memory(usize::MAX))?;
        let block = self.alloc(total)?;
        block.fill(0);
        Ok(block)
    }

    /// Resize a block previously returned by this arena.
    ///
    /// * `None` behaves as [`Arena::alloc`].
    /// * Shrinking the trailing block retracts the bump offset; shrinking any
    ///   other block only records the smaller size.
    /// * Growing the trailing block advances the bump offset in place.
    /// * Growing any other block copies it to a fresh allocation; the old
    ///   bytes stay unreachable until the arena is reset or dropped.
    ///
    /// The returned block starts where the old one did unless it had to be
    /// copied.  A slice outside the arena, or one whose length differs from
    /// the size recorded for the block it starts at, fails with
    /// [`ArenaError::Foreign`].
    ///
    /// # Safety
    ///
    /// `block` must be exactly a slice returned by `alloc`, `alloc_zeroed` or
    /// `realloc` on this arena since the last reset, not a sub-slice of one,
    /// and no other reference into it may be alive.  The size header in front
    /// of a block is ordinary memory, so a slice that merely starts inside a
    /// block cannot be told apart from a real one.
    ///
    /// ```compile_fail
    /// let arena = kirby::Arena::new("doc").unwrap();
    /// let block = arena.alloc(16).unwrap();
    /// // Resizing needs an `unsafe` block.
    /// let _ = arena.realloc(Some(block), 32);
    /// ```
    pub unsafe fn realloc<'a>(
        &'a self,
        block: Option<&'a mut [u8]>,
        new_size: usize,
    ) -> Result<&'a mut [u8], ArenaError> {
        let Some(block) = block else {
            return self.alloc(new_size);
        };

        let data = self.offset_of(block)?;
        // SAFETY: `offset_of` proved `data - HEADER .. data` lies inside the
        // used region.
        let old_size = unsafe { self.read_header(data) };
        if old_size != block.len() {
            return Err(ArenaError::Foreign { name: self.name });
        }
        let old_end = data + align_up(old_size).ok_or(self.out_of_memory(old_size))?;
        let trailing = old_end == self.used.get();
        let new_end = align_up(new_size)
            .and_then(|n| data.checked_add(n))
            .ok_or(self.out_of_memory(new_size))?;

        if new_size <= old_size {
            // SAFETY: the header belongs to the caller's block.
            unsafe { self.write_header(data, new_size) };
            if trailing {
                self.used.set(new_end);
                trace!(arena = self.name, old_size, new_size, "shrink in place");
            }
            // SAFETY: the block recorded at `data` holds at least `new_size` bytes.
            return Ok(unsafe { slice::from_raw_parts_mut(self.base.as_ptr().add(data), new_size) });
        }

        if trailing {
            self.ensure_committed(new_end)?;
            // SAFETY: `data..new_end` is committed and nothing lies past `old_end`.
            unsafe {
                self.write_header(data, new_size);
                self.used.set(new_end);
                trace!(arena = self.name, old_size, new_size, "grow in place");
                return Ok(slice::from_raw_parts_mut(self.base.as_ptr().add(data), new_size));
            }
        }

        let fresh = self.alloc(new_size)?;
        // SAFETY: the old block holds `old_size` initialized bytes and cannot
        // overlap a block allocated after it.
        unsafe {
            ptr::copy_nonoverlapping(self.base.as_ptr().add(data), fresh.as_mut_ptr(), old_size);
        }
        trace!(arena = self.name, old_size, new_size, "grow by copy");
        Ok(fresh)
    }

    /// Rewind the bump offset to zero, keeping committed pages for reuse.
    pub fn reset(&mut self) {
        debug!(arena = self.name, used = self.used.get(), "arena reset");
        self.used.set(0);
    }

    /// Release the reservation, reporting failure instead of logging it.
    pub fn destroy(self) -> Result<(), ArenaError> {
        let this = ManuallyDrop::new(self);
        this.unmap()
    }

    fn unmap(&self) -> Result<(), ArenaError> {
        // SAFETY: `base..base + reserved` is exactly the mapping made in
        // `with_reserve`, and no borrow of it can outlive `self`.
        if unsafe { libc::munmap(self.base.as_ptr().cast(), self.reserved) } == -1 {
            return Err(ArenaError::Release {
                name: self.name,
                source: io::Error::last_os_error(),
            });
        }
        debug!(arena = self.name, "arena released");
        Ok(())
    }

    fn ensure_committed(&self, end: usize) -> Result<(), ArenaError> {
        let committed = self.committed.get();
        if end <= committed {
            return Ok(());
        }
        if end > self.reserved {
            return Err(self.out_of_memory(end));
        }

        let mut cap = committed;
        while cap < end {
            cap = cap.saturating_mul(2);
        }
        let cap = cap.min(self.reserved);

        // SAFETY: `committed..cap` lies inside the reservation and is page aligned.
        let rc = unsafe {
            libc::mprotect(
                self.base.as_ptr().add(committed).cast(),
                cap - committed,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if rc == -1 {
            return Err(ArenaError::Commit {
                name: self.name,
                source: io::Error::last_os_error(),
            });
        }

        debug!(arena = self.name, from = committed, to = cap, "arena grew");
        self.committed.set(cap);
        Ok(())
    }

    /// Offset of `block`'s first byte, if it can be the start of one of ours.
    fn offset_of(&self, block: &[u8]) -> Result<usize, ArenaError> {
        let base = self.base.as_ptr() as usize;
        let addr = block.as_ptr() as usize;
        let used = self.used.get();
        if addr < base + HEADER
            || addr > base + used
            || (addr - base) % ALIGN != 0
            || addr - base + block.len() > used
        {
            return Err(ArenaError::Foreign { name: self.name });
        }
        Ok(addr - base)
    }

    /// # Safety
    /// `data` must be the data offset of a live block.
    unsafe fn read_header(&self, data: usize) -> usize {
        self.base.as_ptr().add(data - HEADER).cast::<u64>().read() as usize
    }

    /// # Safety
    /// `data - HEADER .. data` must be committed and belong to the block.
    unsafe fn write_header(&self, data: usize, size: usize) {
        self.base
            .as_ptr()
            .add(data - HEADER)
            .cast::<u64>()
            .write(size as u64);
    }

    fn out_of_memory(&self, requested: usize) -> ArenaError {
        ArenaError::OutOfMemory {
            name: self.name,
            requested,
            reserved: self.reserved,
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if let Err(e) = self.unmap() {
            error!("{e}");
        }
    }
}

fn align_up(n: usize) -> Option<usize> {
    n.checked_add(ALIGN - 1).map(|v| v & !(ALIGN - 1))
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz <= 0 {
        4096
    } else {
        sz as usize
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
