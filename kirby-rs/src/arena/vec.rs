//! Growable array of `Copy` values stored in a single arena block.

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Index, IndexMut};
use std::ptr::NonNull;
use std::slice;

use super::{Arena, ArenaError, ALIGN};

/// Capacity of the first block when a vector grows from empty.
const MIN_CAPACITY: usize = 4;

/// An index-addressed, arena-backed vector.
///
/// Growth doubles the element count and reallocates `count * size_of::<T>()`
/// bytes through [`Arena::realloc`], which is free while the vector is the
/// arena's trailing block.  Elements are meant to be addressed by index: the
/// backing block may be copied when something else was allocated after it.
pub struct ArenaVec<'a, T: Copy> {
    arena: &'a Arena,
    ptr: NonNull<T>,
    len: usize,
    cap: usize,
    _marker: PhantomData<&'a mut [T]>,
}

impl<'a, T: Copy> ArenaVec<'a, T> {
    /// An empty vector; nothing is allocated until the first push.
    pub fn new(arena: &'a Arena) -> Self {
        assert!(
            mem::size_of::<T>() > 0 && mem::align_of::<T>() <= ALIGN,
            "ArenaVec element must be sized and aligned to at most {ALIGN} bytes"
        );
        Self {
            arena,
            ptr: NonNull::dangling(),
            len: 0,
            cap: 0,
            _marker: PhantomData,
        }
    }

    /// An empty vector with room for `cap` elements, zero-filled.
    pub fn with_capacity(arena: &'a Arena, cap: usize) -> Result<Self, ArenaError> {
        let mut v = Self::new(arena);
        if cap > 0 {
            let block = arena.alloc_zeroed(cap, mem::size_of::<T>())?;
            v.ptr = NonNull::from(block).cast();
            v.cap = cap;
        }
        Ok(v)
    }

    /// A vector holding `n` copies of `value`.
    pub fn from_elem(arena: &'a Arena, value: T, n: usize) -> Result<Self, ArenaError> {
        let mut v = Self::with_capacity(arena, n)?;
        for _ in 0..n {
            v.push(value)?;
        }
        Ok(v)
    }

    /// The arena this vector allocates from.
    pub fn arena(&self) -> &'a Arena {
        self.arena
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Append `value`, returning its index.
    pub fn push(&mut self, value: T) -> Result<usize, ArenaError> {
        if self.len == self.cap {
            self.grow()?;
        }
        // SAFETY: `len < cap`, so the slot lies inside our block.
        unsafe { self.ptr.as_ptr().add(self.len).write(value) };
        self.len += 1;
        Ok(self.len - 1)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.as_slice().get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.as_mut_slice().get_mut(index)
    }

    pub fn last(&self) -> Option<&T> {
        self.as_slice().last()
    }

    pub fn as_slice(&self) -> &[T] {
        // SAFETY: the first `len` slots were written by `push`; `ptr` is
        // dangling only when `len == 0`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: as for `as_slice`, and `&mut self` makes the borrow unique.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    fn grow(&mut self) -> Result<(), ArenaError> {
        let elem = mem::size_of::<T>();
        let new_cap = if self.cap == 0 {
            MIN_CAPACITY
        } else {
            self.cap.checked_mul(2).ok_or(ArenaError::OutOfMemory {
                name: self.arena.name(),
                requested: usize::MAX,
                reserved: self.arena.reserved(),
            })?
        };
        let needed = new_cap.checked_mul(elem).ok_or(ArenaError::OutOfMemory {
            name: self.arena.name(),
            requested: usize::MAX,
            reserved: self.arena.reserved(),
        })?;

        let old = if self.cap == 0 {
            None
        } else {
            // SAFETY: `ptr..ptr + cap` is the block this vector was given.
            Some(unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr().cast::<u8>(), self.cap * elem) })
        };
        // SAFETY: `old` is the whole block last returned to this vector, sized
        // `cap * elem` when it was requested, and `&mut self` rules out any
        // outstanding borrow of its elements.
        let block = unsafe { self.arena.realloc(old, needed)? };
        if block.len() < needed {
            return Err(ArenaError::ShortBlock {
                name: self.arena.name(),
                got: block.len(),
                needed,
            });
        }

        self.ptr = NonNull::from(block).cast();
        self.cap = new_cap;
        Ok(())
    }
}

impl<T: Copy> Index<usize> for ArenaVec<'_, T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.as_slice()[index]
    }
}

impl<T: Copy> IndexMut<usize> for ArenaVec<'_, T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.as_mut_slice()[index]
    }
}

impl<T: Copy + fmt::Debug> fmt::Debug for ArenaVec<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'v, T: Copy> IntoIterator for &'v ArenaVec<'_, T> {
    type Item = &'v T;
    type IntoIter = slice::Iter<'v, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
