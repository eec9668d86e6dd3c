//! Indirection table: variable-capacity child lists packed into one `Vec<u32>`.
//!
//! Each slab is laid out as `[capacity, count, entry0, entry1, ...]` where
//! `capacity` is a power of two no smaller than [`MIN_SLAB_CAPACITY`]. Released
//! slabs are kept on a free list per size class and handed out again before
//! the table grows, so a slab of a given size is always reused at a slot of
//! exactly that size.

/// Smallest slab ever allocated.
pub const MIN_SLAB_CAPACITY: u32 = 4;

const HEADER_LEN: usize = 2;

/// Offset of a slab inside the table. `SlabHandle::NULL` means "no children".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlabHandle(u32);

impl SlabHandle {
    pub const NULL: SlabHandle = SlabHandle(u32::MAX);

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

impl Default for SlabHandle {
    fn default() -> Self {
        Self::NULL
    }
}

#[derive(Debug, Default)]
pub struct IndirectionTable {
    table: Vec<u32>,
    /// Free slab offsets, indexed by size class (`log2(capacity / MIN)`).
    free: Vec<Vec<u32>>,
}

impl IndirectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn size_class(capacity: u32) -> usize {
        debug_assert!(capacity.is_power_of_two() && capacity >= MIN_SLAB_CAPACITY);
        (capacity.trailing_zeros() - MIN_SLAB_CAPACITY.trailing_zeros()) as usize
    }

    fn offset(handle: SlabHandle) -> usize {
        assert!(!handle.is_null(), "null slab handle dereferenced");
        handle.0 as usize
    }

    /// Allocate an empty slab of at least `capacity` slots.
    pub fn allocate(&mut self, capacity: u32) -> SlabHandle {
        let capacity = capacity.max(MIN_SLAB_CAPACITY).next_power_of_two();
        let class = Self::size_class(capacity);

        if let Some(offset) = self.free.get_mut(class).and_then(|list| list.pop()) {
            let at = offset as usize;
            debug_assert_eq!(self.table[at], capacity);
            self.table[at + 1] = 0;
            return SlabHandle(offset);
        }

        let offset = self.table.len();
        assert!(
            offset + HEADER_LEN + (capacity as usize) < u32::MAX as usize,
            "indirection table exhausted the u32 offset space"
        );
        self.table.resize(offset + HEADER_LEN + capacity as usize, 0);
        self.table[offset] = capacity;
        self.table[offset + 1] = 0;
        SlabHandle(offset as u32)
    }

    /// Return a slab to the free list for its size class.
    pub fn release(&mut self, handle: SlabHandle) {
        if handle.is_null() {
            return;
        }
        let at = Self::offset(handle);
        let class = Self::size_class(self.table[at]);
        self.table[at + 1] = 0;
        if self.free.len() <= class {
            self.free.resize_with(class + 1, Vec::new);
        }
        debug_assert!(!self.free[class].contains(&handle.0), "slab released twice");
        self.free[class].push(handle.0);
    }

    pub fn capacity(&self, handle: SlabHandle) -> u32 {
        if handle.is_null() {
            return 0;
        }
        self.table[Self::offset(handle)]
    }

    pub fn count(&self, handle: SlabHandle) -> u32 {
        if handle.is_null() {
            return 0;
        }
        self.table[Self::offset(handle) + 1]
    }

    pub fn entries(&self, handle: SlabHandle) -> &[u32] {
        if handle.is_null() {
            return &[];
        }
        let at = Self::offset(handle);
        let count = self.table[at + 1] as usize;
        &self.table[at + HEADER_LEN..at + HEADER_LEN + count]
    }

    /// Append `value`, growing into a fresh slab when full.
    ///
    /// Returns the handle the caller must store from now on; it differs from
    /// `handle` whenever the slab was (re)allocated.
    pub fn push(&mut self, handle: SlabHandle, value: u32) -> SlabHandle {
        let handle = if handle.is_null() {
            self.allocate(MIN_SLAB_CAPACITY)
        } else {
            handle
        };

        let at = Self::offset(handle);
        let capacity = self.table[at];
        let count = self.table[at + 1];

        if count < capacity {
            self.table[at + HEADER_LEN + count as usize] = value;
            self.table[at + 1] = count + 1;
            return handle;
        }

        let grown = self.allocate(capacity * 2);
        let dst = Self::offset(grown);
        let src = at + HEADER_LEN;
        self.table
            .copy_within(src..src + count as usize, dst + HEADER_LEN);
        self.table[dst + HEADER_LEN + count as usize] = value;
        self.table[dst + 1] = count + 1;
        self.release(handle);
        tracing::trace!(from = capacity, to = capacity * 2, "child slab grown");
        grown
    }

    /// Remove the first occurrence of `value`, keeping the order of the rest.
    pub fn remove(&mut self, handle: SlabHandle, value: u32) -> bool {
        if handle.is_null() {
            return false;
        }
        let at = Self::offset(handle);
        let count = self.table[at + 1] as usize;
        let start = at + HEADER_LEN;
        let Some(pos) = self.table[start..start + count]
            .iter()
            .position(|&v| v == value)
        else {
            return false;
        };
        self.table.copy_within(start + pos + 1..start + count, start + pos);
        self.table[at + 1] = (count - 1) as u32;
        true
    }

    /// Length of the backing table in `u32` words.
    pub fn allocated_len(&self) -> usize {
        self.table.len()
    }

    /// Number of released slabs waiting for reuse.
    pub fn free_slab_count(&self) -> usize {
        self.free.iter().map(Vec::len).sum()
    }
}
