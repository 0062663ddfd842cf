//! Size-classed pooling of byte buffers.
//!
//! Buffers are grouped into power-of-two classes from 64 bytes up to 256 KiB.
//! A request is served from the smallest class that can hold it; anything
//! larger than the biggest class is allocated directly and is never pooled.
//!
//! A buffer only goes back into a class when its capacity is exactly that
//! class's size. Buffers that grew past their class (or were never pooled to
//! begin with) are dropped on [`BufferPool::put`], so the classes never drift.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::pool::ObjectPool;

/// log2 of the smallest class size.
const MIN_CLASS_SHIFT: u32 = 6;

/// Number of size classes (64 B .. 256 KiB).
pub const NUM_CLASSES: usize = 13;

/// Capacity of the smallest class.
pub const MIN_CLASS_SIZE: usize = 1 << MIN_CLASS_SHIFT;

/// Capacity of the largest class.
pub const MAX_CLASS_SIZE: usize = class_size(NUM_CLASSES - 1);

lazy_static! {
    /// Process-wide default pool, for call sites that don't inject their own.
    static ref GLOBAL_POOL: Arc<BufferPool> = Arc::new(BufferPool::new());
}

/// Class index for a request of `size` bytes: `ceil(log2(size)) - 6`, never
/// below zero. May exceed the last class; callers check.
#[inline]
pub fn class_index(size: usize) -> usize {
    if size <= 1 {
        return 0;
    }
    let bits = usize::BITS - (size - 1).leading_zeros();
    bits.saturating_sub(MIN_CLASS_SHIFT) as usize
}

/// Capacity of class `idx`.
#[inline]
pub const fn class_size(idx: usize) -> usize {
    1 << (idx + MIN_CLASS_SHIFT as usize)
}

/// Byte buffers pooled by size class. See the module docs.
pub struct BufferPool {
    classes: [ObjectPool<Vec<u8>>; NUM_CLASSES],
    unpooled: AtomicUsize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            classes: std::array::from_fn(|idx| {
                let size = class_size(idx);
                ObjectPool::new(move || Vec::with_capacity(size))
            }),
            unpooled: AtomicUsize::new(0),
        }
    }

    /// Shared default instance, created on first use.
    pub fn global() -> Arc<BufferPool> {
        GLOBAL_POOL.clone()
    }

    /// Borrows an empty buffer with capacity of at least `size` bytes.
    ///
    /// A request of zero bytes is served from the smallest class.
    ///
    /// # Examples
    ///
    /// ```
    /// # use zlog::BufferPool;
    /// let pool = BufferPool::new();
    /// let buf = pool.get(100);
    /// assert!(buf.is_empty());
    /// assert_eq!(buf.capacity(), 128);
    /// pool.put(buf);
    /// ```
    pub fn get(&self, size: usize) -> Vec<u8> {
        let idx = class_index(size);
        match self.classes.get(idx) {
            Some(class) => {
                let mut buf = class.get();
                if buf.capacity() < size {
                    buf.reserve_exact(size);
                }
                buf
            }
            None => {
                self.unpooled.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(size)
            }
        }
    }

    /// Returns a buffer. It is cleared, and kept only if its capacity sits
    /// exactly on a class boundary.
    pub fn put(&self, mut buf: Vec<u8>) {
        buf.clear();
        let cap = buf.capacity();
        if cap == 0 {
            return;
        }
        let idx = class_index(cap);
        if let Some(class) = self.classes.get(idx) {
            if cap == class_size(idx) {
                class.put(buf);
            }
        }
    }

    /// Total buffers allocated on pool misses, including oversized ones.
    pub fn allocations(&self) -> usize {
        self.classes.iter().map(ObjectPool::allocated).sum::<usize>()
            + self.unpooled.load(Ordering::Relaxed)
    }

    /// Buffers currently idle across all classes.
    pub fn idle(&self) -> usize {
        self.classes.iter().map(ObjectPool::idle).sum()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("idle", &self.idle())
            .field("allocations", &self.allocations())
            .finish()
    }
}
