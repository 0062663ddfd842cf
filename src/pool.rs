use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

/// Free-list reuse of heap objects.
///
/// The pool is unbounded and never evicts: every object handed back with
/// [`ObjectPool::put`] stays available until it is borrowed again or the pool
/// is dropped. An empty pool is not an error; [`ObjectPool::get`] falls back
/// to the factory.
///
/// The free list is a lock-free segmented queue, so producers and consumers on
/// different threads can borrow and return objects without taking a lock.
///
/// # Examples
///
/// ```
/// # use zlog::pool::ObjectPool;
/// let pool = ObjectPool::new(|| Vec::<u8>::with_capacity(128));
///
/// let mut buf = pool.get();
/// buf.extend_from_slice(b"hello");
/// buf.clear();
/// pool.put(buf);
///
/// // The second borrow reuses the first allocation.
/// let _again = pool.get();
/// assert_eq!(pool.allocated(), 1);
/// ```
pub struct ObjectPool<T> {
    free: SegQueue<T>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    allocated: AtomicUsize,
}

impl<T> ObjectPool<T> {
    /// Creates an empty pool that builds new objects with `factory`.
    pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            free: SegQueue::new(),
            factory: Box::new(factory),
            allocated: AtomicUsize::new(0),
        }
    }

    /// Borrows an object, creating one if the free list is empty.
    #[inline]
    pub fn get(&self) -> T {
        match self.free.pop() {
            Some(item) => item,
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                (self.factory)()
            }
        }
    }

    /// Returns an object to the free list.
    ///
    /// The caller is responsible for resetting it first; the pool stores
    /// whatever it is given.
    #[inline]
    pub fn put(&self, item: T) {
        self.free.push(item);
    }

    /// Number of objects currently waiting in the free list.
    pub fn idle(&self) -> usize {
        self.free.len()
    }

    /// Number of objects the factory has produced so far.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl<T: Default + 'static> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new(T::default)
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("idle", &self.idle())
            .field("allocated", &self.allocated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_reuse_after_put() {
        let pool: ObjectPool<Box<[u8; 32]>> = ObjectPool::new(|| Box::new([0u8; 32]));
        let first = pool.get();
        let addr = first.as_ptr();
        pool.put(first);

        let second = pool.get();
        assert_eq!(second.as_ptr(), addr, "pooled object should be reused");
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn test_miss_allocates() {
        let pool: ObjectPool<Vec<u8>> = ObjectPool::default();
        let _a = pool.get();
        let _b = pool.get();
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_concurrent_get_put() {
        let pool = Arc::new(ObjectPool::new(|| Vec::<u8>::with_capacity(64)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for i in 0..1000u32 {
                        let mut v = pool.get();
                        v.extend_from_slice(&i.to_le_bytes());
                        v.clear();
                        pool.put(v);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        // Never more live objects than threads.
        assert!(pool.allocated() <= 4);
        assert_eq!(pool.idle(), pool.allocated());
    }
}
