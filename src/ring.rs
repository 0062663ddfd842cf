use std::fmt;
use std::ops::Deref;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::thread;

/// Lock-free bounded queue of owned pointers.
///
/// The ring holds `Box<T>` items in a power-of-two array of atomic pointers.
/// `head` and `tail` are free-running counters; a slot index is the counter
/// masked by `capacity - 1`. One slot always stays vacant so that "full"
/// (`head - tail == capacity - 1`) and "empty" (`head == tail`) are told apart
/// from the counters alone.
///
/// # Producers and consumers
///
/// Insertion is single-producer. It is only reachable through a [`Producer`]
/// handle, and at most one handle exists at a time: [`RingBuffer::try_producer`]
/// hands it out and dropping it gives it back. Callers with several writing
/// threads contend for the handle rather than for the slots.
///
/// Removal ([`RingBuffer::get`]) is safe from any number of threads. A consumer
/// claims the tail counter with a compare-and-swap and then takes the item out
/// of the claimed slot.
///
/// Neither side ever blocks. A full ring hands the item back, an empty ring
/// returns `None`, and the caller decides how to wait.
///
/// # Examples
///
/// ```
/// # use zlog::ring::RingBuffer;
/// let ring = RingBuffer::new(4);
/// let mut producer = ring.try_producer().unwrap();
///
/// producer.put(Box::new(1)).unwrap();
/// producer.put(Box::new(2)).unwrap();
/// producer.put(Box::new(3)).unwrap();
/// // One slot is always kept free.
/// assert!(producer.put(Box::new(4)).is_err());
///
/// assert_eq!(ring.get().as_deref(), Some(&1));
/// ```
pub struct RingBuffer<T> {
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    producer_claimed: CachePadded<AtomicBool>,
    slots: Box<[AtomicPtr<T>]>,
}

// Items move between threads by pointer; the ring never hands out `&T`.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

/// Keeps the hot counters on separate cache lines.
#[repr(align(64))]
#[derive(Default)]
struct CachePadded<T>(T);

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> RingBuffer<T> {
    /// Creates a ring with room for at least `requested` slots.
    ///
    /// The capacity is the next power of two at or above `requested`, and
    /// never less than 2, since one slot is reserved. A ring of capacity `c`
    /// holds at most `c - 1` items.
    pub fn new(requested: usize) -> Self {
        let capacity = requested.max(2).next_power_of_two();
        let slots = (0..capacity)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            mask: capacity - 1,
            head: CachePadded(AtomicUsize::new(0)),
            tail: CachePadded(AtomicUsize::new(0)),
            producer_claimed: CachePadded(AtomicBool::new(false)),
            slots,
        }
    }

    /// Total slots, including the reserved one.
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Items currently queued. Only a snapshot under concurrent use.
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail).min(self.mask)
    }

    /// True when nothing is queued. Only a snapshot under concurrent use.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when every usable slot is taken, so the next `put` would fail.
    pub fn is_full(&self) -> bool {
        self.len() == self.mask
    }

    /// Claims the single producer handle, or `None` if another thread holds it.
    ///
    /// The handle is released when it is dropped. Writers that share a ring
    /// take turns by retrying this call.
    ///
    /// # Examples
    ///
    /// ```
    /// # use zlog::ring::RingBuffer;
    /// let ring = RingBuffer::new(4);
    /// let mut producer = ring.try_producer().unwrap();
    /// assert!(ring.try_producer().is_none());
    ///
    /// producer.put(Box::new(7)).unwrap();
    /// drop(producer);
    /// assert_eq!(ring.get().map(|b| *b), Some(7));
    /// ```
    pub fn try_producer(&self) -> Option<Producer<'_, T>> {
        self.producer_claimed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Producer { ring: self })
    }

    /// Removes the oldest item, or returns `None` when the ring is empty.
    ///
    /// Safe to call from any number of threads at once.
    pub fn get(&self) -> Option<Box<T>> {
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let head = self.head.load(Ordering::Acquire);
            if tail == head {
                return None;
            }

            if self
                .tail
                .compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_err()
            {
                continue;
            }

            // The slot is ours. The producer published it before moving
            // `head`, so this normally succeeds on the first pass.
            let slot = &self.slots[tail & self.mask];
            loop {
                let item = slot.swap(ptr::null_mut(), Ordering::Acquire);
                if !item.is_null() {
                    // SAFETY: non-null slot pointers always come from
                    // `Box::into_raw` in `Producer::put`, and the swap above
                    // gives this consumer sole ownership.
                    return Some(unsafe { Box::from_raw(item) });
                }
                thread::yield_now();
            }
        }
    }

    fn put(&self, item: Box<T>) -> Result<(), Box<T>> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) >= self.mask {
            return Err(item);
        }

        let slot = &self.slots[head & self.mask];
        // A consumer that claimed this slot one lap ago may not have taken
        // its item out yet. Treat that as full rather than overwrite it.
        if !slot.load(Ordering::Acquire).is_null() {
            return Err(item);
        }

        slot.store(Box::into_raw(item), Ordering::Release);
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        for slot in self.slots.iter_mut() {
            let item = std::mem::replace(slot.get_mut(), ptr::null_mut());
            if !item.is_null() {
                // SAFETY: see `get`; `&mut self` rules out other owners.
                drop(unsafe { Box::from_raw(item) });
            }
        }
    }
}

impl<T> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

/// Exclusive right to insert into a [`RingBuffer`].
///
/// Not `Clone`; released when dropped.
pub struct Producer<'a, T> {
    ring: &'a RingBuffer<T>,
}

impl<T> Producer<'_, T> {
    /// Inserts `item`, or hands it back if the ring is full.
    #[inline]
    pub fn put(&mut self, item: Box<T>) -> Result<(), Box<T>> {
        self.ring.put(item)
    }
}

impl<T> Drop for Producer<'_, T> {
    fn drop(&mut self) {
        self.ring.producer_claimed.store(false, Ordering::Release);
    }
}
