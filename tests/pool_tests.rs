use std::sync::Arc;
use std::thread;

use zlog::buffer_pool::{class_index, class_size, MAX_CLASS_SIZE, MIN_CLASS_SIZE};
use zlog::BufferPool;

#[test]
fn test_size_classes() {
    let pool = BufferPool::new();
    for (requested, capacity) in [(1, 64), (63, 64), (64, 64), (65, 128), (8192, 8192), (8193, 16384)] {
        let buf = pool.get(requested);
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), capacity, "request of {} bytes", requested);
        assert_eq!(class_size(class_index(requested)), capacity);
        pool.put(buf);
    }
}

#[test]
fn test_returned_buffer_is_reused_and_cleared() {
    let pool = BufferPool::new();
    let mut buf = pool.get(100);
    buf.extend_from_slice(b"stale contents");
    let ptr = buf.as_ptr();
    pool.put(buf);

    let again = pool.get(120);
    assert_eq!(again.as_ptr(), ptr);
    assert!(again.is_empty());
    assert_eq!(pool.allocations(), 1);
}

#[test]
fn test_oversized_requests_bypass_the_pool() {
    let pool = BufferPool::new();
    let big = pool.get(MAX_CLASS_SIZE + 1);
    assert!(big.capacity() > MAX_CLASS_SIZE);
    pool.put(big);
    assert_eq!(pool.idle(), 0);

    pool.get(MAX_CLASS_SIZE + 1);
    assert_eq!(pool.allocations(), 2);
}

#[test]
fn test_smallest_class_serves_zero() {
    let pool = BufferPool::new();
    assert_eq!(pool.get(0).capacity(), MIN_CLASS_SIZE);
}

#[test]
fn test_shared_across_threads() {
    let pool = Arc::new(BufferPool::new());
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let pool = pool.clone();
            thread::spawn(move || {
                for i in 0..500usize {
                    let size = 1 + (i * 37 + t) % 4000;
                    let mut buf = pool.get(size);
                    assert!(buf.capacity() >= size);
                    buf.resize(size, 0xAB);
                    pool.put(buf);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(pool.idle(), pool.allocations());
}
