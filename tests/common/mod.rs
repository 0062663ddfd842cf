#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use parking_lot::Mutex;
use zlog::Sink;

static TRACING: Once = Once::new();

/// Routes the crate's tracing output to the test harness. Honors `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Counts records and bytes without keeping them.
#[derive(Default)]
pub struct CountingSink {
    pub records: AtomicUsize,
    pub bytes: AtomicUsize,
}

impl CountingSink {
    pub fn records(&self) -> usize {
        self.records.load(Ordering::SeqCst)
    }
}

impl Sink for CountingSink {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.records.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(buf.len(), Ordering::SeqCst);
        Ok(buf.len())
    }
}

/// Keeps every record as its own buffer, in arrival order.
#[derive(Default, Clone)]
pub struct CollectingSink {
    pub records: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl CollectingSink {
    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl Sink for CollectingSink {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.records.lock().push(buf.to_vec());
        Ok(buf.len())
    }
}
