use std::fmt;
use std::io;
use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::{DispatcherConfig, SinkErrorHook};
use crate::error::{Error, Result};
use crate::idle::IdleStrategy;
use crate::pool::ObjectPool;
use crate::ring::RingBuffer;
use crate::sink::Sink;

/// Asynchronous hand-off from producers to a slow sink.
///
/// `write` copies the caller's bytes into a pooled entry and queues it
/// on a [`RingBuffer`]. Worker threads take entries off the ring, pass the
/// bytes to the sink and recycle the entry.
///
/// # Backpressure
///
/// When the ring is full a producer does not sleep and does not drop the
/// record. It takes the oldest queued entry, writes it to the sink itself,
/// and tries again. Memory stays bounded; the cost is latency for the
/// producer that hit the full ring. Records from different producers may be
/// reordered under saturation; records from one producer are not.
///
/// # Shutdown
///
/// [`AsyncDispatcher::close`] stops intake and waits for the workers, which
/// first drain everything already queued. A write racing with `close` either
/// lands in the sink or fails with [`Error::Closed`]; it is never stranded.
///
/// # Sink failures
///
/// Sink errors are never fatal to a worker. They are counted (see
/// [`DispatcherStats::sink_errors`]) and passed to the configured hook.
///
/// # Examples
///
/// ```
/// # use zlog::{AsyncDispatcher, DispatcherConfig};
/// use parking_lot::Mutex;
///
/// let dispatcher = AsyncDispatcher::with_config(
///     Mutex::new(Vec::<u8>::new()),
///     DispatcherConfig::default().with_workers(1),
/// ).unwrap();
///
/// dispatcher.write(b"first").unwrap();
/// dispatcher.write(b"second").unwrap();
/// dispatcher.close();
///
/// assert_eq!(&*dispatcher.sink().lock(), b"firstsecond");
/// assert!(dispatcher.write(b"late").is_err());
/// ```
pub struct AsyncDispatcher<S: Sink + 'static> {
    shared: Arc<Shared<S>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

/// A pooled copy of one record.
#[derive(Debug, Default)]
pub(crate) struct LogEntry {
    data: Vec<u8>,
}

impl LogEntry {
    fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn fill(&mut self, bytes: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(bytes);
    }

    /// Empties the entry but keeps its allocation.
    fn reset(&mut self) {
        self.data.clear();
    }
}

/// Counters since the dispatcher was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Records the sink accepted in full.
    pub written: u64,
    pub bytes: u64,
    /// Failed or short sink writes.
    pub sink_errors: u64,
    /// Records a producer wrote itself because the ring was full.
    pub helped: u64,
    /// Writes refused with `Closed` or `RingFull`.
    pub rejected: u64,
}

#[derive(Default)]
struct Counters {
    written: AtomicU64,
    bytes: AtomicU64,
    sink_errors: AtomicU64,
    helped: AtomicU64,
    rejected: AtomicU64,
}

struct Shared<S> {
    ring: RingBuffer<LogEntry>,
    pool: ObjectPool<Box<LogEntry>>,
    sink: S,
    closed: AtomicBool,
    idle: Arc<dyn IdleStrategy>,
    on_sink_error: Option<SinkErrorHook>,
    counters: Counters,
}

impl<S: Sink> Shared<S> {
    /// Writes one entry to the sink and returns it to the pool.
    fn forward(&self, mut entry: Box<LogEntry>) {
        let len = entry.len();
        match self.sink.write(entry.as_bytes()) {
            Ok(n) if n == len => {
                self.counters.written.fetch_add(1, Ordering::Relaxed);
                self.counters.bytes.fetch_add(n as u64, Ordering::Relaxed);
            }
            Ok(n) => {
                let err = io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("sink accepted {n} of {len} bytes"),
                );
                self.sink_failed(&err);
            }
            Err(err) => self.sink_failed(&err),
        }
        entry.reset();
        self.pool.put(entry);
    }

    fn sink_failed(&self, err: &io::Error) {
        let previous = self.counters.sink_errors.fetch_add(1, Ordering::Relaxed);
        if previous == 0 {
            warn!(error = %err, "sink write failed; later failures are logged at debug level");
        } else {
            debug!(error = %err, failures = previous + 1, "sink write failed");
        }
        if let Some(hook) = &self.on_sink_error {
            hook(err);
        }
    }

    /// Forwards everything queued right now. Returns how many entries.
    fn drain(&self) -> usize {
        let mut drained = 0;
        while let Some(entry) = self.ring.get() {
            self.forward(entry);
            drained += 1;
        }
        drained
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn reject(&self) -> Error {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        Error::Closed
    }
}

fn worker_loop<S: Sink>(shared: Arc<Shared<S>>, id: usize) {
    debug!(worker = id, "dispatcher worker started");

    let mut attempt = 0u32;
    while !shared.is_closed() {
        match shared.ring.get() {
            Some(entry) => {
                attempt = 0;
                shared.forward(entry);
            }
            None => {
                shared.idle.idle(attempt);
                attempt = attempt.saturating_add(1);
            }
        }
    }

    // Pairs with the fence in `write`: a record queued before the producer
    // saw `closed` is visible here.
    fence(Ordering::SeqCst);
    let drained = shared.drain();
    debug!(worker = id, drained, "dispatcher worker stopped");
}

impl<S: Sink + 'static> AsyncDispatcher<S> {
    /// Starts a dispatcher with [`DispatcherConfig::default`].
    pub fn new(sink: S) -> io::Result<Self> {
        Self::with_config(sink, DispatcherConfig::default())
    }

    /// Starts a dispatcher and its worker threads.
    ///
    /// Fails only if a worker thread cannot be spawned; any workers already
    /// started are shut down first.
    pub fn with_config(sink: S, config: DispatcherConfig) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            ring: RingBuffer::new(config.capacity),
            pool: ObjectPool::new(|| Box::new(LogEntry::default())),
            sink,
            closed: AtomicBool::new(false),
            idle: config.idle,
            on_sink_error: config.on_sink_error,
            counters: Counters::default(),
        });

        let dispatcher = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(config.workers)),
            stopped: AtomicBool::new(false),
        };

        for id in 0..config.workers {
            let shared = dispatcher.shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, id))
                .spawn(move || worker_loop(shared, id));
            match spawned {
                Ok(handle) => dispatcher.workers.lock().push(handle),
                Err(err) => {
                    warn!(error = %err, worker = id, "failed to spawn dispatcher worker");
                    dispatcher.close();
                    return Err(err);
                }
            }
        }

        debug!(
            capacity = dispatcher.shared.ring.capacity(),
            workers = config.workers,
            "dispatcher started"
        );
        Ok(dispatcher)
    }

    /// Queues a copy of `data` for the sink.
    ///
    /// Returns `data.len()` once the record is queued (or, under
    /// backpressure, after this thread has helped the workers catch up).
    /// Fails with [`Error::Closed`] after [`close`](Self::close).
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let shared = &*self.shared;
        if shared.is_closed() {
            return Err(shared.reject());
        }

        let mut entry = shared.pool.get();
        entry.fill(data);

        let mut attempt = 0u32;
        loop {
            let Some(mut producer) = shared.ring.try_producer() else {
                // Another producer is mid-insert; that takes nanoseconds.
                thread::yield_now();
                continue;
            };
            match producer.put(entry) {
                Ok(()) => break,
                Err(back) => entry = back,
            }
            drop(producer);

            if shared.is_closed() {
                entry.reset();
                shared.pool.put(entry);
                return Err(shared.reject());
            }

            match shared.ring.get() {
                Some(oldest) => {
                    attempt = 0;
                    shared.counters.helped.fetch_add(1, Ordering::Relaxed);
                    shared.forward(oldest);
                }
                // Full, yet nothing to take: consumers hold claimed slots.
                None => {
                    shared.idle.idle(attempt);
                    attempt = attempt.saturating_add(1);
                }
            }
        }

        shared.idle.wake();

        // The workers may have finished draining between our closed check and
        // the put. Drain here so the record still reaches the sink.
        fence(Ordering::SeqCst);
        if shared.is_closed() {
            shared.drain();
        }
        Ok(data.len())
    }

    /// Like [`write`](Self::write), but fails with [`Error::RingFull`]
    /// instead of helping when the ring is full.
    pub fn try_write(&self, data: &[u8]) -> Result<usize> {
        let shared = &*self.shared;
        if shared.is_closed() {
            return Err(shared.reject());
        }

        let mut entry = shared.pool.get();
        entry.fill(data);

        let mut producer = loop {
            if let Some(producer) = shared.ring.try_producer() {
                break producer;
            }
            thread::yield_now();
        };
        if let Err(mut back) = producer.put(entry) {
            drop(producer);
            back.reset();
            shared.pool.put(back);
            shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::RingFull);
        }
        drop(producer);

        shared.idle.wake();
        fence(Ordering::SeqCst);
        if shared.is_closed() {
            shared.drain();
        }
        Ok(data.len())
    }

    /// Writes everything currently queued to the sink from this thread.
    ///
    /// When it returns the ring has been empty at least once; entries that
    /// workers took just before may still be in flight to the sink.
    pub fn flush(&self) -> usize {
        self.shared.drain()
    }

    /// Stops intake, drains the ring and joins the workers.
    ///
    /// Idempotent. Concurrent callers all return after shutdown completes.
    pub fn close(&self) {
        let shared = &*self.shared;
        let first = !shared.closed.swap(true, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        shared.idle.wake();

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                warn!("dispatcher worker panicked");
            }
        }
        // Leftovers: zero-worker setups, or writes admitted during shutdown.
        shared.drain();
        self.stopped.store(true, Ordering::Release);
        drop(workers);

        if first {
            let stats = self.stats();
            debug!(
                written = stats.written,
                sink_errors = stats.sink_errors,
                helped = stats.helped,
                "dispatcher closed"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// True once `close` has joined every worker and drained the ring.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> DispatcherStats {
        let c = &self.shared.counters;
        DispatcherStats {
            written: c.written.load(Ordering::Relaxed),
            bytes: c.bytes.load(Ordering::Relaxed),
            sink_errors: c.sink_errors.load(Ordering::Relaxed),
            helped: c.helped.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
        }
    }

    /// Ring capacity after rounding.
    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }

    /// Records waiting in the ring.
    pub fn queued(&self) -> usize {
        self.shared.ring.len()
    }

    pub fn sink(&self) -> &S {
        &self.shared.sink
    }
}

impl<S: Sink + 'static> Sink for AsyncDispatcher<S> {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        AsyncDispatcher::write(self, buf).map_err(io::Error::from)
    }
}

impl<S: Sink + 'static> Drop for AsyncDispatcher<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S: Sink + 'static> fmt::Debug for AsyncDispatcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncDispatcher")
            .field("capacity", &self.capacity())
            .field("queued", &self.queued())
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}
