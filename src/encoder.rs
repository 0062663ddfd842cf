use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::buffer_pool::BufferPool;
use crate::clock::{Clock, SystemClock};
use crate::sink::Sink;
use crate::wire::{self, Field, Layout, Level, ProtocolVersion};

/// Producer-side front end: stamps, encodes and hands records to a sink.
///
/// Each encoder owns a sequence counter. Structured records get the next
/// value, starting at 1; basic records carry no sequence. Scratch buffers
/// come from a [`BufferPool`] and go back to it after the sink write, so a
/// steady stream of similar records allocates nothing.
///
/// # Examples
///
/// ```
/// # use zlog::{Encoder, wire::{self, Field, Level}};
/// # use zlog::clock::ManualClock;
/// use parking_lot::Mutex;
///
/// let sink = Mutex::new(Vec::<u8>::new());
/// let encoder = Encoder::builder()
///     .clock(ManualClock::new(1_700_000_000 << 32))
///     .build();
///
/// encoder.write_structured(&sink, Level::Info, "user login",
///                          &[Field::string("user", "alice")]).unwrap();
///
/// let bytes = sink.lock();
/// let record = wire::decode(&bytes).unwrap();
/// assert_eq!(record.sequence, Some(1));
/// ```
pub struct Encoder {
    pool: Arc<BufferPool>,
    clock: Arc<dyn Clock>,
    version: ProtocolVersion,
    sequence: AtomicU64,
}

impl Encoder {
    /// Encoder on the global pool and the system clock, writing version 1.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building an encoder with a custom pool, clock or version.
    pub fn builder() -> EncoderBuilder {
        EncoderBuilder::default()
    }

    /// Reserves the next sequence number.
    #[inline]
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Writes a basic record. Returns the sink's byte count.
    pub fn write_basic<S: Sink + ?Sized>(
        &self,
        sink: &S,
        level: Level,
        message: &str,
    ) -> io::Result<usize> {
        let timestamp = self.clock.now_nanos();
        let mut buf = self
            .pool
            .get(wire::encoded_size(self.version, Layout::Basic, message, &[]));
        wire::encode_basic_into(&mut buf, self.version, level, timestamp, message);
        self.finish(sink, buf)
    }

    /// Writes a structured record with the next sequence number.
    ///
    /// The record is encoded into a pooled buffer, handed to `sink` in a
    /// single write and the buffer is returned to the pool.
    ///
    /// # Arguments
    ///
    /// * `sink` - Destination for the encoded bytes, often an `AsyncDispatcher`
    /// * `level` - Severity of the record
    /// * `message` - Message text, truncated to 255 bytes
    /// * `fields` - Key/value pairs; only the first 255 are kept
    ///
    /// # Returns
    ///
    /// The byte count the sink reported, or the sink's error.
    pub fn write_structured<S: Sink + ?Sized>(
        &self,
        sink: &S,
        level: Level,
        message: &str,
        fields: &[Field<'_>],
    ) -> io::Result<usize> {
        let sequence = self.next_sequence();
        let timestamp = self.clock.now_nanos();
        let mut buf = self.pool.get(wire::encoded_size(
            self.version,
            Layout::Structured,
            message,
            fields,
        ));
        wire::encode_structured_into(
            &mut buf,
            self.version,
            level,
            sequence,
            timestamp,
            message,
            fields,
        );
        self.finish(sink, buf)
    }

    fn finish<S: Sink + ?Sized>(&self, sink: &S, buf: Vec<u8>) -> io::Result<usize> {
        let written = sink.write(&buf);
        self.pool.put(buf);
        written
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encoder")
            .field("version", &self.version)
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Builder for [`Encoder`].
#[derive(Default)]
pub struct EncoderBuilder {
    pool: Option<Arc<BufferPool>>,
    clock: Option<Arc<dyn Clock>>,
    version: ProtocolVersion,
}

impl EncoderBuilder {
    pub fn pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    pub fn build(self) -> Encoder {
        Encoder {
            pool: self.pool.unwrap_or_else(BufferPool::global),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            version: self.version,
            sequence: AtomicU64::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::wire::{DecodedValue, VERSION_2};
    use parking_lot::Mutex;

    const TS: u64 = 0x0102_0304_0506_0000;

    #[test]
    fn test_sequence_starts_at_one() {
        let encoder = Encoder::new();
        assert_eq!(encoder.next_sequence(), 1);
        assert_eq!(encoder.next_sequence(), 2);
    }

    #[test]
    fn test_structured_record_is_stamped() {
        let clock = Arc::new(ManualClock::new(TS));
        let encoder = Encoder::builder()
            .pool(Arc::new(BufferPool::new()))
            .shared_clock(clock.clone())
            .build();
        let sink = Mutex::new(Vec::new());

        encoder
            .write_structured(&sink, Level::Warn, "disk", &[Field::uint("free", 12)])
            .unwrap();
        clock.advance(1 << 16);
        encoder
            .write_structured(&sink, Level::Warn, "disk", &[Field::uint("free", 11)])
            .unwrap();

        let bytes = sink.lock();
        let first = wire::decode(&bytes).unwrap();
        let second = wire::decode(&bytes[first.encoded_len..]).unwrap();
        assert_eq!(first.sequence, Some(1));
        assert_eq!(second.sequence, Some(2));
        assert_eq!(second.timestamp, TS + (1 << 16));
        assert_eq!(second.fields[0].value, DecodedValue::Uint(11));
    }

    #[test]
    fn test_buffers_are_recycled() {
        let pool = Arc::new(BufferPool::new());
        let encoder = Encoder::builder().pool(pool.clone()).build();
        let sink = crate::sink::DiscardSink;

        for _ in 0..10 {
            encoder.write_basic(&sink, Level::Info, "steady state").unwrap();
        }
        assert_eq!(pool.allocations(), 1);
    }

    #[test]
    fn test_version_two_is_tagged() {
        let encoder = Encoder::builder()
            .clock(ManualClock::new(TS))
            .version(ProtocolVersion::V2)
            .build();
        let sink = Mutex::new(Vec::new());
        encoder.write_basic(&sink, Level::Error, "").unwrap();

        let bytes = sink.lock();
        assert_eq!(bytes[4], VERSION_2);
        let record = wire::decode(&bytes).unwrap();
        assert_eq!(record.layout, Layout::Basic);
        assert!(record.message.is_empty());
    }
}
