//! # zlog
//!
//! A binary log pipeline built for throughput:
//!
//! * **Compact records**: a fixed little header plus typed fields, no text formatting
//!   on the hot path
//! * **Lock-free hand-off**: producers queue records on a bounded ring that worker
//!   threads drain into a slow sink
//! * **No dropped records**: a full ring makes producers help drain it instead of
//!   discarding data
//! * **Pooled memory**: scratch buffers and queue entries are recycled
//!
//! ## Main Components
//!
//! * [`wire`]: encodes records to bytes and decodes them back
//! * [`Encoder`]: stamps records with a timestamp and sequence number and writes them
//!   to a [`Sink`]
//! * [`AsyncDispatcher`]: asynchronous sink wrapper backed by a [`ring::RingBuffer`]
//! * [`BufferPool`]: size-classed buffer recycling
//! * [`TextRenderer`]: a sink that turns records into human-readable lines
//! * [`RecordReader`]: iterates a stream of concatenated records
//!
//! ## Quick Start
//!
//! ```
//! use zlog::{AsyncDispatcher, DispatcherConfig, Encoder, RecordReader};
//! use zlog::wire::{Field, Level, ProtocolVersion};
//! use parking_lot::Mutex;
//!
//! // Records end up in memory here; any `io::Write` works the same way.
//! let dispatcher = AsyncDispatcher::with_config(
//!     Mutex::new(Vec::<u8>::new()),
//!     DispatcherConfig::default().with_workers(1),
//! ).unwrap();
//! // Version 2 tags each record with its layout.
//! let encoder = Encoder::builder().version(ProtocolVersion::V2).build();
//!
//! encoder.write_basic(&dispatcher, Level::Info, "service started").unwrap();
//! encoder.write_structured(&dispatcher, Level::Warn, "slow request",
//!                          &[Field::string("path", "/login"), Field::uint("ms", 812)]).unwrap();
//! dispatcher.close();
//!
//! let bytes = dispatcher.sink().lock();
//! let records: Vec<_> = RecordReader::new(&bytes).collect::<Result<_, _>>().unwrap();
//! assert_eq!(records.len(), 2);
//! ```

pub mod buffer_pool;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod encoder;
pub mod error;
pub mod idle;
pub mod pool;
pub mod reader;
pub mod render;
pub mod ring;
pub mod sink;
pub mod wire;

pub use buffer_pool::BufferPool;
pub use config::DispatcherConfig;
pub use dispatcher::{AsyncDispatcher, DispatcherStats};
pub use encoder::Encoder;
pub use error::{Error, Result};
pub use reader::RecordReader;
pub use render::TextRenderer;
pub use sink::{DiscardSink, FnSink, Sink};
pub use wire::{Field, Level, Record, Value};
