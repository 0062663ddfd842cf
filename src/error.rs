use thiserror::Error;

/// Errors produced by the wire codec and the dispatcher.
///
/// Decode errors are local to a single record: a stream reader reports them
/// and moves on. `PoolMiss` has no variant because a pool miss always falls
/// back to a fresh allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The first four bytes are not the `ZLOG` tag.
    #[error("invalid magic header")]
    InvalidMagic,

    /// The buffer is shorter than the lengths it declares.
    #[error("record truncated (needed {needed} bytes, have {available})")]
    Truncated { needed: usize, available: usize },

    /// Neither header layout fits the buffer.
    #[error("cannot determine record layout")]
    AmbiguousHeader,

    /// The ring has no free slot and the caller asked not to wait.
    #[error("ring buffer full")]
    RingFull,

    /// The dispatcher has been closed.
    #[error("dispatcher closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        let kind = match err {
            Error::Closed => std::io::ErrorKind::BrokenPipe,
            Error::RingFull => std::io::ErrorKind::WouldBlock,
            Error::InvalidMagic | Error::Truncated { .. } | Error::AmbiguousHeader => {
                std::io::ErrorKind::InvalidData
            }
        };
        std::io::Error::new(kind, err)
    }
}
