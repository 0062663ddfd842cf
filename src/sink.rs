use std::fmt;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

/// Destination for encoded records.
///
/// A sink receives one complete record per call, from whichever thread
/// happens to forward it, so implementations take `&self` and do their own
/// locking. Returning an error is fine: callers count it and carry on.
///
/// Anything implementing [`std::io::Write`] becomes a sink once it is wrapped
/// in a [`parking_lot::Mutex`]:
///
/// ```
/// # use zlog::Sink;
/// use parking_lot::Mutex;
///
/// let sink = Mutex::new(Vec::<u8>::new());
/// sink.write(b"abc").unwrap();
/// assert_eq!(&*sink.lock(), b"abc");
/// ```
pub trait Sink: Send + Sync {
    /// Consumes `buf`, returning how many bytes were accepted.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;
}

impl<W: io::Write + Send> Sink for Mutex<W> {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self.lock();
        out.write_all(buf)?;
        Ok(buf.len())
    }
}

impl<S: Sink + ?Sized> Sink for Arc<S> {
    #[inline]
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    #[inline]
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }
}

impl<S: Sink + ?Sized> Sink for &S {
    #[inline]
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }
}

/// Accepts and drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl Sink for DiscardSink {
    #[inline]
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> Sink for FnSink<F>
where
    F: Fn(&[u8]) -> io::Result<usize> + Send + Sync,
{
    #[inline]
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (self.0)(buf)
    }
}

impl<F> fmt::Debug for FnSink<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnSink")
    }
}
