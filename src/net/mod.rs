//! Raw byte channels a [`crate::TlsChannel`] runs on top of.

mod memory;
mod tcp;

pub use memory::{duplex, MemoryChannel};
pub use tcp::TcpChannel;

use std::io;
use std::sync::Arc;

/// Duplex byte transport with non-blocking semantics.
///
/// * `read` returning `Ok(0)` for a non-empty buffer means the peer closed.
/// * an error of kind [`io::ErrorKind::WouldBlock`] means no progress is
///   possible right now and the call should be retried later.
///
/// Methods take `&self` so a channel can be read and written from two
/// threads at once, the same way `&TcpStream` implements both `Read` and
/// `Write`.
pub trait RawChannel: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    fn close(&self) -> io::Result<()>;

    fn is_open(&self) -> bool;
}

/// true when an error only means "try again later"
pub fn is_would_block(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

impl<T: RawChannel + ?Sized> RawChannel for &T {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn close(&self) -> io::Result<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

impl<T: RawChannel + ?Sized> RawChannel for Arc<T> {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn close(&self) -> io::Result<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

impl<T: RawChannel + ?Sized> RawChannel for Box<T> {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn close(&self) -> io::Result<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}
