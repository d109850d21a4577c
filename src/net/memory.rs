use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::RawChannel;

/// One direction of a duplex pipe.
#[derive(Default)]
struct Pipe {
    bytes: Mutex<VecDeque<u8>>,
    closed: AtomicBool,
}

/// Create a connected pair of non-blocking in-memory channels.
///
/// Bytes written to one end are read from the other. Reading an empty pipe
/// returns `WouldBlock`; once the writing end is closed and drained, reads
/// return `Ok(0)`.
pub fn duplex() -> (MemoryChannel, MemoryChannel) {
    let a_to_b = Arc::new(Pipe::default());
    let b_to_a = Arc::new(Pipe::default());

    (
        MemoryChannel::new(b_to_a.clone(), a_to_b.clone()),
        MemoryChannel::new(a_to_b, b_to_a),
    )
}

pub struct MemoryChannel {
    inbound: Arc<Pipe>,
    outbound: Arc<Pipe>,
    open: AtomicBool,
    write_limit: AtomicUsize,
}

impl MemoryChannel {
    fn new(inbound: Arc<Pipe>, outbound: Arc<Pipe>) -> Self {
        Self {
            inbound,
            outbound,
            open: AtomicBool::new(true),
            write_limit: AtomicUsize::new(usize::MAX),
        }
    }

    /// Limit how many bytes further writes accept in total; `Some(0)` makes
    /// every write would-block, `None` lifts the limit.
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.write_limit
            .store(limit.unwrap_or(usize::MAX), Ordering::SeqCst);
    }

    /// bytes written by the peer and not read yet
    pub fn pending(&self) -> usize {
        self.inbound.bytes.lock().len()
    }
}

impl fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("open", &self.open.load(Ordering::SeqCst))
            .field("pending", &self.pending())
            .finish()
    }
}

impl RawChannel for MemoryChannel {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.is_open() {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        let mut bytes = self.inbound.bytes.lock();
        if bytes.is_empty() {
            return if self.inbound.closed.load(Ordering::SeqCst) {
                Ok(0)
            } else {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            };
        }
        let n = buf.len().min(bytes.len());
        for (dst, src) in buf.iter_mut().zip(bytes.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if !self.is_open() {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        if self.outbound.closed.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let mut accepted = 0;
        let _ = self
            .write_limit
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |limit| {
                accepted = buf.len().min(limit);
                if limit == usize::MAX {
                    Some(limit)
                } else {
                    Some(limit - accepted)
                }
            });
        if accepted == 0 {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }

        self.outbound.bytes.lock().extend(&buf[..accepted]);
        Ok(accepted)
    }

    fn close(&self) -> io::Result<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.outbound.closed.store(true, Ordering::SeqCst);
            self.inbound.closed.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
