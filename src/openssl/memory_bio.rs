use std::fmt::{Debug, Formatter};
use std::io;
use std::io::Read;
use std::io::Write;

/// In-memory transport under an `SslStream`.
///
/// OpenSSL reads ciphertext fed by the engine and writes ciphertext the
/// engine later hands out; it never sees the real channel. An empty input
/// reports `WouldBlock`, which OpenSSL turns into `WANT_READ`.
#[derive(Default)]
pub(super) struct MemoryBio {
    incoming: Vec<u8>,
    read_pos: usize,
    outgoing: Vec<u8>,
}

impl MemoryBio {
    pub fn new() -> Self {
        Self::default()
    }

    /// queue ciphertext for OpenSSL to read
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.read_pos == self.incoming.len() {
            self.incoming.clear();
            self.read_pos = 0;
        }
        self.incoming.extend_from_slice(bytes);
    }

    /// ciphertext written by OpenSSL and not handed out yet
    pub fn pending_output(&self) -> usize {
        self.outgoing.len()
    }

    /// move as much pending ciphertext as fits into `dst`
    pub fn take_output(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.outgoing.len());
        dst[..n].copy_from_slice(&self.outgoing[..n]);
        self.outgoing.drain(..n);
        n
    }
}

impl Debug for MemoryBio {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("MemoryBio")
            .field("incoming", &(self.incoming.len() - self.read_pos))
            .field("outgoing", &self.outgoing.len())
            .finish()
    }
}

impl Read for MemoryBio {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = &self.incoming[self.read_pos..];
        if available.is_empty() {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.read_pos += n;
        Ok(n)
    }
}

impl Write for MemoryBio {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
