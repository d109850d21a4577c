use std::fmt;

/// Growable byte buffer with separate read and write cursors.
///
/// Bytes are appended at the write cursor (`writable` + `commit`) and taken
/// from the read cursor (`readable` + `consume`). Capacity never shrinks;
/// growing keeps unread bytes and copies only those.
pub struct ByteBuffer {
    buf: Vec<u8>,
    read: usize,
    write: usize,
}

impl ByteBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            read: 0,
            write: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// unread bytes
    pub fn len(&self) -> usize {
        self.write - self.read
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    pub fn readable(&self) -> &[u8] {
        &self.buf[self.read..self.write]
    }

    pub fn writable(&mut self) -> &mut [u8] {
        &mut self.buf[self.write..]
    }

    pub fn writable_len(&self) -> usize {
        self.buf.len() - self.write
    }

    /// mark `n` bytes of `writable` as written
    pub fn commit(&mut self, n: usize) {
        assert!(n <= self.writable_len(), "commit past capacity");
        self.write += n;
    }

    /// drop `n` unread bytes
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.len(), "consume past unread bytes");
        self.read += n;
        if self.read == self.write {
            self.clear();
        }
    }

    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    /// move unread bytes to the front
    pub fn compact(&mut self) {
        if self.read == 0 {
            return;
        }
        self.buf.copy_within(self.read..self.write, 0);
        self.write -= self.read;
        self.read = 0;
    }

    /// Grow to `capacity` if that is larger than the current one.
    pub fn grow(&mut self, capacity: usize) {
        if capacity <= self.buf.len() {
            return;
        }
        let mut buf = vec![0; capacity];
        let len = self.len();
        buf[..len].copy_from_slice(self.readable());
        self.buf = buf;
        self.read = 0;
        self.write = len;
    }

    /// Make sure at least `n` bytes are writable, compacting first and then
    /// growing to `n + unread` if compacting is not enough.
    pub fn reserve(&mut self, n: usize) {
        if self.writable_len() >= n {
            return;
        }
        self.compact();
        if self.writable_len() < n {
            let capacity = n + self.len();
            self.grow(capacity);
        }
    }

    /// copy as many unread bytes as fit into `dst`
    pub fn copy_to(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.len());
        dst[..n].copy_from_slice(&self.buf[self.read..self.read + n]);
        self.consume(n);
        n
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("capacity", &self.capacity())
            .field("read", &self.read)
            .field("write", &self.write)
            .finish()
    }
}
