use std::io;
use std::io::Read;
use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::debug;

use super::RawChannel;

/// [`RawChannel`] over a std TCP stream.
///
/// Blocking by default; call [`TcpChannel::set_nonblocking`] to get
/// would-block semantics, or [`TcpChannel::set_read_timeout`] to bound
/// blocking reads (a timed out read counts as would-block).
#[derive(Debug)]
pub struct TcpChannel {
    stream: TcpStream,
    open: AtomicBool,
}

impl TcpChannel {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            open: AtomicBool::new(true),
        }
    }

    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        debug!("connected to: {:?}", stream.peer_addr());
        Ok(Self::new(stream))
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.stream.set_nonblocking(nonblocking)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }
}

impl From<TcpStream> for TcpChannel {
    fn from(stream: TcpStream) -> Self {
        Self::new(stream)
    }
}

impl RawChannel for TcpChannel {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.stream).read(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (&self.stream).write(buf)
    }

    fn close(&self) -> io::Result<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("closing tcp channel: {:?}", self.stream.peer_addr());
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // peer already went away
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
