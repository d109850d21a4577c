mod handshake;

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::backoff::FixedDelay;
use crate::buffer::ByteBuffer;
use crate::config::ChannelOptions;
use crate::engine::{EngineError, EngineResult, EngineStatus, HandshakeStatus, TlsEngine};
use crate::error::{Error, Result};
use crate::net::{is_would_block, RawChannel};

/// plaintext buffers get this much on top of the engine's application size
const APP_BUFFER_MARGIN: usize = 64;

/// consecutive overflows tolerated after the destination was resized
const MAX_OVERFLOW_RETRIES: usize = 2;

const CLOSE_RETRY_DELAY_MS: u64 = 5;

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Closing,
    Closed,
}

impl From<u8> for ChannelState {
    fn from(value: u8) -> Self {
        match value {
            OPEN => Self::Open,
            CLOSING => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Result of a non-blocking [`TlsChannel::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// bytes copied into the destination
    Data(usize),
    /// nothing decrypted yet, retry when the raw channel is readable
    WouldBlock,
    /// peer closed, every further read returns this
    EndOfStream,
}

/// receiving half: ciphertext read from the raw channel and decrypted plaintext
struct Inbound {
    net_in: ByteBuffer,
    peer_app: ByteBuffer,
    end_of_stream: bool,
}

/// sending half: ciphertext waiting for the raw channel and plaintext scratch
struct Outbound {
    net_out: ByteBuffer,
    my_app: ByteBuffer,
}

#[derive(Debug, Default)]
struct Unwrapped {
    produced: usize,
    closed: bool,
}

/// TLS on top of a non-blocking [`RawChannel`].
///
/// The handshake runs to completion inside the constructor. Afterwards the
/// channel behaves like the raw one: `read` and `write` never block on the
/// network, they report would-block instead.
///
/// Reads and writes are serialized per direction, so one thread may read
/// while another one writes.
pub struct TlsChannel<C, E> {
    channel: C,
    engine: Mutex<E>,
    inbound: Mutex<Inbound>,
    outbound: Mutex<Outbound>,
    state: AtomicU8,
    close_timeout: Duration,
}

impl<C, E> TlsChannel<C, E>
where
    C: RawChannel,
    E: TlsEngine,
{
    pub fn new(channel: C, engine: E) -> Result<Self> {
        Self::with_options(channel, engine, &ChannelOptions::default())
    }

    /// Wrap `channel` and perform the handshake.
    ///
    /// Fails with [`Error::Handshake`] when the raw channel fails or the
    /// engine rejects the peer, and with [`Error::HandshakeTimeout`] when
    /// `options` carries a timeout that expires first.
    pub fn with_options(channel: C, engine: E, options: &ChannelOptions) -> Result<Self> {
        let app_size = options
            .app_buffer_size
            .unwrap_or_else(|| engine.application_buffer_size() + APP_BUFFER_MARGIN);
        let packet_size = options
            .packet_buffer_size
            .unwrap_or_else(|| engine.packet_buffer_size());
        debug!(app_size, packet_size, "allocating tls buffers");

        let tls_channel = Self {
            channel,
            engine: Mutex::new(engine),
            inbound: Mutex::new(Inbound {
                net_in: ByteBuffer::with_capacity(packet_size),
                peer_app: ByteBuffer::with_capacity(app_size),
                end_of_stream: false,
            }),
            outbound: Mutex::new(Outbound {
                net_out: ByteBuffer::with_capacity(packet_size),
                my_app: ByteBuffer::with_capacity(app_size),
            }),
            state: AtomicU8::new(OPEN),
            close_timeout: options.close_timeout(),
        };

        tls_channel.handshake(options.handshake_timeout())?;
        Ok(tls_channel)
    }

    pub fn state(&self) -> ChannelState {
        self.state.load(Ordering::SeqCst).into()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open && self.channel.is_open()
    }

    pub fn get_ref(&self) -> &C {
        &self.channel
    }

    pub fn with_engine<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&E) -> R,
    {
        f(&*self.engine.lock())
    }

    /// Decrypt into `dst`.
    ///
    /// Plaintext that doesn't fit stays buffered and is returned by the next
    /// call without touching the raw channel.
    pub fn read(&self, dst: &mut [u8]) -> Result<ReadOutcome> {
        if self.state() != ChannelState::Open {
            return Ok(ReadOutcome::EndOfStream);
        }

        let mut inbound = self.inbound.lock();
        let Inbound {
            net_in,
            peer_app,
            end_of_stream,
        } = &mut *inbound;

        if !peer_app.is_empty() {
            return Ok(ReadOutcome::Data(peer_app.copy_to(dst)));
        }
        if *end_of_stream {
            return Ok(ReadOutcome::EndOfStream);
        }
        if dst.is_empty() {
            return Ok(ReadOutcome::Data(0));
        }

        // complete records may already be waiting, e.g. right after the handshake
        if !net_in.is_empty() {
            self.decrypt(net_in, peer_app, end_of_stream)?;
            if !peer_app.is_empty() || *end_of_stream {
                return Ok(Self::deliver(peer_app, *end_of_stream, dst));
            }
        }

        if net_in.writable_len() == 0 {
            let packet_size = self.engine.lock().packet_buffer_size();
            net_in.reserve(packet_size);
        }

        match self.channel.read(net_in.writable()) {
            Ok(0) => {
                debug!("raw channel reached end of stream");
                *end_of_stream = true;
                return Ok(ReadOutcome::EndOfStream);
            }
            Ok(n) => {
                trace!(n, "read ciphertext");
                net_in.commit(n);
            }
            Err(err) if is_would_block(&err) => return Ok(ReadOutcome::WouldBlock),
            // close() ran while the raw read was in flight
            Err(err) if self.state() != ChannelState::Open => {
                debug!(%err, "raw read failed on a closed channel");
                *end_of_stream = true;
                return Ok(ReadOutcome::EndOfStream);
            }
            Err(err) => return Err(err.into()),
        }

        self.decrypt(net_in, peer_app, end_of_stream)?;
        Ok(Self::deliver(peer_app, *end_of_stream, dst))
    }

    fn decrypt(
        &self,
        net_in: &mut ByteBuffer,
        peer_app: &mut ByteBuffer,
        end_of_stream: &mut bool,
    ) -> Result<()> {
        let unwrapped = match self.unwrap_inbound(net_in, peer_app) {
            Ok(unwrapped) => unwrapped,
            Err(err) if self.state() != ChannelState::Open => {
                debug!(%err, "unwrap failed on a closed channel");
                *end_of_stream = true;
                return Ok(());
            }
            Err(err) => {
                error!(%err, "unwrap failed, tearing down channel");
                self.abort();
                return Err(Error::Unwrap(err));
            }
        };
        if unwrapped.closed || self.engine.lock().is_inbound_done() {
            debug!("peer closed tls session");
            *end_of_stream = true;
        }
        Ok(())
    }

    fn deliver(peer_app: &mut ByteBuffer, end_of_stream: bool, dst: &mut [u8]) -> ReadOutcome {
        let n = peer_app.copy_to(dst);
        if n > 0 {
            ReadOutcome::Data(n)
        } else if end_of_stream {
            ReadOutcome::EndOfStream
        } else {
            ReadOutcome::WouldBlock
        }
    }

    /// Encrypt at most one record of `src` and return how many plaintext
    /// bytes were taken.
    ///
    /// Counted bytes belong to the channel from then on, even when their
    /// ciphertext could not be handed to the raw channel yet: it goes out
    /// with the next `write` or `flush`, so callers never send them again.
    ///
    /// Returns 0 while ciphertext of an earlier write is still waiting for
    /// the raw channel; `src` is untouched then and must be retried.
    pub fn write(&self, src: &[u8]) -> Result<usize> {
        if self.state() != ChannelState::Open {
            return Err(Error::ChannelClosed);
        }

        let mut outbound = self.outbound.lock();
        let net_out = &mut outbound.net_out;

        if !self.flush_outbound(net_out)? {
            trace!(pending = net_out.len(), "ciphertext not flushed, write would block");
            return Ok(0);
        }
        if src.is_empty() {
            return Ok(0);
        }
        net_out.clear();

        let result = match self.wrap_into(src, net_out) {
            Ok(result) => result,
            Err(err) => {
                error!(%err, "wrap failed, tearing down channel");
                self.abort();
                return Err(Error::Wrap(err));
            }
        };
        if result.status == EngineStatus::Closed {
            return Err(Error::ChannelClosed);
        }
        trace!(
            consumed = result.bytes_consumed,
            produced = result.bytes_produced,
            "wrapped plaintext"
        );

        // leftover ciphertext goes out with the next write or flush
        self.flush_outbound(net_out)?;
        Ok(result.bytes_consumed)
    }

    /// Push buffered ciphertext; `Ok(false)` if some is still pending.
    pub fn flush(&self) -> Result<bool> {
        if self.state() == ChannelState::Closed {
            return Ok(true);
        }
        let mut outbound = self.outbound.lock();
        Ok(self.flush_outbound(&mut outbound.net_out)?)
    }

    /// Send close_notify and close the raw channel.
    ///
    /// Best effort: failures are logged, the channel always ends up
    /// [`ChannelState::Closed`]. Calling it again does nothing.
    pub fn close(&self) {
        if self
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            trace!("tls channel already closing");
            return;
        }
        debug!("closing tls channel");

        let mut outbound = self.outbound.lock();
        if let Err(err) = self.close_outbound(&mut outbound) {
            warn!(%err, "failed to send close_notify");
        }
        if let Err(err) = self.channel.close() {
            warn!(%err, "failed to close raw channel");
        }
        self.state.store(CLOSED, Ordering::SeqCst);
    }

    fn close_outbound(&self, outbound: &mut Outbound) -> Result<()> {
        {
            let mut engine = self.engine.lock();
            engine.close_outbound();
            engine.invalidate_session();
        }

        let Outbound { net_out, my_app } = outbound;
        my_app.clear();
        let deadline = Instant::now() + self.close_timeout;
        let mut delays = FixedDelay::from_millis(CLOSE_RETRY_DELAY_MS);

        loop {
            // anything buffered precedes close_notify on the wire
            while !self.flush_outbound(net_out)? {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "raw channel did not accept close_notify",
                    )
                    .into());
                }
                if let Some(delay) = delays.next() {
                    thread::sleep(delay);
                }
            }

            if self.engine.lock().is_outbound_done() {
                return Ok(());
            }

            let result = self.wrap_into(my_app.readable(), net_out).map_err(Error::Wrap)?;
            if result.bytes_produced == 0 && !self.engine.lock().is_outbound_done() {
                return Err(Error::Wrap(EngineError::Other(
                    "engine produced no close_notify".to_owned(),
                )));
            }
        }
    }

    /// connection-fatal failure: skip close_notify, just drop the raw channel
    fn abort(&self) {
        self.state.store(CLOSED, Ordering::SeqCst);
        if let Err(err) = self.channel.close() {
            warn!(%err, "failed to close raw channel");
        }
    }

    fn run_delegated_tasks(&self) -> std::result::Result<HandshakeStatus, EngineError> {
        let mut engine = self.engine.lock();
        let mut count = 0;
        while let Some(task) = engine.delegated_task() {
            task.run()?;
            count += 1;
        }
        let status = engine.handshake_status();
        trace!(count, ?status, "ran delegated tasks");
        Ok(status)
    }

    /// Decrypt every complete record in `net_in` into `peer_app`.
    fn unwrap_inbound(
        &self,
        net_in: &mut ByteBuffer,
        peer_app: &mut ByteBuffer,
    ) -> std::result::Result<Unwrapped, EngineError> {
        let mut unwrapped = Unwrapped::default();
        let mut overflows = 0;

        while !net_in.is_empty() {
            let result = self
                .engine
                .lock()
                .unwrap(net_in.readable(), peer_app.writable())?;
            net_in.consume(result.bytes_consumed);

            match result.status {
                EngineStatus::Ok => {
                    overflows = 0;
                    peer_app.commit(result.bytes_produced);
                    unwrapped.produced += result.bytes_produced;
                    if result.handshake_status == HandshakeStatus::NeedTask {
                        self.run_delegated_tasks()?;
                    }
                    if result.is_idle() {
                        break;
                    }
                }
                EngineStatus::BufferOverflow => {
                    overflows += 1;
                    if overflows > MAX_OVERFLOW_RETRIES {
                        return Err(EngineError::Other(format!(
                            "unwrap keeps overflowing a buffer of {} bytes",
                            peer_app.capacity()
                        )));
                    }
                    let app_size = self.engine.lock().application_buffer_size();
                    let capacity = peer_app.capacity();
                    peer_app.reserve(app_size);
                    if peer_app.capacity() > capacity {
                        debug!(
                            from = capacity,
                            to = peer_app.capacity(),
                            "grew plaintext buffer"
                        );
                    }
                }
                EngineStatus::BufferUnderflow => {
                    let packet_size = self.engine.lock().packet_buffer_size();
                    if packet_size > net_in.capacity() {
                        debug!(
                            from = net_in.capacity(),
                            to = packet_size,
                            "grew ciphertext buffer"
                        );
                        net_in.grow(packet_size);
                    } else {
                        net_in.compact();
                    }
                    break;
                }
                EngineStatus::Closed => {
                    peer_app.commit(result.bytes_produced);
                    unwrapped.produced += result.bytes_produced;
                    unwrapped.closed = true;
                    break;
                }
            }
        }

        Ok(unwrapped)
    }

    /// Encrypt `src` into `net_out`, growing it when the engine asks for more
    /// room.
    fn wrap_into(
        &self,
        src: &[u8],
        net_out: &mut ByteBuffer,
    ) -> std::result::Result<EngineResult, EngineError> {
        loop {
            let result = self.engine.lock().wrap(src, net_out.writable())?;

            if result.status != EngineStatus::BufferOverflow {
                net_out.commit(result.bytes_produced);
                if result.handshake_status == HandshakeStatus::NeedTask {
                    self.run_delegated_tasks()?;
                }
                return Ok(result);
            }

            let packet_size = self.engine.lock().packet_buffer_size();
            if packet_size <= net_out.writable_len() {
                return Err(EngineError::Other(format!(
                    "wrap overflows {} bytes of room, engine asks for {packet_size}",
                    net_out.writable_len()
                )));
            }
            debug!(
                from = net_out.capacity(),
                packet_size, "grew outbound ciphertext buffer"
            );
            net_out.reserve(packet_size);
        }
    }

    /// `Ok(false)` when the raw channel stopped accepting bytes
    fn flush_outbound(&self, net_out: &mut ByteBuffer) -> io::Result<bool> {
        while !net_out.is_empty() {
            match self.channel.write(net_out.readable()) {
                Ok(0) => return Ok(false),
                Ok(n) => net_out.consume(n),
                Err(err) if is_would_block(&err) => return Ok(false),
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }
}

impl<C, E> fmt::Debug for TlsChannel<C, E>
where
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsChannel")
            .field("channel", &self.channel)
            .field("state", &ChannelState::from(self.state.load(Ordering::SeqCst)))
            .finish()
    }
}

impl<C: RawChannel, E: TlsEngine> io::Read for &TlsChannel<C, E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match TlsChannel::read(*self, buf).map_err(Error::into_io_error)? {
            ReadOutcome::Data(n) => Ok(n),
            ReadOutcome::WouldBlock => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            ReadOutcome::EndOfStream => Ok(0),
        }
    }
}

impl<C: RawChannel, E: TlsEngine> io::Write for &TlsChannel<C, E> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match TlsChannel::write(*self, buf).map_err(Error::into_io_error)? {
            0 => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            n => Ok(n),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if TlsChannel::flush(*self).map_err(Error::into_io_error)? {
            Ok(())
        } else {
            Err(io::Error::from(io::ErrorKind::WouldBlock))
        }
    }
}

impl<C: RawChannel, E: TlsEngine> io::Read for TlsChannel<C, E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

impl<C: RawChannel, E: TlsEngine> io::Write for TlsChannel<C, E> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut &*self)
    }
}
