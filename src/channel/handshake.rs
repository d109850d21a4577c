use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::backoff::ExponentialBackoff;
use crate::engine::{EngineStatus, HandshakeStatus, TlsEngine};
use crate::error::{Error, Result};
use crate::net::{is_would_block, RawChannel};

use super::{Inbound, Outbound, TlsChannel};

const IDLE_BACKOFF_BASE_MS: u64 = 2;
const IDLE_BACKOFF_MAX: Duration = Duration::from_millis(50);

/// Paces a handshake waiting on a raw channel that is not ready, and
/// enforces its deadline.
struct HandshakeClock {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    backoff: ExponentialBackoff,
}

impl HandshakeClock {
    fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            deadline: timeout.map(|timeout| Instant::now() + timeout),
            backoff: ExponentialBackoff::from_millis(IDLE_BACKOFF_BASE_MS)
                .max_delay(IDLE_BACKOFF_MAX),
        }
    }

    fn check(&self) -> Result<()> {
        match (self.deadline, self.timeout) {
            (Some(deadline), Some(timeout)) if Instant::now() >= deadline => {
                Err(Error::HandshakeTimeout(timeout))
            }
            _ => Ok(()),
        }
    }

    /// sleep before retrying an operation that would block
    fn idle(&mut self) -> Result<()> {
        self.check()?;
        let mut delay = self.backoff.next().unwrap_or(IDLE_BACKOFF_MAX);
        if let Some(deadline) = self.deadline {
            delay = delay.min(deadline.saturating_duration_since(Instant::now()));
        }
        thread::sleep(delay);
        self.check()
    }

    fn progressed(&mut self) {
        self.backoff.reset();
    }
}

impl<C, E> TlsChannel<C, E>
where
    C: RawChannel,
    E: TlsEngine,
{
    /// Drive the engine until the handshake is done.
    ///
    /// Holds both direction locks for the whole handshake.
    pub(super) fn handshake(&self, timeout: Option<Duration>) -> Result<()> {
        let mut clock = HandshakeClock::new(timeout);
        let mut inbound = self.inbound.lock();
        let mut outbound = self.outbound.lock();

        inbound.net_in.clear();
        inbound.peer_app.clear();
        outbound.net_out.clear();
        outbound.my_app.clear();

        let mut status = {
            let mut engine = self.engine.lock();
            engine.begin_handshake().map_err(Error::handshake)?;
            engine.handshake_status()
        };
        debug!(?status, "begin handshake");

        while !status.is_complete() {
            clock.check()?;
            trace!(?status, "handshake step");
            status = match status {
                HandshakeStatus::NeedWrap => self.handshake_wrap(&mut outbound, &mut clock)?,
                HandshakeStatus::NeedUnwrap => self.handshake_unwrap(&mut inbound, &mut clock)?,
                HandshakeStatus::NeedTask => self.run_delegated_tasks().map_err(Error::handshake)?,
                HandshakeStatus::Finished | HandshakeStatus::NotHandshaking => status,
            };
        }

        outbound.net_out.clear();
        outbound.my_app.clear();
        // application data can arrive right behind the peer's last flight
        inbound.net_in.compact();
        inbound.peer_app.compact();

        debug!(
            buffered_plaintext = inbound.peer_app.len(),
            buffered_ciphertext = inbound.net_in.len(),
            "handshake finished"
        );
        Ok(())
    }

    fn handshake_wrap(
        &self,
        outbound: &mut Outbound,
        clock: &mut HandshakeClock,
    ) -> Result<HandshakeStatus> {
        let Outbound { net_out, my_app } = outbound;
        my_app.clear();

        let result = self
            .wrap_into(my_app.readable(), net_out)
            .map_err(Error::handshake)?;
        trace!(produced = result.bytes_produced, "wrapped handshake data");

        while !self.flush_outbound(net_out).map_err(Error::handshake)? {
            clock.idle()?;
        }
        clock.progressed();

        if result.status == EngineStatus::Closed {
            return Err(Error::handshake("engine closed during handshake"));
        }
        if result.handshake_status == HandshakeStatus::Finished {
            return Ok(HandshakeStatus::Finished);
        }

        let status = self.engine.lock().handshake_status();
        if result.bytes_produced == 0 && status == HandshakeStatus::NeedWrap {
            return Err(Error::handshake("engine produced no handshake data"));
        }
        Ok(status)
    }

    fn handshake_unwrap(
        &self,
        inbound: &mut Inbound,
        clock: &mut HandshakeClock,
    ) -> Result<HandshakeStatus> {
        let Inbound {
            net_in,
            peer_app,
            end_of_stream,
        } = inbound;

        if net_in.writable_len() == 0 {
            let packet_size = self.engine.lock().packet_buffer_size();
            net_in.reserve(packet_size);
        }

        match self.channel.read(net_in.writable()) {
            Ok(0) => {
                *end_of_stream = true;
                return Err(Error::handshake("peer closed channel during handshake"));
            }
            Ok(n) => {
                trace!(n, "read handshake data");
                net_in.commit(n);
                clock.progressed();
            }
            Err(err) if is_would_block(&err) => {
                clock.idle()?;
                return Ok(HandshakeStatus::NeedUnwrap);
            }
            Err(err) => return Err(Error::handshake(err)),
        }

        let unwrapped = self
            .unwrap_inbound(net_in, peer_app)
            .map_err(Error::handshake)?;
        if unwrapped.closed {
            *end_of_stream = true;
            return Err(Error::handshake("peer closed tls session during handshake"));
        }

        Ok(self.engine.lock().handshake_status())
    }
}
