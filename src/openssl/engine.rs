use openssl::ssl::{self, ErrorCode};
use tracing::{debug, trace};

use crate::config::Role;
use crate::engine::{
    record_len, DelegatedTask, EngineError, EngineResult, EngineStatus, HandshakeStatus,
    TlsEngine, MAX_PACKET_SIZE, MAX_PLAINTEXT_SIZE,
};

use super::certificate::Certificate;
use super::memory_bio::MemoryBio;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    Idle,
    /// input arrived, OpenSSL has to process it
    Step,
    /// waiting for the peer's next flight
    AwaitInput,
    /// done, but the last flight is not handed out yet
    Flushing,
    Complete,
    Failed,
}

/// [`TlsEngine`] backed by an OpenSSL `SslStream` over a memory BIO.
///
/// Records are consumed one at a time so the engine reports underflow for a
/// partial record and overflow when the destination can't take a full
/// record of plaintext, the same contract the channel expects from any
/// engine.
#[derive(Debug)]
pub struct OpensslEngine {
    stream: ssl::SslStream<MemoryBio>,
    role: Role,
    handshake: Handshake,
    outbound_closed: bool,
    inbound_done: bool,
}

impl OpensslEngine {
    pub fn new(mut ssl: ssl::Ssl, role: Role) -> Result<Self, EngineError> {
        match role {
            Role::Client => ssl.set_connect_state(),
            Role::Server => ssl.set_accept_state(),
        }
        let stream = ssl::SslStream::new(ssl, MemoryBio::new())?;

        Ok(Self {
            stream,
            role,
            handshake: Handshake::Idle,
            outbound_closed: false,
            inbound_done: false,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn ssl(&self) -> &ssl::SslRef {
        self.stream.ssl()
    }

    pub fn peer_certificate(&self) -> Option<Certificate> {
        self.stream.ssl().peer_certificate().map(Certificate)
    }

    /// negotiated protocol, e.g. `TLSv1.3`
    pub fn protocol_version(&self) -> &'static str {
        self.stream.ssl().version_str()
    }

    pub fn cipher_name(&self) -> Option<&'static str> {
        self.stream.ssl().current_cipher().map(|cipher| cipher.name())
    }

    fn pending_output(&self) -> usize {
        self.stream.get_ref().pending_output()
    }

    fn is_handshaking(&self) -> bool {
        matches!(
            self.handshake,
            Handshake::Idle | Handshake::Step | Handshake::AwaitInput
        )
    }

    fn result(
        &self,
        status: EngineStatus,
        bytes_consumed: usize,
        bytes_produced: usize,
    ) -> EngineResult {
        EngineResult::new(
            status,
            self.handshake_status(),
            bytes_consumed,
            bytes_produced,
        )
    }

    fn step_handshake(&mut self) -> Result<(), EngineError> {
        match self.stream.do_handshake() {
            Ok(()) => {
                let ssl = self.stream.ssl();
                debug!(
                    role = ?self.role,
                    version = ssl.version_str(),
                    cipher = ?ssl.current_cipher().map(|cipher| cipher.name()),
                    "tls handshake complete"
                );
                self.handshake = if self.pending_output() > 0 {
                    Handshake::Flushing
                } else {
                    Handshake::Complete
                };
                Ok(())
            }
            Err(err) if err.code() == ErrorCode::WANT_READ || err.code() == ErrorCode::WANT_WRITE => {
                self.handshake = Handshake::AwaitInput;
                Ok(())
            }
            Err(err) => {
                debug!(role = ?self.role, %err, "tls handshake failed");
                self.handshake = Handshake::Failed;
                Err(err.into())
            }
        }
    }

    /// hand out pending handshake messages or close_notify
    fn wrap_pending(&mut self, dst: &mut [u8]) -> EngineResult {
        let produced = self.stream.get_mut().take_output(dst);

        let handshake_status =
            if self.handshake == Handshake::Flushing && self.pending_output() == 0 {
                self.handshake = Handshake::Complete;
                HandshakeStatus::Finished
            } else {
                self.handshake_status()
            };
        let status = if self.outbound_closed {
            EngineStatus::Closed
        } else {
            EngineStatus::Ok
        };

        trace!(produced, ?handshake_status, "wrapped pending output");
        EngineResult::new(status, handshake_status, 0, produced)
    }

    fn wrap_application_data(
        &mut self,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<EngineResult, EngineError> {
        let chunk = src.len().min(MAX_PLAINTEXT_SIZE);
        let mut required = self.pending_output();
        if chunk > 0 {
            required += MAX_PACKET_SIZE;
        }
        if dst.len() < required {
            return Ok(self.result(EngineStatus::BufferOverflow, 0, 0));
        }

        let consumed = if chunk > 0 {
            self.stream.ssl_write(&src[..chunk])?
        } else {
            0
        };
        let produced = self.stream.get_mut().take_output(dst);
        Ok(self.result(EngineStatus::Ok, consumed, produced))
    }

    /// drain plaintext decrypted from the fed record
    fn read_application_data(
        &mut self,
        dst: &mut [u8],
    ) -> Result<(EngineStatus, usize), EngineError> {
        let mut produced = 0;
        while produced < dst.len() {
            match self.stream.ssl_read(&mut dst[produced..]) {
                Ok(0) => break,
                Ok(n) => produced += n,
                Err(err) if err.code() == ErrorCode::WANT_READ => break,
                Err(err) if err.code() == ErrorCode::ZERO_RETURN => {
                    debug!(role = ?self.role, "received close_notify");
                    self.inbound_done = true;
                    return Ok((EngineStatus::Closed, produced));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok((EngineStatus::Ok, produced))
    }
}

impl TlsEngine for OpensslEngine {
    fn begin_handshake(&mut self) -> Result<(), EngineError> {
        if self.handshake == Handshake::Idle {
            trace!(role = ?self.role, "begin handshake");
            self.handshake = Handshake::Step;
        }
        Ok(())
    }

    fn handshake_status(&self) -> HandshakeStatus {
        match self.handshake {
            Handshake::Idle | Handshake::Complete | Handshake::Failed => {
                HandshakeStatus::NotHandshaking
            }
            Handshake::Step => HandshakeStatus::NeedTask,
            Handshake::AwaitInput if self.pending_output() > 0 => HandshakeStatus::NeedWrap,
            Handshake::AwaitInput => HandshakeStatus::NeedUnwrap,
            Handshake::Flushing => HandshakeStatus::NeedWrap,
        }
    }

    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        if dst.is_empty() {
            return Ok(self.result(EngineStatus::BufferOverflow, 0, 0));
        }
        if self.handshake == Handshake::Complete && !self.outbound_closed {
            self.wrap_application_data(src, dst)
        } else {
            Ok(self.wrap_pending(dst))
        }
    }

    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        if self.inbound_done {
            return Ok(self.result(EngineStatus::Closed, 0, 0));
        }

        let len = match record_len(src)? {
            Some(len) if len <= src.len() => len,
            _ => return Ok(self.result(EngineStatus::BufferUnderflow, 0, 0)),
        };

        if self.is_handshaking() {
            self.stream.get_mut().feed(&src[..len]);
            self.handshake = Handshake::Step;
            trace!(len, "queued handshake record");
            return Ok(self.result(EngineStatus::Ok, len, 0));
        }

        if dst.len() < MAX_PLAINTEXT_SIZE {
            return Ok(self.result(EngineStatus::BufferOverflow, 0, 0));
        }

        self.stream.get_mut().feed(&src[..len]);
        let (status, produced) = self.read_application_data(dst)?;
        trace!(len, produced, ?status, "unwrapped record");
        Ok(self.result(status, len, produced))
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask<'_>> {
        if self.handshake != Handshake::Step {
            return None;
        }
        Some(DelegatedTask::new(move || self.step_handshake()))
    }

    fn close_outbound(&mut self) {
        if self.outbound_closed {
            return;
        }
        self.outbound_closed = true;

        if matches!(self.handshake, Handshake::Complete | Handshake::Flushing) {
            match self.stream.shutdown() {
                Ok(_) => trace!(role = ?self.role, "queued close_notify"),
                Err(err) => debug!(role = ?self.role, %err, "tls shutdown failed"),
            }
        }
    }

    fn is_outbound_done(&self) -> bool {
        self.outbound_closed && self.pending_output() == 0
    }

    fn is_inbound_done(&self) -> bool {
        self.inbound_done
    }

    fn application_buffer_size(&self) -> usize {
        MAX_PLAINTEXT_SIZE
    }

    fn packet_buffer_size(&self) -> usize {
        MAX_PACKET_SIZE + self.pending_output()
    }
}
