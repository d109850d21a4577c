//! TLS engine abstraction.
//!
//! An engine is the TLS state machine of a single connection. It never
//! touches the network: ciphertext goes in through [`TlsEngine::unwrap`] and
//! comes out of [`TlsEngine::wrap`], which lets [`crate::TlsChannel`] drive it
//! over any non-blocking byte channel.

mod record;

pub use record::{record_len, ContentType, MAX_PACKET_SIZE, MAX_PLAINTEXT_SIZE, RECORD_HEADER_LEN};

use std::fmt;

use thiserror::Error;

/// Next action the engine needs in order to make handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    NotHandshaking,
    NeedWrap,
    NeedUnwrap,
    NeedTask,
    Finished,
}

impl HandshakeStatus {
    /// handshake is done or was never required
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Finished | Self::NotHandshaking)
    }
}

/// Outcome of a single `wrap` or `unwrap` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Ok,
    /// destination buffer can't hold the output
    BufferOverflow,
    /// source doesn't contain a complete record
    BufferUnderflow,
    /// engine is closed in this direction
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineResult {
    pub status: EngineStatus,
    pub handshake_status: HandshakeStatus,
    pub bytes_consumed: usize,
    pub bytes_produced: usize,
}

impl EngineResult {
    pub fn new(
        status: EngineStatus,
        handshake_status: HandshakeStatus,
        bytes_consumed: usize,
        bytes_produced: usize,
    ) -> Self {
        Self {
            status,
            handshake_status,
            bytes_consumed,
            bytes_produced,
        }
    }

    /// no bytes moved in either direction
    pub fn is_idle(&self) -> bool {
        self.bytes_consumed == 0 && self.bytes_produced == 0
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[cfg(feature = "openssl_tls")]
    #[error("OpenSslError: {0}")]
    OpenSslError(#[from] openssl::ssl::Error),

    #[cfg(feature = "openssl_tls")]
    #[error("ErrorStack: {0}")]
    ErrorStack(#[from] openssl::error::ErrorStack),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("{0}")]
    Other(String),
}

/// Work the engine wants done before it can continue, typically the
/// expensive part of a handshake (key exchange, certificate verification).
///
/// Tasks borrow the engine and always run to completion on the calling
/// thread.
pub struct DelegatedTask<'a>(Box<dyn FnOnce() -> Result<(), EngineError> + 'a>);

impl<'a> DelegatedTask<'a> {
    pub fn new<F>(task: F) -> Self
    where
        F: FnOnce() -> Result<(), EngineError> + 'a,
    {
        Self(Box::new(task))
    }

    pub fn run(self) -> Result<(), EngineError> {
        (self.0)()
    }
}

impl fmt::Debug for DelegatedTask<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DelegatedTask")
    }
}

/// TLS state machine for one connection.
///
/// `wrap` turns plaintext into ciphertext, `unwrap` does the reverse. Both
/// report how much they consumed and produced; when a buffer is too small
/// they return [`EngineStatus::BufferOverflow`] or
/// [`EngineStatus::BufferUnderflow`] without moving any bytes, and the caller
/// resizes using [`TlsEngine::application_buffer_size`] or
/// [`TlsEngine::packet_buffer_size`].
pub trait TlsEngine: Send {
    fn begin_handshake(&mut self) -> Result<(), EngineError>;

    fn handshake_status(&self) -> HandshakeStatus;

    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError>;

    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError>;

    /// next pending task, `None` when nothing is left to run
    fn delegated_task(&mut self) -> Option<DelegatedTask<'_>>;

    /// queue close_notify; following `wrap` calls emit it
    fn close_outbound(&mut self);

    fn is_outbound_done(&self) -> bool;

    fn is_inbound_done(&self) -> bool;

    /// prevent the current session from being resumed
    fn invalidate_session(&mut self) {}

    /// largest plaintext a single `unwrap` may produce
    fn application_buffer_size(&self) -> usize;

    /// largest ciphertext a single `wrap` may produce, or a single `unwrap`
    /// may need
    fn packet_buffer_size(&self) -> usize;
}

impl<E: TlsEngine + ?Sized> TlsEngine for Box<E> {
    fn begin_handshake(&mut self) -> Result<(), EngineError> {
        (**self).begin_handshake()
    }

    fn handshake_status(&self) -> HandshakeStatus {
        (**self).handshake_status()
    }

    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        (**self).wrap(src, dst)
    }

    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        (**self).unwrap(src, dst)
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask<'_>> {
        (**self).delegated_task()
    }

    fn close_outbound(&mut self) {
        (**self).close_outbound()
    }

    fn is_outbound_done(&self) -> bool {
        (**self).is_outbound_done()
    }

    fn is_inbound_done(&self) -> bool {
        (**self).is_inbound_done()
    }

    fn invalidate_session(&mut self) {
        (**self).invalidate_session()
    }

    fn application_buffer_size(&self) -> usize {
        (**self).application_buffer_size()
    }

    fn packet_buffer_size(&self) -> usize {
        (**self).packet_buffer_size()
    }
}
