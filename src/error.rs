use std::fmt::Debug;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("ContextInitError: {message}")]
    ContextInit {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("HandshakeError: {0}")]
    Handshake(BoxError),

    #[error("HandshakeTimeoutError: handshake not finished after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("UnwrapError: {0}")]
    Unwrap(#[source] EngineError),

    #[error("WrapError: {0}")]
    Wrap(#[source] EngineError),

    #[error("ChannelClosedError: cannot perform write, the channel is closed (or being closed)")]
    ChannelClosed,

    #[error("IoError: {0}")]
    IoError(#[from] io::Error),
}

impl Error {
    pub(crate) fn context_init<E>(message: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::ContextInit {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub(crate) fn handshake<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Handshake(err.into())
    }

    pub fn into_io_error(self) -> io::Error {
        match self {
            Self::IoError(err) => err,
            other => io::Error::other(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
