//! Non-blocking TLS on top of a raw byte channel.
//!
//! A [`TlsChannel`] runs the handshake when it is created and then reads and
//! writes plaintext with the same would-block contract as the channel it
//! wraps. Engines come from a [`TlsContextFactory`] built once from a
//! [`TlsConfig`].

pub mod backoff;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod engine;
mod error;
pub mod net;

#[cfg(feature = "openssl_tls")]
#[cfg(not(target_arch = "wasm32"))]
pub mod openssl;

#[cfg(all(any(test, feature = "fixture"), feature = "openssl_tls"))]
pub mod fixture;

pub use channel::{ChannelState, ReadOutcome, TlsChannel};
pub use config::{ChannelOptions, Protocol, Role, StoreConfig, TlsConfig};
pub use engine::{EngineError, EngineResult, EngineStatus, HandshakeStatus, TlsEngine};
pub use error::{BoxError, Error, Result};
pub use net::RawChannel;

#[cfg(feature = "openssl_tls")]
#[cfg(not(target_arch = "wasm32"))]
pub use crate::openssl::{OpensslEngine, TlsContextFactory};

#[cfg(feature = "subscriber")]
pub mod subscriber {
    use tracing_subscriber::EnvFilter;

    pub fn init_logger() {
        init_tracer(None);
    }

    pub fn init_tracer(level: Option<tracing::Level>) {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level.unwrap_or(tracing::Level::DEBUG))
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .try_init();
    }
}

pub use tracing;
