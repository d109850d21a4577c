mod certificate;
mod context;
mod engine;
mod memory_bio;
#[cfg(test)]
mod test;

pub use certificate::{load_trusted, load_trusted_file, Certificate, Identity, PrivateKey};
pub use context::TlsContextFactory;
pub use engine::OpensslEngine;
pub use openssl::ssl::SslVerifyMode;

pub type DefaultTlsChannel = crate::channel::TlsChannel<crate::net::TcpChannel, OpensslEngine>;
