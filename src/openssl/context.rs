use std::fmt;
use std::net::IpAddr;

use anyhow::{anyhow, Context};
use openssl::ssl;
use tracing::debug;

use crate::channel::TlsChannel;
use crate::config::{ChannelOptions, Protocol, Role, TlsConfig};
use crate::error::{Error, Result};
use crate::net::RawChannel;

use super::certificate::{load_trusted_file, Certificate, Identity};
use super::engine::OpensslEngine;

/// TLS 1.3 suites are configured separately from the older cipher list
fn is_tls13_suite(name: &str) -> bool {
    name.starts_with("TLS_AES_") || name.starts_with("TLS_CHACHA20_")
}

fn version_bounds(protocol: Protocol) -> Option<ssl::SslVersion> {
    match protocol {
        Protocol::Default => None,
        Protocol::Tls1 => Some(ssl::SslVersion::TLS1),
        Protocol::Tls1_1 => Some(ssl::SslVersion::TLS1_1),
        Protocol::Tls1_2 => Some(ssl::SslVersion::TLS1_2),
        Protocol::Tls1_3 => Some(ssl::SslVersion::TLS1_3),
    }
}

struct TlsContextBuilder {
    inner: ssl::SslContextBuilder,
}

impl TlsContextBuilder {
    fn new() -> anyhow::Result<Self> {
        let mut inner = ssl::SslContext::builder(ssl::SslMethod::tls())?;
        // sessions are never resumed
        inner.set_session_cache_mode(ssl::SslSessionCacheMode::OFF);
        inner.set_options(ssl::SslOptions::NO_TICKET);
        inner.set_num_tickets(0)?;
        Ok(Self { inner })
    }

    fn with_protocol(mut self, protocol: Protocol) -> anyhow::Result<Self> {
        let version = version_bounds(protocol);
        self.inner.set_min_proto_version(version)?;
        self.inner.set_max_proto_version(version)?;
        Ok(self)
    }

    fn with_identity(mut self, identity: Identity) -> anyhow::Result<Self> {
        self.inner.set_certificate(identity.certificate.inner())?;
        self.inner.set_private_key(&identity.key.0)?;
        for cert in identity.chain {
            self.inner.add_extra_chain_cert(cert.0)?;
        }
        self.inner
            .check_private_key()
            .context("private key does not match the certificate")?;
        Ok(self)
    }

    fn with_trusted(mut self, certs: Vec<Certificate>) -> anyhow::Result<Self> {
        if certs.is_empty() {
            return Err(anyhow!("trust store contains no certificates"));
        }
        for cert in certs {
            self.inner.cert_store_mut().add_cert(cert.0)?;
        }
        Ok(self)
    }

    fn with_cipher_suites(mut self, suites: &[String]) -> anyhow::Result<Self> {
        let (tls13, legacy): (Vec<&str>, Vec<&str>) = suites
            .iter()
            .map(String::as_str)
            .partition(|name| is_tls13_suite(name));

        if !tls13.is_empty() {
            self.inner
                .set_ciphersuites(&tls13.join(":"))
                .with_context(|| format!("rejected TLS 1.3 suites {tls13:?}"))?;
        }
        if !legacy.is_empty() {
            self.inner
                .set_cipher_list(&legacy.join(":"))
                .with_context(|| format!("rejected cipher list {legacy:?}"))?;
        }
        Ok(self)
    }

    fn build(self) -> ssl::SslContext {
        self.inner.build()
    }
}

/// Reusable TLS configuration that hands out per-connection engines and
/// wraps raw channels.
///
/// Built once at startup; cloning shares the underlying context.
#[derive(Clone)]
pub struct TlsContextFactory {
    context: ssl::SslContext,
    role: Role,
    verify_hostname: bool,
    require_client_auth: bool,
    options: ChannelOptions,
}

impl fmt::Debug for TlsContextFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContextFactory")
            .field("role", &self.role)
            .field("verify_hostname", &self.verify_hostname)
            .field("require_client_auth", &self.require_client_auth)
            .finish()
    }
}

impl TlsContextFactory {
    /// Load the key and trust stores and set up the context.
    ///
    /// Every failure is reported as [`Error::ContextInit`].
    pub fn build_context(config: &TlsConfig) -> Result<Self> {
        openssl::init();

        let protocol = config
            .protocol
            .parse::<Protocol>()
            .map_err(|message| Error::ContextInit {
                message,
                source: None,
            })?;

        let key_path = config.key_store.path();
        let identity = Identity::from_pkcs12_file(key_path, &config.key_store.password)
            .map_err(|err| {
                Error::context_init(format!("failed to load key store {}", key_path.display()), err)
            })?;

        let trust_path = config.trust_store.path();
        let trusted = load_trusted_file(trust_path, &config.trust_store.password).map_err(|err| {
            Error::context_init(
                format!("failed to load trust store {}", trust_path.display()),
                err,
            )
        })?;

        let mut builder = TlsContextBuilder::new()
            .and_then(|builder| builder.with_protocol(protocol))
            .and_then(|builder| builder.with_identity(identity))
            .and_then(|builder| builder.with_trusted(trusted))
            .map_err(|err| Error::context_init("failed to initialize tls context", err))?;

        if let Some(suites) = &config.enabled_cipher_suites {
            builder = builder
                .with_cipher_suites(suites)
                .map_err(|err| Error::context_init("failed to apply cipher suites", err))?;
        }

        debug!(
            protocol = %config.protocol,
            role = ?config.role,
            verify_hostname = config.verify_hostname,
            require_client_auth = config.require_client_auth,
            "tls context ready"
        );

        Ok(Self {
            context: builder.build(),
            role: config.role,
            verify_hostname: config.verify_hostname,
            require_client_auth: config.require_client_auth,
            options: config.channel.clone(),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn context(&self) -> &ssl::SslContextRef {
        &self.context
    }

    pub fn channel_options(&self) -> &ChannelOptions {
        &self.options
    }

    /// Engine for one connection.
    ///
    /// A client engine always verifies the server certificate; `peer_host`
    /// is sent as SNI and, unless disabled, checked against the certificate.
    pub fn create_engine(&self, role: Role, peer_host: Option<&str>) -> Result<OpensslEngine> {
        let mut ssl = ssl::Ssl::new(&self.context).map_err(Error::handshake)?;

        match role {
            Role::Client => {
                ssl.set_verify(ssl::SslVerifyMode::PEER);
                match peer_host {
                    Some(host) => {
                        let ip = host.parse::<IpAddr>().ok();
                        if ip.is_none() {
                            ssl.set_hostname(host).map_err(Error::handshake)?;
                        }
                        if self.verify_hostname {
                            let param = ssl.param_mut();
                            let checked = match ip {
                                Some(ip) => param.set_ip(ip),
                                None => param.set_host(host),
                            };
                            checked.map_err(Error::handshake)?;
                        }
                    }
                    None if self.verify_hostname => {
                        return Err(Error::handshake(
                            "hostname verification needs the peer host",
                        ));
                    }
                    None => {}
                }
            }
            Role::Server => {
                let mode = if self.require_client_auth {
                    ssl::SslVerifyMode::PEER | ssl::SslVerifyMode::FAIL_IF_NO_PEER_CERT
                } else {
                    ssl::SslVerifyMode::NONE
                };
                ssl.set_verify(mode);
            }
        }

        OpensslEngine::new(ssl, role).map_err(Error::handshake)
    }

    /// Connect-side wrap: handshake as client against `host`.
    pub fn wrap_client_channel<C: RawChannel>(
        &self,
        channel: C,
        host: &str,
        port: u16,
    ) -> Result<TlsChannel<C, OpensslEngine>> {
        debug!(host, port, "wrapping client channel");
        let engine = self.create_engine(Role::Client, Some(host))?;
        TlsChannel::with_options(channel, engine, &self.options)
    }

    /// Accept-side wrap: handshake as server.
    pub fn wrap_server_channel<C: RawChannel>(
        &self,
        channel: C,
    ) -> Result<TlsChannel<C, OpensslEngine>> {
        debug!("wrapping server channel");
        let engine = self.create_engine(Role::Server, None)?;
        TlsChannel::with_options(channel, engine, &self.options)
    }

    /// Wrap in the configured role; `peer` is only used by clients.
    pub fn wrap_channel<C: RawChannel>(
        &self,
        channel: C,
        peer: Option<(&str, u16)>,
    ) -> Result<TlsChannel<C, OpensslEngine>> {
        match (self.role, peer) {
            (Role::Client, Some((host, port))) => self.wrap_client_channel(channel, host, port),
            (Role::Client, None) => {
                let engine = self.create_engine(Role::Client, None)?;
                TlsChannel::with_options(channel, engine, &self.options)
            }
            (Role::Server, _) => self.wrap_server_channel(channel),
        }
    }
}

#[cfg(test)]
mod test {

    use super::is_tls13_suite;

    #[test]
    fn test_suite_partition() {
        assert!(is_tls13_suite("TLS_AES_128_GCM_SHA256"));
        assert!(is_tls13_suite("TLS_CHACHA20_POLY1305_SHA256"));
        assert!(!is_tls13_suite("ECDHE-RSA-AES128-GCM-SHA256"));
        assert!(!is_tls13_suite("ECDHE-ECDSA-AES256-GCM-SHA384"));
    }
}
