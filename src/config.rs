use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PROTOCOL: &str = "TLS";
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 5_000;

/// Which side of the handshake the local engine plays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// initiates the connection and verifies the server
    Client,
    /// accepts the connection
    #[default]
    Server,
}

/// Protocol version selection, parsed from the configured protocol name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// whatever range the TLS provider enables by default
    Default,
    Tls1,
    Tls1_1,
    Tls1_2,
    Tls1_3,
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "tls" | "default" => Ok(Self::Default),
            "tlsv1" | "tlsv1.0" => Ok(Self::Tls1),
            "tlsv1.1" => Ok(Self::Tls1_1),
            "tlsv1.2" => Ok(Self::Tls1_2),
            "tlsv1.3" => Ok(Self::Tls1_3),
            _ => Err(format!("no provider available for protocol {name:?}")),
        }
    }
}

/// Location and password of a key or trust store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub password: String,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>, password: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            password: password.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("path", &self.path)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Per-channel tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOptions {
    /// abort the handshake after this long; unbounded when absent
    #[serde(default)]
    pub handshake_timeout_ms: Option<u64>,
    /// give up flushing close_notify after this long
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    /// initial plaintext buffer capacity, instead of the engine's
    #[serde(default)]
    pub app_buffer_size: Option<usize>,
    /// initial ciphertext buffer capacity, instead of the engine's
    #[serde(default)]
    pub packet_buffer_size: Option<usize>,
}

fn default_close_timeout_ms() -> u64 {
    DEFAULT_CLOSE_TIMEOUT_MS
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: None,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
            app_buffer_size: None,
            packet_buffer_size: None,
        }
    }
}

impl ChannelOptions {
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// start with buffers of the given capacity; they still grow on demand
    pub fn with_initial_buffer_sizes(mut self, app: usize, packet: usize) -> Self {
        self.app_buffer_size = Some(app.max(1));
        self.packet_buffer_size = Some(packet.max(1));
        self
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// Everything needed to build a [`crate::TlsContextFactory`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// protocol name such as `TLS`, `TLSv1.2` or `TLSv1.3`
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// PKCS#12 archive with the local certificate and private key
    pub key_store: StoreConfig,
    /// PEM bundle or PKCS#12 archive of trusted certificates
    pub trust_store: StoreConfig,
    /// restrict negotiation to these suites, engine defaults when absent
    #[serde(default)]
    pub enabled_cipher_suites: Option<Vec<String>>,
    #[serde(default)]
    pub role: Role,
    /// server side: ask for and require a client certificate
    #[serde(default)]
    pub require_client_auth: bool,
    /// client side: check the server certificate against the peer host
    #[serde(default = "default_true")]
    pub verify_hostname: bool,
    #[serde(default)]
    pub channel: ChannelOptions,
}

fn default_protocol() -> String {
    DEFAULT_PROTOCOL.to_owned()
}

fn default_true() -> bool {
    true
}

impl TlsConfig {
    pub fn new(key_store: StoreConfig, trust_store: StoreConfig) -> Self {
        Self {
            protocol: default_protocol(),
            key_store,
            trust_store,
            enabled_cipher_suites: None,
            role: Role::default(),
            require_client_auth: false,
            verify_hostname: true,
            channel: ChannelOptions::default(),
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_cipher_suites<I, S>(mut self, suites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_cipher_suites = Some(suites.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_client_auth_required(mut self) -> Self {
        self.require_client_auth = true;
        self
    }

    pub fn with_hostname_verification_disabled(mut self) -> Self {
        self.verify_hostname = false;
        self
    }

    pub fn with_channel_options(mut self, options: ChannelOptions) -> Self {
        self.channel = options;
        self
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn test_protocol_names() {
        assert_eq!("TLS".parse::<Protocol>(), Ok(Protocol::Default));
        assert_eq!("TLSv1.2".parse::<Protocol>(), Ok(Protocol::Tls1_2));
        assert_eq!("tlsv1.3".parse::<Protocol>(), Ok(Protocol::Tls1_3));
        assert!("SSLv3".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: TlsConfig = serde_json::from_str(
            r#"{
                "key_store": { "path": "/etc/tls/keystore.p12", "password": "secret" },
                "trust_store": { "path": "/etc/tls/ca.pem" },
                "role": "client",
                "channel": { "handshake_timeout_ms": 2500 }
            }"#,
        )
        .expect("parse");

        assert_eq!(config.protocol, DEFAULT_PROTOCOL);
        assert_eq!(config.role, Role::Client);
        assert!(config.verify_hostname);
        assert!(!config.require_client_auth);
        assert_eq!(config.enabled_cipher_suites, None);
        assert_eq!(config.trust_store.password, "");
        assert_eq!(
            config.channel.handshake_timeout(),
            Some(Duration::from_millis(2500))
        );
        assert_eq!(
            config.channel.close_timeout(),
            Duration::from_millis(DEFAULT_CLOSE_TIMEOUT_MS)
        );
    }

    #[test]
    fn test_password_is_redacted() {
        let store = StoreConfig::new("/tmp/keystore.p12", "hunter2");
        let debug = format!("{store:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("keystore.p12"));
    }
}
