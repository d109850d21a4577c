//! Test support: throwaway certificates, key/trust stores and helpers to
//! drive channels to completion.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::PKey;
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
use openssl::x509::{X509NameBuilder, X509};
use tracing::debug;

use crate::channel::{ReadOutcome, TlsChannel};
use crate::config::{ChannelOptions, Role, StoreConfig, TlsConfig};
use crate::engine::TlsEngine;
use crate::net::{duplex, MemoryChannel, RawChannel};
use crate::openssl::{Certificate, OpensslEngine, PrivateKey, TlsContextFactory};

pub const TEST_HOST: &str = "localhost";
pub const STORE_PASSWORD: &str = "changeit";

const POLL_INTERVAL: Duration = Duration::from_millis(1);

pub type MemoryTlsChannel = TlsChannel<MemoryChannel, OpensslEngine>;

/// EC P-256 certificate signed by its own key, valid for `common_name` and
/// 127.0.0.1.
pub fn self_signed(common_name: &str) -> Result<(Certificate, PrivateKey)> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    let key = PKey::from_ec_key(EcKey::generate(&group)?)?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
    let name = name.build();

    let mut serial = BigNum::new()?;
    serial.rand(64, MsbOption::MAYBE_ZERO, false)?;

    let serial = serial.to_asn1_integer()?;
    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(30)?;

    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(&key)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;
    builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    let san = SubjectAlternativeName::new()
        .dns(common_name)
        .ip("127.0.0.1")
        .build(&builder.x509v3_context(None, None))?;
    builder.append_extension(san)?;
    builder.sign(&key, MessageDigest::sha256())?;

    Ok((Certificate(builder.build()), PrivateKey(key)))
}

fn unique_dir() -> Result<PathBuf> {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let dir = std::env::temp_dir().join(format!(
        "fluvio-tls-channel-{}-{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::SeqCst)
    ));
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Key store (PKCS#12) and trust store (PEM) for one self-signed identity,
/// removed from disk on drop.
pub struct TestStores {
    dir: PathBuf,
    pub certificate: Certificate,
    pub key_store: StoreConfig,
    pub trust_store: StoreConfig,
}

impl TestStores {
    pub fn generate(common_name: &str) -> Result<Self> {
        let (certificate, key) = self_signed(common_name)?;
        let dir = unique_dir()?;

        let key_path = dir.join("keystore.p12");
        let archive = Pkcs12::builder()
            .name(common_name)
            .pkey(&key.0)
            .cert(certificate.inner())
            .build2(STORE_PASSWORD)?;
        fs::write(&key_path, archive.to_der()?)?;

        let trust_path = dir.join("truststore.pem");
        fs::write(&trust_path, certificate.to_pem()?)?;

        debug!(dir = %dir.display(), "generated test stores");
        Ok(Self {
            dir,
            certificate,
            key_store: StoreConfig::new(key_path, STORE_PASSWORD),
            trust_store: StoreConfig::new(trust_path, ""),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self, role: Role) -> TlsConfig {
        TlsConfig::new(self.key_store.clone(), self.trust_store.clone()).with_role(role)
    }
}

impl Drop for TestStores {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

/// stores shared by every test of the process
pub fn shared_stores() -> &'static TestStores {
    static STORES: OnceLock<TestStores> = OnceLock::new();
    STORES.get_or_init(|| TestStores::generate(TEST_HOST).expect("generate test stores"))
}

pub fn test_config(role: Role) -> TlsConfig {
    shared_stores().config(role)
}

/// Handshake a client and a server over an in-memory pipe.
///
/// The server handshakes on its own thread; both sides use `options`.
pub fn connected_pair(
    options: ChannelOptions,
) -> crate::Result<(MemoryTlsChannel, MemoryTlsChannel)> {
    let server_factory = TlsContextFactory::build_context(
        &test_config(Role::Server).with_channel_options(options.clone()),
    )?;
    let client_factory =
        TlsContextFactory::build_context(&test_config(Role::Client).with_channel_options(options))?;

    let (client_end, server_end) = duplex();
    let server = thread::spawn(move || server_factory.wrap_server_channel(server_end));
    let client = client_factory.wrap_client_channel(client_end, TEST_HOST, 0);
    let server = server
        .join()
        .map_err(|_| crate::Error::handshake("server handshake thread panicked"))?;

    Ok((client?, server?))
}

fn timed_out(what: &str) -> crate::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{what} timed out")).into()
}

/// Write all of `bytes`, retrying while the raw channel would block, then
/// flush.
pub fn write_all<C, E>(channel: &TlsChannel<C, E>, bytes: &[u8], timeout: Duration) -> crate::Result<()>
where
    C: RawChannel,
    E: TlsEngine,
{
    let deadline = Instant::now() + timeout;
    let mut remaining = bytes;
    while !remaining.is_empty() {
        let n = channel.write(remaining)?;
        remaining = &remaining[n..];
        if n == 0 {
            if Instant::now() >= deadline {
                return Err(timed_out("write"));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
    while !channel.flush()? {
        if Instant::now() >= deadline {
            return Err(timed_out("flush"));
        }
        thread::sleep(POLL_INTERVAL);
    }
    Ok(())
}

/// Read exactly `len` bytes; end of stream before that is an error.
pub fn read_exact<C, E>(channel: &TlsChannel<C, E>, len: usize, timeout: Duration) -> crate::Result<Vec<u8>>
where
    C: RawChannel,
    E: TlsEngine,
{
    let deadline = Instant::now() + timeout;
    let mut received = Vec::with_capacity(len);
    let mut buf = vec![0u8; 8192];
    while received.len() < len {
        let want = (len - received.len()).min(buf.len());
        match channel.read(&mut buf[..want])? {
            ReadOutcome::Data(n) => received.extend_from_slice(&buf[..n]),
            ReadOutcome::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(timed_out("read"));
                }
                thread::sleep(POLL_INTERVAL);
            }
            ReadOutcome::EndOfStream => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("end of stream after {} of {len} bytes", received.len()),
                )
                .into())
            }
        }
    }
    Ok(received)
}

/// Read until end of stream.
pub fn read_to_end<C, E>(channel: &TlsChannel<C, E>, timeout: Duration) -> crate::Result<Vec<u8>>
where
    C: RawChannel,
    E: TlsEngine,
{
    let deadline = Instant::now() + timeout;
    let mut received = Vec::new();
    let mut buf = vec![0u8; 8192];
    loop {
        match channel.read(&mut buf)? {
            ReadOutcome::Data(n) => received.extend_from_slice(&buf[..n]),
            ReadOutcome::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(timed_out("read to end"));
                }
                thread::sleep(POLL_INTERVAL);
            }
            ReadOutcome::EndOfStream => return Ok(received),
        }
    }
}
