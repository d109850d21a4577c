use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;

const PEM_MARKER: &[u8] = b"-----BEGIN";

#[derive(Debug, Clone)]
pub struct Certificate(pub X509);

impl Certificate {
    pub fn from_pem(bytes: &[u8]) -> Result<Self> {
        Ok(Self(X509::from_pem(bytes)?))
    }
    pub fn from_der(bytes: &[u8]) -> Result<Self> {
        Ok(Self(X509::from_der(bytes)?))
    }
    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.0.to_der()?)
    }
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.0.to_pem()?)
    }

    pub fn inner(&self) -> &X509 {
        &self.0
    }
}

pub struct PrivateKey(pub PKey<Private>);

/// Local certificate, its key and the chain sent along with it.
pub struct Identity {
    pub certificate: Certificate,
    pub key: PrivateKey,
    pub chain: Vec<Certificate>,
}

impl Identity {
    /// Parse a PKCS#12 archive holding exactly one key entry.
    pub fn from_pkcs12(der: &[u8], password: &str) -> Result<Self> {
        let parsed = Pkcs12::from_der(der)?
            .parse2(password)
            .context("failed to decrypt PKCS#12 archive")?;

        let key = parsed
            .pkey
            .ok_or_else(|| anyhow!("key store has no private key"))?;
        let certificate = parsed
            .cert
            .ok_or_else(|| anyhow!("key store has no certificate"))?;
        let chain = parsed
            .ca
            .map(|stack| stack.into_iter().map(Certificate).collect())
            .unwrap_or_default();

        Ok(Self {
            certificate: Certificate(certificate),
            key: PrivateKey(key),
            chain,
        })
    }

    pub fn from_pkcs12_file(path: impl AsRef<Path>, password: &str) -> Result<Self> {
        let path = path.as_ref();
        let der = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_pkcs12(&der, password)
    }
}

/// Trusted certificates from a PEM bundle or a PKCS#12 archive.
///
/// The format is sniffed from the content; `password` only matters for
/// PKCS#12.
pub fn load_trusted(bytes: &[u8], password: &str) -> Result<Vec<Certificate>> {
    if bytes.windows(PEM_MARKER.len()).any(|window| window == PEM_MARKER) {
        let stack = X509::stack_from_pem(bytes)?;
        return Ok(stack.into_iter().map(Certificate).collect());
    }

    let parsed = Pkcs12::from_der(bytes)?
        .parse2(password)
        .context("failed to decrypt PKCS#12 archive")?;
    let mut certs: Vec<Certificate> = parsed.cert.into_iter().map(Certificate).collect();
    if let Some(ca) = parsed.ca {
        certs.extend(ca.into_iter().map(Certificate));
    }
    Ok(certs)
}

pub fn load_trusted_file(path: impl AsRef<Path>, password: &str) -> Result<Vec<Certificate>> {
    let path = path.as_ref();
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    load_trusted(&bytes, password)
}
