//! Cryptographic primitives for peerkv.
//!
//! Provides three things:
//!   1. The server's signing key, used to sign every stored value
//!   2. The client trust root: the server certificate, used to verify
//!      values relayed by unauthenticated peers
//!   3. Self-signed key material generation
//!
//! Signatures are RSA PKCS#1 v1.5 over SHA-256, computed and checked through
//! OpenSSL. Key material is PEM on disk: an X.509 certificate and a private
//! key. There is exactly one trust root; peers carry no keys of their own.

use std::path::{Path, PathBuf};

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::Rsa;
use openssl::sign::{Signer, Verifier};
use openssl::x509::extension::{BasicConstraints, SubjectKeyIdentifier};
use openssl::x509::{X509NameBuilder, X509};
use thiserror::Error;

/// Digest used for value signatures. Fixed; both sides must agree.
fn digest() -> MessageDigest {
    MessageDigest::sha256()
}

// ── Signing ───────────────────────────────────────────────────────────────────

/// The server's private key. Never leaves the server process.
#[derive(Clone)]
pub struct SigningKey {
    key: PKey<Private>,
}

impl SigningKey {
    pub fn from_pem(pem: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            key: PKey::private_key_from_pem(pem)?,
        })
    }

    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        let pem = std::fs::read(path).map_err(|e| CryptoError::ReadFailed(path.into(), e))?;
        Self::from_pem(&pem)
    }

    /// Sign raw value bytes.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut signer = Signer::new(digest(), &self.key)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }

    pub fn pkey(&self) -> &PKey<Private> {
        &self.key
    }
}

// ── Verification ──────────────────────────────────────────────────────────────

/// The single certificate clients trust.
///
/// Pinned for the TLS channel to the server and used as the verification key
/// for every value a peer hands us.
#[derive(Clone)]
pub struct TrustRoot {
    cert: X509,
    public_key: PKey<Public>,
}

impl TrustRoot {
    pub fn from_certificate(cert: X509) -> Result<Self, CryptoError> {
        let public_key = cert.public_key()?;
        Ok(Self { cert, public_key })
    }

    pub fn from_pem(pem: &[u8]) -> Result<Self, CryptoError> {
        Self::from_certificate(X509::from_pem(pem)?)
    }

    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        let pem = std::fs::read(path).map_err(|e| CryptoError::ReadFailed(path.into(), e))?;
        Self::from_pem(&pem)
    }

    pub fn certificate(&self) -> &X509 {
        &self.cert
    }

    /// SHA-256 fingerprint of the certificate, hex encoded. For logs.
    pub fn fingerprint(&self) -> String {
        self.cert
            .digest(MessageDigest::sha256())
            .map(|d| hex::encode(&*d))
            .unwrap_or_default()
    }

    /// Check a value signature. See [`verify`].
    pub fn verify(&self, signature: &[u8], data: &[u8]) -> bool {
        verify(self, signature, data)
    }
}

/// Verify that `signature` is the trust root's signature over `data`.
///
/// Fails closed: a malformed signature, a mismatch, or any OpenSSL error
/// all produce `false`.
pub fn verify(root: &TrustRoot, signature: &[u8], data: &[u8]) -> bool {
    if signature.is_empty() {
        return false;
    }
    let check = || -> Result<bool, ErrorStack> {
        let mut verifier = Verifier::new(digest(), &root.public_key)?;
        verifier.update(data)?;
        verifier.verify(signature)
    };
    check().unwrap_or(false)
}

// ── Key material ──────────────────────────────────────────────────────────────

/// Certificate and private key held by the server.
#[derive(Clone)]
pub struct KeyMaterial {
    pub certificate: X509,
    pub signing_key: SigningKey,
}

impl KeyMaterial {
    /// Load a PEM certificate and PEM private key, checking that they match.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, CryptoError> {
        let cert_pem =
            std::fs::read(cert_path).map_err(|e| CryptoError::ReadFailed(cert_path.into(), e))?;
        let key_pem =
            std::fs::read(key_path).map_err(|e| CryptoError::ReadFailed(key_path.into(), e))?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, CryptoError> {
        let certificate = X509::from_pem(cert_pem)?;
        let signing_key = SigningKey::from_pem(key_pem)?;
        if !certificate.public_key()?.public_eq(signing_key.pkey()) {
            return Err(CryptoError::KeyMismatch);
        }
        Ok(Self {
            certificate,
            signing_key,
        })
    }

    /// Generate a fresh self-signed RSA certificate valid for `days`.
    pub fn generate(common_name: &str, bits: u32, days: u32) -> Result<Self, CryptoError> {
        let key = PKey::from_rsa(Rsa::generate(bits)?)?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_text("CN", common_name)?;
        let name = name.build();

        let serial = {
            let mut bn = BigNum::new()?;
            bn.rand(127, MsbOption::MAYBE_ZERO, false)?;
            bn.to_asn1_integer()?
        };

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_pubkey(&key)?;
        builder.set_not_before(&*Asn1Time::days_from_now(0)?)?;
        builder.set_not_after(&*Asn1Time::days_from_now(days)?)?;
        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
        builder.append_extension(ski)?;
        builder.sign(&key, digest())?;

        Ok(Self {
            certificate: builder.build(),
            signing_key: SigningKey { key },
        })
    }

    /// PEM encodings of (certificate, PKCS#8 private key).
    pub fn to_pem(&self) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        Ok((
            self.certificate.to_pem()?,
            self.signing_key.key.private_key_to_pem_pkcs8()?,
        ))
    }

    /// The trust root clients should be configured with.
    pub fn trust_root(&self) -> Result<TrustRoot, CryptoError> {
        TrustRoot::from_certificate(self.certificate.clone())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),

    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),

    #[error("private key does not match certificate")]
    KeyMismatch,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
