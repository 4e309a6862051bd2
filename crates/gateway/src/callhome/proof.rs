//! Proof that a calling device holds the private key behind the credential
//! it presents.
//!
//! The gateway opens every call-home socket with a random nonce. The
//! device signs [`challenge_payload`] with the Ed25519 key of its SSH host
//! key or TLS certificate and returns the signature in `device_hello`.
//! Credentials are public, so a hello without a valid signature proves
//! nothing and is refused.

use base64::Engine as _;
use ed25519_dalek::{Signature, VerifyingKey};
use nc_domain::{PeerCredential, TransportProtocol};

const SSH_ED25519: &str = "ssh-ed25519";
const ED25519_OID: &str = "1.3.101.112";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProofError {
    #[error("unsupported key type: {0}")]
    UnsupportedKey(String),
    #[error("credential material is not a valid key or certificate")]
    MalformedCredential,
    #[error("signature is not valid base64 Ed25519")]
    MalformedSignature,
    #[error("signature does not match the credential")]
    BadSignature,
}

/// A fresh nonce for one call-home attempt.
pub fn new_nonce() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

/// The bytes a device signs. Binding the protocol keeps a signature made
/// for one endpoint from being replayed on the other.
pub fn challenge_payload(protocol: TransportProtocol, nonce: &str) -> String {
    format!("nc-callhome|{protocol}|{nonce}")
}

pub fn verify_possession(
    credential: &PeerCredential,
    payload: &str,
    signature: &str,
) -> Result<(), ProofError> {
    let key = match credential {
        PeerCredential::SshHostKey(material) => ssh_ed25519_key(material)?,
        PeerCredential::TlsCertificate(material) => certificate_key(material)?,
    };
    let raw = base64::engine::general_purpose::STANDARD
        .decode(signature.trim())
        .map_err(|_| ProofError::MalformedSignature)?;
    let bytes = <[u8; 64]>::try_from(raw.as_slice()).map_err(|_| ProofError::MalformedSignature)?;
    key.verify_strict(payload.as_bytes(), &Signature::from_bytes(&bytes))
        .map_err(|_| ProofError::BadSignature)
}

/// Key from an authorized-keys line: `ssh-ed25519 <base64 blob> [comment]`.
/// The blob is two length-prefixed strings: the key type and the raw key.
fn ssh_ed25519_key(material: &str) -> Result<VerifyingKey, ProofError> {
    let mut fields = material.split_whitespace();
    let kind = fields.next().ok_or(ProofError::MalformedCredential)?;
    if kind != SSH_ED25519 {
        return Err(ProofError::UnsupportedKey(kind.to_owned()));
    }
    let blob = fields
        .next()
        .and_then(|b| base64::engine::general_purpose::STANDARD.decode(b).ok())
        .ok_or(ProofError::MalformedCredential)?;

    let mut rest = blob.as_slice();
    let blob_kind = ssh_string(&mut rest)?;
    if blob_kind != SSH_ED25519.as_bytes() {
        return Err(ProofError::MalformedCredential);
    }
    let key = ssh_string(&mut rest)?;
    if !rest.is_empty() {
        return Err(ProofError::MalformedCredential);
    }
    verifying_key(key)
}

fn ssh_string<'a>(rest: &mut &'a [u8]) -> Result<&'a [u8], ProofError> {
    if rest.len() < 4 {
        return Err(ProofError::MalformedCredential);
    }
    let (len, tail) = rest.split_at(4);
    let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
    if tail.len() < len {
        return Err(ProofError::MalformedCredential);
    }
    let (value, tail) = tail.split_at(len);
    *rest = tail;
    Ok(value)
}

/// Key from a PEM or base64 DER certificate. Only Ed25519 keys can sign
/// the challenge here.
fn certificate_key(material: &str) -> Result<VerifyingKey, ProofError> {
    let material = material.trim();
    let der = if material.starts_with("-----BEGIN") {
        let (_, pem) = x509_parser::pem::parse_x509_pem(material.as_bytes())
            .map_err(|_| ProofError::MalformedCredential)?;
        pem.contents
    } else {
        base64::engine::general_purpose::STANDARD
            .decode(material)
            .map_err(|_| ProofError::MalformedCredential)?
    };
    let (_, cert) =
        x509_parser::parse_x509_certificate(&der).map_err(|_| ProofError::MalformedCredential)?;
    let spki = cert.public_key();
    let algorithm = spki.algorithm.algorithm.to_id_string();
    if algorithm != ED25519_OID {
        return Err(ProofError::UnsupportedKey(algorithm));
    }
    verifying_key(&spki.subject_public_key.data)
}

fn verifying_key(raw: &[u8]) -> Result<VerifyingKey, ProofError> {
    let bytes = <[u8; 32]>::try_from(raw).map_err(|_| ProofError::MalformedCredential)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| ProofError::MalformedCredential)
}
