//! Execution certificate signing and verification.
//!
//! The ledger signs every accepted trace with a process-wide
//! ECDSA-secp256k1 key. The signed payload is SHA-256 over RFC 8785
//! canonical JSON, so any third party holding the public key (served at
//! the discovery endpoint) can verify a certificate offline.

use chrono::Utc;
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::constants::{CERTIFICATE_ALG, CERTIFICATE_CONTEXT, CERTIFICATE_TYPE};
use crate::error::{CoreError, Result};
use crate::hashing::{canonical_json, sha256};
use crate::types::TraceStatus;

/// The payload a certificate commits to.
///
/// This is the wire-level output contract: given the same payload, key,
/// and signature, serialisation must be bit-reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificatePayload {
    /// Server-assigned trace id.
    pub trace_id: String,
    /// Owning agent.
    pub agent_id: String,
    /// Trace outcome.
    pub status: TraceStatus,
    /// Composite trust score after the update.
    pub trust_score_after: f64,
    /// SHA-256 hex of the canonical client payload.
    pub trace_hash: String,
    /// Unix seconds when the ledger accepted the trace.
    pub created: i64,
}

/// Cryptographic proof attached to a certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proof {
    /// Signature scheme identifier.
    #[serde(rename = "type")]
    pub proof_type: String,
    /// Unix seconds when the proof was produced.
    pub created: i64,
    /// SEC1 uncompressed public key, hex.
    #[serde(rename = "publicKey")]
    pub public_key: String,
    /// DER-encoded ECDSA signature, hex.
    pub signature: String,
    /// Algorithm name, always `ECDSA-secp256k1`.
    pub alg: String,
}

/// A signed execution certificate: `{payload, proof}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    /// JSON-LD context.
    #[serde(rename = "@context")]
    pub context: String,
    /// JSON-LD type, always `CertifiedExecutionTrace`.
    #[serde(rename = "@type")]
    pub certificate_type: String,
    /// The signed payload.
    pub payload: CertificatePayload,
    /// The signature over the payload.
    pub proof: Proof,
}

/// Process-wide trace signer. Read-only after construction.
#[derive(Clone)]
pub struct Signer {
    signing_key: SigningKey,
    public_key_hex: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never leak the private key through Debug output.
        f.debug_struct("Signer")
            .field("public_key_hex", &self.public_key_hex)
            .finish_non_exhaustive()
    }
}

impl Signer {
    /// Load a signer from a 32-byte hex-encoded secp256k1 scalar.
    pub fn from_hex(private_key_hex: &str) -> Result<Self> {
        let trimmed = private_key_hex
            .strip_prefix("0x")
            .unwrap_or(private_key_hex);
        let bytes = hex::decode(trimmed)
            .map_err(|e| CoreError::Config(format!("SIGNING_PRIVATE_KEY_HEX is not hex: {e}")))?;
        if bytes.len() != 32 {
            return Err(CoreError::Config(format!(
                "SIGNING_PRIVATE_KEY_HEX must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|e| CoreError::Config(format!("SIGNING_PRIVATE_KEY_HEX is invalid: {e}")))?;
        Ok(Self::from_key(signing_key))
    }

    /// Generate a fresh random signer. Returns the signer together with
    /// the private key hex so the caller can persist it.
    pub fn generate() -> (Self, String) {
        let signing_key = SigningKey::random(&mut OsRng);
        let private_hex = hex::encode(signing_key.to_bytes());
        (Self::from_key(signing_key), private_hex)
    }

    fn from_key(signing_key: SigningKey) -> Self {
        let public_key_hex = hex::encode(
            signing_key
                .verifying_key()
                .to_encoded_point(false)
                .as_bytes(),
        );
        Self {
            signing_key,
            public_key_hex,
        }
    }

    /// SEC1 uncompressed public key, hex. Served at discovery.
    pub fn public_key_hex(&self) -> &str {
        &self.public_key_hex
    }

    /// Sign a payload, stamping the proof with the current time.
    pub fn sign(&self, payload: CertificatePayload) -> Result<Certificate> {
        self.sign_at(payload, Utc::now().timestamp())
    }

    /// Sign a payload with an explicit proof timestamp.
    pub fn sign_at(&self, payload: CertificatePayload, proof_created: i64) -> Result<Certificate> {
        let canonical = canonical_json(&payload)?;
        let digest = sha256(&canonical);
        let signature: Signature = self
            .signing_key
            .sign_prehash(&digest)
            .map_err(|e| CoreError::Config(format!("Signing failed: {e}")))?;

        Ok(Certificate {
            context: CERTIFICATE_CONTEXT.to_string(),
            certificate_type: CERTIFICATE_TYPE.to_string(),
            payload,
            proof: Proof {
                proof_type: CERTIFICATE_ALG.to_string(),
                created: proof_created,
                public_key: self.public_key_hex.clone(),
                signature: hex::encode(signature.to_der().as_bytes()),
                alg: CERTIFICATE_ALG.to_string(),
            },
        })
    }
}

/// Verify a certificate against the public key embedded in its proof.
///
/// Returns `false` for any malformed key, signature, or payload rather
/// than erroring: a certificate either verifies or it does not.
pub fn verify_certificate(certificate: &Certificate) -> bool {
    let Ok(public_bytes) = hex::decode(&certificate.proof.public_key) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(&public_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(&certificate.proof.signature) else {
        return false;
    };
    let Ok(signature) = Signature::from_der(&sig_bytes) else {
        return false;
    };
    let Ok(canonical) = canonical_json(&certificate.payload) else {
        return false;
    };
    let digest = sha256(&canonical);
    verifying_key.verify_prehash(&digest, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> CertificatePayload {
        CertificatePayload {
            trace_id: "22222222-2222-4222-8222-222222222222".into(),
            agent_id: "11111111-1111-4111-8111-111111111111".into(),
            status: TraceStatus::Success,
            trust_score_after: 55.25,
            trace_hash: "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
                .into(),
            created: 1_700_000_000,
        }
    }

    #[test]
    fn test_sign_then_verify_round_trip() {
        let (signer, _) = Signer::generate();
        let cert = signer.sign_at(sample_payload(), 1_700_000_000).unwrap();
        assert!(verify_certificate(&cert));
    }

    #[test]
    fn test_tampered_payload_fails_verification() {
        let (signer, _) = Signer::generate();
        let mut cert = signer.sign_at(sample_payload(), 1_700_000_000).unwrap();
        cert.payload.trust_score_after = 99.0;
        assert!(!verify_certificate(&cert));
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let (signer, _) = Signer::generate();
        let (other, _) = Signer::generate();
        let mut cert = signer.sign_at(sample_payload(), 1_700_000_000).unwrap();
        cert.proof.public_key = other.public_key_hex().to_string();
        assert!(!verify_certificate(&cert));
    }

    #[test]
    fn test_key_round_trip_through_hex() {
        let (signer, private_hex) = Signer::generate();
        let restored = Signer::from_hex(&private_hex).unwrap();
        assert_eq!(signer.public_key_hex(), restored.public_key_hex());

        // A certificate from one verifies with keys loaded by the other.
        let cert = restored.sign_at(sample_payload(), 1_700_000_000).unwrap();
        assert!(verify_certificate(&cert));
        assert_eq!(cert.proof.public_key, signer.public_key_hex());
    }

    #[test]
    fn test_from_hex_rejects_malformed_keys() {
        assert!(Signer::from_hex("nothex").is_err());
        assert!(Signer::from_hex("abcd").is_err());
        // All-zero scalar is not a valid secp256k1 key
        assert!(Signer::from_hex(&"00".repeat(32)).is_err());
    }

    #[test]
    fn test_certificate_json_shape() {
        let (signer, _) = Signer::generate();
        let cert = signer.sign_at(sample_payload(), 1_700_000_000).unwrap();
        let json = serde_json::to_value(&cert).unwrap();

        assert_eq!(json["@context"], CERTIFICATE_CONTEXT);
        assert_eq!(json["@type"], "CertifiedExecutionTrace");
        assert_eq!(json["payload"]["status"], "success");
        assert_eq!(json["proof"]["alg"], "ECDSA-secp256k1");
        // SEC1 uncompressed: 0x04 || x || y = 65 bytes = 130 hex chars
        assert_eq!(json["proof"]["publicKey"].as_str().unwrap().len(), 130);
    }

    #[test]
    fn test_certificate_survives_json_round_trip() {
        let (signer, _) = Signer::generate();
        let cert = signer.sign_at(sample_payload(), 1_700_000_000).unwrap();
        let json = serde_json::to_string(&cert).unwrap();
        let parsed: Certificate = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cert);
        assert!(verify_certificate(&parsed));
    }

    #[test]
    fn test_debug_does_not_leak_private_key() {
        let (signer, private_hex) = Signer::generate();
        let debug = format!("{:?}", signer);
        assert!(!debug.contains(&private_hex));
    }
}
