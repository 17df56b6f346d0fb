//! Hashing utilities for the GARL ledger.
//!
//! All hashed payloads go through RFC 8785 (JCS) canonicalisation first so
//! that a hash computed here matches one computed by any SDK from the same
//! logical payload.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};
use crate::types::{TaskCategory, TraceStatus};

/// Compute SHA-256 over raw bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Compute SHA-256 over raw bytes, hex-encoded.
///
/// # Example
///
/// ```
/// use garl_core::hashing::sha256_hex;
///
/// let digest = sha256_hex(b"hello");
/// assert_eq!(digest.len(), 64);
/// ```
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Serialize a value as RFC 8785 canonical JSON bytes.
///
/// Keys are sorted lexicographically and no insignificant whitespace is
/// emitted, so the output is byte-stable across processes and languages.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_jcs::to_vec(value)
        .map_err(|e| CoreError::Validation(format!("Payload cannot be canonicalized: {e}")))
}

/// Hash an API key the way the ledger stores it.
pub fn hash_api_key(api_key: &str) -> String {
    sha256_hex(api_key.as_bytes())
}

/// Mask a PII summary: replace it with `sha256:<hex>` of its content.
pub fn mask_summary(summary: &str) -> String {
    format!("sha256:{}", sha256_hex(summary.as_bytes()))
}

/// The client-supplied fields that feed the trace hash.
///
/// Server-assigned fields (trace id, timestamps, certificate) are excluded
/// so a byte-identical resubmission always collides with the original.
/// Summaries enter pre-masking for the same reason.
#[derive(Debug, Serialize)]
pub struct TraceHashInput<'a> {
    /// Owning agent.
    pub agent_id: &'a str,
    /// Task description as submitted.
    pub task_description: &'a str,
    /// Outcome.
    pub status: TraceStatus,
    /// Reported duration.
    pub duration_ms: u64,
    /// Task category.
    pub category: TaskCategory,
    /// Reported cost, if any.
    pub cost_usd: Option<f64>,
    /// Reported token count, if any.
    pub token_count: Option<u64>,
    /// Input summary as submitted.
    pub input_summary: &'a str,
    /// Output summary as submitted.
    pub output_summary: &'a str,
    /// Producing runtime.
    pub runtime_env: &'a str,
}

/// Compute the trace hash: SHA-256 hex over the canonical client payload.
pub fn compute_trace_hash(input: &TraceHashInput<'_>) -> Result<String> {
    let canonical = canonical_json(input)?;
    Ok(sha256_hex(&canonical))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input<'a>() -> TraceHashInput<'a> {
        TraceHashInput {
            agent_id: "11111111-1111-4111-8111-111111111111",
            task_description: "Refactor the billing module",
            status: TraceStatus::Success,
            duration_ms: 5000,
            category: TaskCategory::Coding,
            cost_usd: Some(0.04),
            token_count: Some(1200),
            input_summary: "",
            output_summary: "",
            runtime_env: "pytest",
        }
    }

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        #[derive(Serialize)]
        struct Unordered {
            zebra: u32,
            alpha: u32,
        }

        let bytes = canonical_json(&Unordered { zebra: 1, alpha: 2 }).unwrap();
        assert_eq!(bytes, br#"{"alpha":2,"zebra":1}"#);
    }

    #[test]
    fn test_trace_hash_deterministic() {
        let a = compute_trace_hash(&sample_input()).unwrap();
        let b = compute_trace_hash(&sample_input()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_trace_hash_sensitive_to_fields() {
        let base = compute_trace_hash(&sample_input()).unwrap();

        let mut changed = sample_input();
        changed.duration_ms = 5001;
        assert_ne!(base, compute_trace_hash(&changed).unwrap());

        let mut changed = sample_input();
        changed.status = TraceStatus::Partial;
        assert_ne!(base, compute_trace_hash(&changed).unwrap());

        let mut changed = sample_input();
        changed.cost_usd = None;
        assert_ne!(base, compute_trace_hash(&changed).unwrap());
    }

    #[test]
    fn test_mask_summary_shape() {
        let masked = mask_summary("customer email: a@b.c");
        assert!(masked.starts_with("sha256:"));
        assert_eq!(masked.len(), "sha256:".len() + 64);
        // Masking is deterministic
        assert_eq!(masked, mask_summary("customer email: a@b.c"));
    }

    #[test]
    fn test_api_key_hash_matches_sha256() {
        let key = "garl_test_key";
        assert_eq!(hash_api_key(key), sha256_hex(key.as_bytes()));
    }
}
