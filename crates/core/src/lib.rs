//! # GARL Core
//!
//! Core types, constants, hashing utilities, and certificate signing for the
//! GARL reputation ledger.
//!
//! This crate provides the fundamental building blocks used across all ledger
//! components, ensuring consistent data types and cryptographic operations so
//! that certificates remain bit-reproducible across services.
//!
//! ## Features
//!
//! - **Domain Types**: closed enumerations for status, category, tier, risk
//!   and event kinds, plus the agent and trace records
//! - **Constants**: scoring weights, category benchmarks, tier thresholds
//! - **Hashing**: SHA-256 over RFC 8785 canonical JSON
//! - **Signing**: ECDSA-secp256k1 execution certificates

#![warn(missing_docs)]

pub mod constants;
pub mod error;
pub mod hashing;
pub mod signing;
pub mod types;

// Re-export commonly used items
pub use constants::*;
pub use error::{CoreError, Result};
pub use hashing::{canonical_json, compute_trace_hash, hash_api_key, sha256_hex};
pub use signing::{verify_certificate, Certificate, CertificatePayload, Signer};
pub use types::*;
