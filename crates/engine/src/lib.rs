//! GARL reputation engine.
//!
//! This crate implements the deterministic scoring rules of the ledger:
//! - Five-dimensional per-trace observations blended into EMAs (`α = 0.3`)
//! - Composite trust score (reliability 30%, security 20%, speed 15%,
//!   cost-efficiency 10%, consistency 25%)
//! - Anomaly detection and warning auto-archival
//! - Inactivity decay toward the 50.0 baseline
//! - Sybil-weighted endorsement bonuses
//! - The trust verdict table (recommendation + risk level)
//!
//! Everything here is a pure function over `(agent_state, inputs)`;
//! persistence, locking, and event fan-out live in the service crates.

pub mod anomaly;
pub mod decay;
pub mod endorsement;
pub mod reputation;
pub mod verdict;

pub use anomaly::{archive_cleared_warnings, detect_anomalies};
pub use decay::{apply_time_decay, decay_agent, project_decay, DecayProjection, DecayedState};
pub use endorsement::compute_endorsement_bonus;
pub use reputation::{
    apply_trace, clamp_score, compose_trust_score, round2, ReputationUpdate, TraceObservation,
    UpdateContext,
};
pub use verdict::{assess, Assessment};
