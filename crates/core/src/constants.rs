//! Canonical constants for the GARL reputation ledger.
//!
//! These values are part of the scoring contract: changing any of them
//! changes every agent's trajectory, so they live in one place and are
//! read-only at runtime.

/// Baseline score every dimension starts at and decays toward.
pub const BASELINE_SCORE: f64 = 50.0;

/// Lower bound for every score attribute.
pub const MIN_SCORE: f64 = 0.0;

/// Upper bound for every score attribute.
pub const MAX_SCORE: f64 = 100.0;

/// EMA smoothing factor: `ema' = ALPHA * observation + (1 - ALPHA) * ema`.
pub const EMA_ALPHA: f64 = 0.3;

/// Agents below this trace count get EMA updates dampened by half.
pub const DAMPING_TRACE_COUNT: u64 = 5;

/// Composite weight of the reliability dimension.
pub const WEIGHT_RELIABILITY: f64 = 0.30;

/// Composite weight of the security dimension.
pub const WEIGHT_SECURITY: f64 = 0.20;

/// Composite weight of the speed dimension.
pub const WEIGHT_SPEED: f64 = 0.15;

/// Composite weight of the cost-efficiency dimension.
pub const WEIGHT_COST_EFFICIENCY: f64 = 0.10;

/// Composite weight of the consistency dimension.
pub const WEIGHT_CONSISTENCY: f64 = 0.25;

/// Streak bonus added to a success observation, capped at this value.
pub const STREAK_BONUS_CAP: u64 = 10;

/// Number of recent traces feeding the consistency window.
pub const CONSISTENCY_WINDOW: usize = 20;

/// Anomaly detection only runs once an agent has this many traces.
pub const ANOMALY_MIN_TRACES: u64 = 10;

/// Consecutive clean traces after which warning flags auto-archive.
pub const ANOMALY_CLEAR_THRESHOLD: u64 = 50;

/// Window (trace count) for the unexpected-failure success rate.
pub const ANOMALY_RATE_WINDOW: u32 = 50;

/// `duration_ms` above `avg * factor` flags a duration spike.
pub const DURATION_SPIKE_FACTOR: f64 = 5.0;

/// `cost_usd` above `avg * factor` flags a cost spike.
pub const COST_SPIKE_FACTOR: f64 = 10.0;

/// Last-50 success rate (percent) above which a failure is unexpected.
pub const UNEXPECTED_FAILURE_RATE: f64 = 90.0;

/// Per-day pull toward the baseline for dormant agents.
pub const DECAY_RATE_PER_DAY: f64 = 0.001;

/// Hours of dormancy before decay starts applying.
pub const DECAY_DORMANT_HOURS: f64 = 24.0;

/// Maximum bonus a single endorsement may add to the target.
pub const MAX_ENDORSEMENT_BONUS: f64 = 2.0;

/// Endorser trust score below which a bonus is always zero.
pub const ENDORSER_MIN_SCORE: f64 = 60.0;

/// Endorser trace count below which a bonus is always zero.
pub const ENDORSER_MIN_TRACES: u64 = 10;

/// Trace counts at which a `milestone` event fires.
pub const MILESTONES: [u64; 6] = [10, 50, 100, 500, 1000, 5000];

/// Absolute composite change that triggers a `score_change` event.
pub const SCORE_CHANGE_EVENT_THRESHOLD: f64 = 2.0;

/// Traces needed before an agent counts as verified.
pub const VERIFIED_TRACE_COUNT: u64 = 10;

/// Maximum traces accepted in one batch submission.
pub const MAX_BATCH_TRACES: usize = 50;

/// Maximum length of a trace task description.
pub const MAX_TASK_DESCRIPTION_LEN: usize = 1000;

/// Maximum length of input/output summaries.
pub const MAX_SUMMARY_LEN: usize = 500;

/// Maximum length of an agent name.
pub const MAX_AGENT_NAME_LEN: usize = 100;

/// Maximum serialized size of open-shape attributes (metadata, tool_calls).
pub const MAX_OPEN_ATTR_BYTES: usize = 4096;

/// JSON-LD context served in every certificate.
pub const CERTIFICATE_CONTEXT: &str = "https://garl.io/schema/v1";

/// JSON-LD type served in every certificate.
pub const CERTIFICATE_TYPE: &str = "CertifiedExecutionTrace";

/// Signature algorithm identifier served in every certificate proof.
pub const CERTIFICATE_ALG: &str = "ECDSA-secp256k1";

/// DID method prefix for sovereign agent identifiers.
pub const DID_PREFIX: &str = "did:garl:";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_weights_sum_to_one() {
        let total = WEIGHT_RELIABILITY
            + WEIGHT_SECURITY
            + WEIGHT_SPEED
            + WEIGHT_COST_EFFICIENCY
            + WEIGHT_CONSISTENCY;
        assert!((total - 1.0).abs() < 1e-12, "weights must sum to 1.0, got {}", total);
    }

    #[test]
    fn test_score_bounds() {
        assert!(MIN_SCORE < BASELINE_SCORE);
        assert!(BASELINE_SCORE < MAX_SCORE);
    }

    #[test]
    fn test_milestones_ascending() {
        for pair in MILESTONES.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}
