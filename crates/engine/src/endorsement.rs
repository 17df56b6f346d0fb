//! Sybil-weighted endorsement bonuses.
//!
//! The bonus an endorsement transfers is a function of a snapshot of the
//! endorser's state at endorsement time; cycles in the endorsement graph
//! cannot cascade because nothing is ever re-evaluated.

use garl_core::constants::{
    ENDORSER_MIN_SCORE, ENDORSER_MIN_TRACES, MAX_ENDORSEMENT_BONUS,
};
use garl_core::CertificationTier;

/// Compute the bonus an endorsement adds to its target.
///
/// Endorsers below 60 trust or 10 traces transfer nothing, whatever
/// their tier: a freshly farmed swarm of bronze agents cannot move a
/// target's score.
pub fn compute_endorsement_bonus(
    endorser_score: f64,
    endorser_traces: u64,
    endorser_tier: CertificationTier,
) -> f64 {
    if endorser_score < ENDORSER_MIN_SCORE || endorser_traces < ENDORSER_MIN_TRACES {
        return 0.0;
    }

    let w_score = ((endorser_score - ENDORSER_MIN_SCORE) / 40.0).max(0.0);
    let w_traces = (endorser_traces as f64 / ENDORSER_MIN_TRACES as f64).min(1.0);
    let raw = MAX_ENDORSEMENT_BONUS * w_score * w_traces * endorser_tier.endorsement_multiplier();

    let bonus = raw.min(MAX_ENDORSEMENT_BONUS);
    (bonus * 10_000.0).round() / 10_000.0
}
