//! Inactivity decay.
//!
//! Dormant agents drift toward the 50.0 baseline at 0.1% per day. Decay is
//! lazy: it runs when an agent is read, never on a timer, and it can never
//! move a score past the baseline.

use serde::Serialize;

use garl_core::constants::{
    BASELINE_SCORE, DECAY_DORMANT_HOURS, DECAY_RATE_PER_DAY,
};
use garl_core::{Agent, CertificationTier, Dimensions};

use crate::reputation::{clamp_score, compose_trust_score, round2};

/// Decay a single score for the given dormancy.
///
/// `score' = baseline + (score - baseline) * (1 - rate)^days`, so the
/// score asymptotically approaches 50 from either side.
pub fn apply_time_decay(score: f64, hours_since_last: f64) -> f64 {
    if hours_since_last <= 0.0 {
        return score;
    }
    let days = hours_since_last / 24.0;
    let retained = (1.0 - DECAY_RATE_PER_DAY).powf(days);
    round2(clamp_score(
        BASELINE_SCORE + (score - BASELINE_SCORE) * retained,
    ))
}

/// Decayed agent state produced by a read.
#[derive(Debug, Clone, PartialEq)]
pub struct DecayedState {
    /// Decayed dimensional scores.
    pub dimensions: Dimensions,
    /// Recomputed composite.
    pub trust_score: f64,
    /// `trust_score - previous trust_score`.
    pub trust_delta: f64,
    /// Tier implied by the decayed composite.
    pub certification_tier: CertificationTier,
}

/// Apply lazy decay to an agent if it has been dormant long enough.
///
/// Returns `None` when nothing changed (recent activity, no traces yet,
/// or the movement rounds to zero), so callers skip the persistence
/// write entirely in the common case.
pub fn decay_agent(agent: &Agent, hours_since_last: f64) -> Option<DecayedState> {
    if agent.total_traces == 0 || hours_since_last < DECAY_DORMANT_HOURS {
        return None;
    }

    let dimensions = Dimensions {
        reliability: apply_time_decay(agent.dimensions.reliability, hours_since_last),
        security: apply_time_decay(agent.dimensions.security, hours_since_last),
        speed: apply_time_decay(agent.dimensions.speed, hours_since_last),
        cost_efficiency: apply_time_decay(agent.dimensions.cost_efficiency, hours_since_last),
        consistency: apply_time_decay(agent.dimensions.consistency, hours_since_last),
    };

    let trust_score = compose_trust_score(&dimensions, agent.endorsement_score);
    if dimensions == agent.dimensions && (trust_score - agent.trust_score).abs() < 0.01 {
        return None;
    }

    Some(DecayedState {
        dimensions,
        trust_score,
        trust_delta: round2(trust_score - agent.trust_score),
        certification_tier: CertificationTier::from_score(trust_score),
    })
}

/// One point of a decay projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DecayProjection {
    /// Days of continued dormancy.
    pub days: u32,
    /// Score projected for that point.
    pub projected_score: f64,
}

/// Project where a score lands after further dormancy.
pub fn project_decay(current_score: f64, days: &[u32]) -> Vec<DecayProjection> {
    days.iter()
        .map(|&d| DecayProjection {
            days: d,
            projected_score: apply_time_decay(current_score, d as f64 * 24.0),
        })
        .collect()
}
