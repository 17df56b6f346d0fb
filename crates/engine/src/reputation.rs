//! Per-trace reputation updates.
//!
//! The update path is: map the trace into five dimensional observations in
//! `[0, 100]`, blend each into the agent's EMA, then recompute the weighted
//! composite. Young agents (< 5 traces) get half-strength EMA steps to
//! suppress early noise.

use chrono::{DateTime, Utc};

use garl_core::constants::*;
use garl_core::{
    Agent, AnomalyFlag, CertificationTier, Dimensions, SecurityContext, TaskCategory, TraceStatus,
};

use crate::anomaly;

/// The engine's view of an incoming, already-validated trace.
#[derive(Debug, Clone)]
pub struct TraceObservation<'a> {
    /// Trace outcome.
    pub status: TraceStatus,
    /// Reported duration; zero means unreported.
    pub duration_ms: u64,
    /// Category the task ran in.
    pub category: TaskCategory,
    /// Reported cost, if any.
    pub cost_usd: Option<f64>,
    /// Permissions the trace says it used.
    pub permissions_used: &'a [String],
    /// Security observations attached by the runtime.
    pub security_context: Option<SecurityContext>,
}

/// Storage-derived context the pure update needs.
#[derive(Debug, Clone, Default)]
pub struct UpdateContext {
    /// Status-mapped reliability observations of the most recent traces
    /// (at most `CONSISTENCY_WINDOW - 1`), excluding the incoming one.
    pub recent_reliability_obs: Vec<f64>,
    /// Success rate (percent) over the last `ANOMALY_RATE_WINDOW` traces,
    /// excluding the incoming one. `None` when the agent has no traces.
    pub recent_success_rate: Option<f64>,
}

/// Result of applying one trace to an agent's state.
#[derive(Debug, Clone)]
pub struct ReputationUpdate {
    /// New dimensional scores.
    pub dimensions: Dimensions,
    /// New EMA accumulators.
    pub emas: Dimensions,
    /// New composite trust score.
    pub trust_score: f64,
    /// `trust_score - previous trust_score`.
    pub trust_delta: f64,
    /// Tier implied by the new composite.
    pub certification_tier: CertificationTier,
    /// Whether the tier changed.
    pub tier_changed: bool,
    /// New total trace count.
    pub total_traces: u64,
    /// New success count.
    pub success_count: u64,
    /// New all-time success rate (percent).
    pub success_rate: f64,
    /// New success streak.
    pub consecutive_successes: u64,
    /// New running average duration.
    pub avg_duration_ms: u64,
    /// New cumulative cost.
    pub total_cost_usd: f64,
    /// Full anomaly flag list after detection and auto-archival.
    pub anomaly_flags: Vec<AnomalyFlag>,
    /// Flags newly raised by this trace.
    pub new_anomalies: Vec<AnomalyFlag>,
}

/// Clamp a score into `[0, 100]`.
pub fn clamp_score(score: f64) -> f64 {
    score.clamp(MIN_SCORE, MAX_SCORE)
}

/// Round to two decimals, the ledger's score precision.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// One EMA step. Dampened steps move half as far.
fn ema_step(ema: f64, observation: f64, dampened: bool) -> f64 {
    let alpha = if dampened { EMA_ALPHA * 0.5 } else { EMA_ALPHA };
    round4(ema + alpha * (observation - ema))
}

/// Status-mapped reliability value without the streak bonus.
pub fn status_observation(status: TraceStatus) -> f64 {
    match status {
        TraceStatus::Success => 100.0,
        TraceStatus::Partial => 60.0,
        TraceStatus::Failure => 0.0,
    }
}

/// Reliability observation: status value plus the capped streak bonus.
fn reliability_observation(status: TraceStatus, consecutive_after: u64) -> f64 {
    let base = status_observation(status);
    let bonus = consecutive_after.min(STREAK_BONUS_CAP) as f64;
    clamp_score(base + bonus)
}

/// Speed observation against the category benchmark.
///
/// Meeting the benchmark scores 50, twice as fast scores 100, ten times
/// slower approaches 0. Unreported duration yields no observation.
fn speed_observation(duration_ms: u64, category: TaskCategory) -> Option<f64> {
    if duration_ms == 0 {
        return None;
    }
    let bench = category.speed_benchmark_ms() as f64;
    let ratio = (bench / duration_ms.max(1) as f64).clamp(0.0, 2.0);
    Some(100.0 * ratio / 2.0)
}

/// Cost-efficiency observation, same shape as speed.
fn cost_observation(cost_usd: Option<f64>, category: TaskCategory) -> Option<f64> {
    let cost = cost_usd?;
    if cost <= 0.0 {
        return None;
    }
    let bench = category.cost_benchmark_usd();
    let ratio = (bench / cost).clamp(0.0, 2.0);
    Some(100.0 * ratio / 2.0)
}

/// Security observation: permission discipline and incident flags.
fn security_observation(
    permissions_used: &[String],
    permissions_declared: &[String],
    security_context: Option<SecurityContext>,
) -> f64 {
    let mut obs = BASELINE_SCORE;

    if !permissions_used.is_empty()
        && !permissions_declared.is_empty()
        && permissions_used
            .iter()
            .all(|p| permissions_declared.contains(p))
    {
        obs += 2.0;
    }

    if let Some(ctx) = security_context {
        obs -= 10.0 * ctx.event_count() as f64;
    }

    clamp_score(obs)
}

/// Consistency observation from the rolling reliability window.
fn consistency_observation(window: &[f64]) -> f64 {
    clamp_score(100.0 - stdev(window).min(50.0))
}

/// Sample standard deviation; zero for fewer than two values.
fn stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}

/// Weighted composite over the five dimensions plus the endorsement
/// bonus, clamped to `[0, 100]`.
pub fn compose_trust_score(dimensions: &Dimensions, endorsement_score: f64) -> f64 {
    let weighted = dimensions.reliability * WEIGHT_RELIABILITY
        + dimensions.security * WEIGHT_SECURITY
        + dimensions.speed * WEIGHT_SPEED
        + dimensions.cost_efficiency * WEIGHT_COST_EFFICIENCY
        + dimensions.consistency * WEIGHT_CONSISTENCY;
    round2(clamp_score(weighted + endorsement_score))
}

/// All-time success rate in percent.
pub fn compute_success_rate(successes: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(successes as f64 / total as f64 * 100.0)
}

/// Apply one validated trace to the agent's reputation state.
///
/// Pure: reads the prior state and the storage-derived [`UpdateContext`],
/// returns the complete post-trace state. Anomaly detection runs against
/// the *prior* statistics, so a spike is judged against the history it
/// deviates from.
pub fn apply_trace(
    agent: &Agent,
    trace: &TraceObservation<'_>,
    ctx: &UpdateContext,
    now: DateTime<Utc>,
) -> ReputationUpdate {
    let dampened = agent.total_traces < DAMPING_TRACE_COUNT;

    // Anomalies are judged against the history before this trace lands.
    let new_anomalies = anomaly::detect_anomalies(agent, trace, ctx.recent_success_rate, now);

    let consecutive_after = if trace.status == TraceStatus::Success {
        agent.consecutive_successes + 1
    } else {
        0
    };
    let success_count = agent.success_count + u64::from(trace.status == TraceStatus::Success);
    let total_traces = agent.total_traces + 1;
    let success_rate = compute_success_rate(success_count, total_traces);

    // --- dimensional observations ---
    let rel_obs = reliability_observation(trace.status, consecutive_after);
    let spd_obs = speed_observation(trace.duration_ms, trace.category);
    let cst_obs = cost_observation(trace.cost_usd, trace.category);
    let sec_obs = security_observation(
        trace.permissions_used,
        &agent.permissions_declared,
        trace.security_context,
    );

    let mut window = ctx.recent_reliability_obs.clone();
    window.truncate(CONSISTENCY_WINDOW - 1);
    window.push(status_observation(trace.status));
    let con_obs = consistency_observation(&window);

    // --- EMA blend; the dimensional score tracks the EMA ---
    let mut emas = agent.emas;
    emas.reliability = ema_step(emas.reliability, rel_obs, dampened);
    emas.security = ema_step(emas.security, sec_obs, dampened);
    if let Some(obs) = spd_obs {
        emas.speed = ema_step(emas.speed, obs, dampened);
    }
    if let Some(obs) = cst_obs {
        emas.cost_efficiency = ema_step(emas.cost_efficiency, obs, dampened);
    }
    emas.consistency = ema_step(emas.consistency, con_obs, dampened);

    let dimensions = Dimensions {
        reliability: round2(clamp_score(emas.reliability)),
        security: round2(clamp_score(emas.security)),
        speed: round2(clamp_score(emas.speed)),
        cost_efficiency: round2(clamp_score(emas.cost_efficiency)),
        consistency: round2(clamp_score(emas.consistency)),
    };

    let trust_score = compose_trust_score(&dimensions, agent.endorsement_score);
    let trust_delta = round4(trust_score - agent.trust_score);

    let certification_tier = CertificationTier::from_score(trust_score);
    let tier_changed = certification_tier != agent.certification_tier;

    // --- bookkeeping ---
    let avg_duration_ms = ((agent.avg_duration_ms as u128 * agent.total_traces as u128
        + trace.duration_ms as u128)
        / total_traces as u128) as u64;
    let total_cost_usd = agent.total_cost_usd + trace.cost_usd.unwrap_or(0.0);

    let anomaly_flags = if new_anomalies.is_empty() {
        anomaly::archive_cleared_warnings(agent.anomaly_flags.clone(), consecutive_after)
    } else {
        let mut flags = agent.anomaly_flags.clone();
        flags.extend(new_anomalies.iter().cloned());
        anomaly::trim_flags(flags)
    };

    ReputationUpdate {
        dimensions,
        emas,
        trust_score,
        trust_delta,
        certification_tier,
        tier_changed,
        total_traces,
        success_count,
        success_rate,
        consecutive_successes: consecutive_after,
        avg_duration_ms,
        total_cost_usd,
        anomaly_flags,
        new_anomalies,
    }
}
