//! Anomaly detection over incoming traces.
//!
//! Detection only runs once an agent has enough history
//! (`ANOMALY_MIN_TRACES`) for "unusual" to mean anything. Warning flags
//! auto-archive after a long clean streak; critical flags never do.

use chrono::{DateTime, Utc};

use garl_core::constants::*;
use garl_core::{Agent, AnomalyFlag, AnomalySeverity, AnomalyType, TraceStatus};

use crate::reputation::TraceObservation;

/// Active flags kept plus this many most-recent archived ones.
const ARCHIVED_FLAG_TAIL: usize = 5;

/// Hard cap on flags carried per agent.
const MAX_FLAGS: usize = 10;

/// Detect anomalies for a trace against the agent's prior statistics.
///
/// When two or more distinct anomaly types coincide on one trace, every
/// flag raised here is escalated to critical.
pub fn detect_anomalies(
    agent: &Agent,
    trace: &TraceObservation<'_>,
    recent_success_rate: Option<f64>,
    now: DateTime<Utc>,
) -> Vec<AnomalyFlag> {
    if agent.total_traces < ANOMALY_MIN_TRACES {
        return Vec::new();
    }

    let mut flags = Vec::new();

    if trace.status == TraceStatus::Failure {
        if let Some(rate) = recent_success_rate {
            if rate >= UNEXPECTED_FAILURE_RATE {
                flags.push(AnomalyFlag {
                    anomaly_type: AnomalyType::UnexpectedFailure,
                    severity: AnomalySeverity::Warning,
                    message: format!("Failure from agent with {rate}% recent success rate"),
                    archived: false,
                    detected_at: now,
                });
            }
        }
    }

    if agent.avg_duration_ms > 0
        && trace.duration_ms as f64 > agent.avg_duration_ms as f64 * DURATION_SPIKE_FACTOR
    {
        flags.push(AnomalyFlag {
            anomaly_type: AnomalyType::DurationSpike,
            severity: AnomalySeverity::Warning,
            message: format!(
                "Duration {}ms is 5x+ above average {}ms",
                trace.duration_ms, agent.avg_duration_ms
            ),
            archived: false,
            detected_at: now,
        });
    }

    if let Some(cost) = trace.cost_usd {
        let avg_cost = agent.total_cost_usd / agent.total_traces as f64;
        if avg_cost > 0.0 && cost > avg_cost * COST_SPIKE_FACTOR {
            flags.push(AnomalyFlag {
                anomaly_type: AnomalyType::CostSpike,
                severity: AnomalySeverity::Warning,
                message: format!("Cost ${cost:.4} is 10x+ above average ${avg_cost:.4}"),
                archived: false,
                detected_at: now,
            });
        }
    }

    if flags.len() >= 2 {
        for flag in &mut flags {
            flag.severity = AnomalySeverity::Critical;
        }
    }

    flags
}

/// Archive warning flags after a sufficiently long clean streak.
///
/// Critical flags are never touched.
pub fn archive_cleared_warnings(
    mut flags: Vec<AnomalyFlag>,
    consecutive_clean: u64,
) -> Vec<AnomalyFlag> {
    if consecutive_clean < ANOMALY_CLEAR_THRESHOLD || flags.is_empty() {
        return flags;
    }

    for flag in &mut flags {
        if flag.severity == AnomalySeverity::Warning {
            flag.archived = true;
        }
    }

    trim_flags(flags)
}

/// Keep every active flag plus the most recent archived tail, capped.
pub fn trim_flags(flags: Vec<AnomalyFlag>) -> Vec<AnomalyFlag> {
    let (active, archived): (Vec<_>, Vec<_>) = flags.into_iter().partition(AnomalyFlag::is_active);

    let mut kept = active;
    let skip = archived.len().saturating_sub(ARCHIVED_FLAG_TAIL);
    kept.extend(archived.into_iter().skip(skip));

    let skip = kept.len().saturating_sub(MAX_FLAGS);
    kept.into_iter().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use garl_core::TaskCategory;

    fn seasoned_agent() -> Agent {
        let mut agent = crate::testutil::fresh_agent(TaskCategory::Coding);
        agent.total_traces = 15;
        agent.success_count = 15;
        agent.success_rate = 100.0;
        agent.avg_duration_ms = 1000;
        agent.total_cost_usd = 0.15;
        agent
    }

    fn trace(
        status: TraceStatus,
        duration_ms: u64,
        cost_usd: Option<f64>,
    ) -> TraceObservation<'static> {
        TraceObservation {
            status,
            duration_ms,
            category: TaskCategory::Coding,
            cost_usd,
            permissions_used: &[],
            security_context: None,
        }
    }

    #[test]
    fn test_no_detection_below_trace_floor() {
        let mut agent = seasoned_agent();
        agent.total_traces = 9;
        let flags = detect_anomalies(
            &agent,
            &trace(TraceStatus::Failure, 100_000, Some(5.0)),
            Some(100.0),
            Utc::now(),
        );
        assert!(flags.is_empty());
    }

    #[test]
    fn test_duration_spike_warning() {
        // 10000 ms against a 1000 ms average: one warning flag.
        let agent = seasoned_agent();
        let flags = detect_anomalies(
            &agent,
            &trace(TraceStatus::Success, 10_000, None),
            Some(100.0),
            Utc::now(),
        );
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].anomaly_type, AnomalyType::DurationSpike);
        assert_eq!(flags[0].severity, AnomalySeverity::Warning);
        assert!(!flags[0].archived);
    }

    #[test]
    fn test_exactly_5x_duration_is_not_a_spike() {
        let agent = seasoned_agent();
        let flags = detect_anomalies(
            &agent,
            &trace(TraceStatus::Success, 5_000, None),
            Some(100.0),
            Utc::now(),
        );
        assert!(flags.is_empty());
    }

    #[test]
    fn test_unexpected_failure() {
        let agent = seasoned_agent();
        let flags = detect_anomalies(
            &agent,
            &trace(TraceStatus::Failure, 1_000, None),
            Some(95.0),
            Utc::now(),
        );
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].anomaly_type, AnomalyType::UnexpectedFailure);

        // Mediocre recent record: failures are expected, no flag.
        let flags = detect_anomalies(
            &agent,
            &trace(TraceStatus::Failure, 1_000, None),
            Some(80.0),
            Utc::now(),
        );
        assert!(flags.is_empty());
    }

    #[test]
    fn test_cost_spike() {
        // avg cost = 0.15 / 15 = 0.01; 0.5 is 50x above it.
        let agent = seasoned_agent();
        let flags = detect_anomalies(
            &agent,
            &trace(TraceStatus::Success, 1_000, Some(0.5)),
            Some(100.0),
            Utc::now(),
        );
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].anomaly_type, AnomalyType::CostSpike);
    }

    #[test]
    fn test_coinciding_anomalies_escalate_to_critical() {
        // Failure at 95% rate + 10x duration + 50x cost on one trace.
        let agent = seasoned_agent();
        let flags = detect_anomalies(
            &agent,
            &trace(TraceStatus::Failure, 10_000, Some(0.5)),
            Some(95.0),
            Utc::now(),
        );
        assert_eq!(flags.len(), 3);
        assert!(flags
            .iter()
            .all(|f| f.severity == AnomalySeverity::Critical));
    }

    #[test]
    fn test_archive_after_clean_streak() {
        let warning = AnomalyFlag {
            anomaly_type: AnomalyType::DurationSpike,
            severity: AnomalySeverity::Warning,
            message: "spike".into(),
            archived: false,
            detected_at: Utc::now(),
        };
        let critical = AnomalyFlag {
            anomaly_type: AnomalyType::CostSpike,
            severity: AnomalySeverity::Critical,
            message: "spike".into(),
            archived: false,
            detected_at: Utc::now(),
        };

        // Streak too short: untouched.
        let flags = archive_cleared_warnings(vec![warning.clone(), critical.clone()], 49);
        assert!(flags.iter().all(|f| !f.archived));

        // Long streak: warnings archive, criticals never do.
        let flags = archive_cleared_warnings(vec![warning, critical], 50);
        let archived: Vec<_> = flags.iter().filter(|f| f.archived).collect();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].anomaly_type, AnomalyType::DurationSpike);
        assert!(flags
            .iter()
            .any(|f| f.severity == AnomalySeverity::Critical && !f.archived));
    }

    #[test]
    fn test_trim_keeps_active_and_recent_archived() {
        let mut flags = Vec::new();
        for i in 0..9 {
            flags.push(AnomalyFlag {
                anomaly_type: AnomalyType::DurationSpike,
                severity: AnomalySeverity::Warning,
                message: format!("old {i}"),
                archived: true,
                detected_at: Utc::now(),
            });
        }
        flags.push(AnomalyFlag {
            anomaly_type: AnomalyType::CostSpike,
            severity: AnomalySeverity::Critical,
            message: "live".into(),
            archived: false,
            detected_at: Utc::now(),
        });

        let trimmed = trim_flags(flags);
        assert_eq!(trimmed.len(), 1 + ARCHIVED_FLAG_TAIL);
        assert!(trimmed.iter().any(|f| f.message == "live"));
        assert!(trimmed.iter().any(|f| f.message == "old 8"));
        assert!(!trimmed.iter().any(|f| f.message == "old 0"));
    }
}
