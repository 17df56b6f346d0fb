//! The trust verdict table.
//!
//! Maps an agent's current state to a recommendation and risk level.
//! Rules are evaluated top-down; the first match wins.

use garl_core::{Recommendation, RiskLevel};

/// A recommendation/risk pair produced by the verdict table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    /// What the caller should do.
    pub recommendation: Recommendation,
    /// How risky delegation is.
    pub risk_level: RiskLevel,
}

/// Evaluate the verdict table for an agent.
pub fn assess(trust_score: f64, verified: bool, has_active_anomaly: bool) -> Assessment {
    if trust_score >= 75.0 && verified && !has_active_anomaly {
        Assessment {
            recommendation: Recommendation::Trusted,
            risk_level: RiskLevel::Low,
        }
    } else if trust_score >= 60.0 && verified {
        Assessment {
            recommendation: Recommendation::TrustedWithMonitoring,
            risk_level: RiskLevel::Low,
        }
    } else if trust_score >= 50.0 {
        Assessment {
            recommendation: Recommendation::ProceedWithMonitoring,
            risk_level: RiskLevel::Medium,
        }
    } else if trust_score >= 25.0 {
        Assessment {
            recommendation: Recommendation::Caution,
            risk_level: RiskLevel::High,
        }
    } else {
        Assessment {
            recommendation: Recommendation::DoNotDelegate,
            risk_level: RiskLevel::Critical,
        }
    }
}
