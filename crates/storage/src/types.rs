//! Row types and conversions between database rows and core records.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use garl_core::{
    Agent, AnomalyFlag, Certificate, CertificationTier, Dimensions, Endorsement, HistoryEvent,
    ReputationEvent, TaskCategory, ToolCall, Trace, TraceStatus, Webhook, WebhookEvent,
};

/// Raw `agents` row.
#[derive(Debug, sqlx::FromRow)]
pub struct DbAgent {
    /// Primary key.
    pub agent_id: String,
    /// DID handle.
    pub sovereign_id: String,
    /// Display name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Framework label.
    pub framework: String,
    /// Category string.
    pub category: String,
    /// SHA-256 hex of the API key.
    pub api_key_hash: String,
    /// Sandbox marker.
    pub is_sandbox: bool,
    /// Soft-deletion marker.
    pub is_deleted: bool,
    /// Reliability score.
    pub score_reliability: f64,
    /// Security score.
    pub score_security: f64,
    /// Speed score.
    pub score_speed: f64,
    /// Cost-efficiency score.
    pub score_cost_efficiency: f64,
    /// Consistency score.
    pub score_consistency: f64,
    /// Reliability EMA.
    pub ema_reliability: f64,
    /// Security EMA.
    pub ema_security: f64,
    /// Speed EMA.
    pub ema_speed: f64,
    /// Cost-efficiency EMA.
    pub ema_cost_efficiency: f64,
    /// Consistency EMA.
    pub ema_consistency: f64,
    /// Composite trust score.
    pub trust_score: f64,
    /// Tier string.
    pub certification_tier: String,
    /// Trace count.
    pub total_traces: i64,
    /// Success count.
    pub success_count: i64,
    /// All-time success rate.
    pub success_rate: f64,
    /// Current success streak.
    pub consecutive_successes: i64,
    /// Running average duration.
    pub avg_duration_ms: i64,
    /// Cumulative cost.
    pub total_cost_usd: f64,
    /// Anomaly flags as JSON.
    pub anomaly_flags: String,
    /// Cumulative endorsement bonus.
    pub endorsement_score: f64,
    /// Endorsement count.
    pub endorsement_count: i64,
    /// Declared permissions as JSON.
    pub permissions_declared: String,
    /// Last trace timestamp.
    pub last_trace_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbAgent> for Agent {
    type Error = anyhow::Error;

    fn try_from(row: DbAgent) -> Result<Self> {
        let anomaly_flags: Vec<AnomalyFlag> = serde_json::from_str(&row.anomaly_flags)
            .context("agents.anomaly_flags is not valid JSON")?;
        let permissions_declared: Vec<String> = serde_json::from_str(&row.permissions_declared)
            .context("agents.permissions_declared is not valid JSON")?;

        Ok(Agent {
            agent_id: row.agent_id,
            sovereign_id: row.sovereign_id,
            name: row.name,
            description: row.description,
            framework: row.framework,
            category: row.category.parse::<TaskCategory>()?,
            api_key_hash: row.api_key_hash,
            is_sandbox: row.is_sandbox,
            is_deleted: row.is_deleted,
            dimensions: Dimensions {
                reliability: row.score_reliability,
                security: row.score_security,
                speed: row.score_speed,
                cost_efficiency: row.score_cost_efficiency,
                consistency: row.score_consistency,
            },
            emas: Dimensions {
                reliability: row.ema_reliability,
                security: row.ema_security,
                speed: row.ema_speed,
                cost_efficiency: row.ema_cost_efficiency,
                consistency: row.ema_consistency,
            },
            trust_score: row.trust_score,
            certification_tier: row.certification_tier.parse::<CertificationTier>()?,
            total_traces: row.total_traces as u64,
            success_count: row.success_count as u64,
            success_rate: row.success_rate,
            consecutive_successes: row.consecutive_successes as u64,
            avg_duration_ms: row.avg_duration_ms as u64,
            total_cost_usd: row.total_cost_usd,
            anomaly_flags,
            endorsement_score: row.endorsement_score,
            endorsement_count: row.endorsement_count as u64,
            permissions_declared,
            last_trace_at: row.last_trace_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Raw `traces` row.
#[derive(Debug, sqlx::FromRow)]
pub struct DbTrace {
    /// Primary key.
    pub trace_id: String,
    /// Owning agent.
    pub agent_id: String,
    /// Task description.
    pub task_description: String,
    /// Status string.
    pub status: String,
    /// Reported duration.
    pub duration_ms: i64,
    /// Category string.
    pub category: String,
    /// Reported cost.
    pub cost_usd: Option<f64>,
    /// Reported token count.
    pub token_count: Option<i64>,
    /// Tool calls as JSON.
    pub tool_calls: String,
    /// Open-shape metadata as JSON.
    pub metadata: String,
    /// Input summary (possibly masked).
    pub input_summary: String,
    /// Output summary (possibly masked).
    pub output_summary: String,
    /// Producing runtime.
    pub runtime_env: String,
    /// Canonical payload hash.
    pub trace_hash: String,
    /// Certificate as JSON.
    pub certificate: String,
    /// Applied trust delta.
    pub trust_delta: f64,
    /// Acceptance timestamp.
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbTrace> for Trace {
    type Error = anyhow::Error;

    fn try_from(row: DbTrace) -> Result<Self> {
        let tool_calls: Vec<ToolCall> =
            serde_json::from_str(&row.tool_calls).context("traces.tool_calls is not valid JSON")?;
        let metadata: Option<serde_json::Value> =
            serde_json::from_str(&row.metadata).context("traces.metadata is not valid JSON")?;
        let certificate: Certificate = serde_json::from_str(&row.certificate)
            .context("traces.certificate is not valid JSON")?;

        Ok(Trace {
            trace_id: row.trace_id,
            agent_id: row.agent_id,
            task_description: row.task_description,
            status: row.status.parse::<TraceStatus>()?,
            duration_ms: row.duration_ms as u64,
            category: row.category.parse::<TaskCategory>()?,
            cost_usd: row.cost_usd,
            token_count: row.token_count.map(|t| t as u64),
            tool_calls,
            metadata,
            input_summary: row.input_summary,
            output_summary: row.output_summary,
            runtime_env: row.runtime_env,
            trace_hash: row.trace_hash,
            certificate,
            trust_delta: row.trust_delta,
            created_at: row.created_at,
        })
    }
}

/// Raw `reputation_history` row.
#[derive(Debug, sqlx::FromRow)]
pub struct DbHistory {
    /// Owning agent.
    pub agent_id: String,
    /// Composite after the event.
    pub trust_score: f64,
    /// Reliability after the event.
    pub score_reliability: f64,
    /// Security after the event.
    pub score_security: f64,
    /// Speed after the event.
    pub score_speed: f64,
    /// Cost-efficiency after the event.
    pub score_cost_efficiency: f64,
    /// Consistency after the event.
    pub score_consistency: f64,
    /// Event kind string.
    pub event_type: String,
    /// Applied delta.
    pub trust_delta: f64,
    /// Event timestamp.
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbHistory> for ReputationEvent {
    type Error = anyhow::Error;

    fn try_from(row: DbHistory) -> Result<Self> {
        Ok(ReputationEvent {
            agent_id: row.agent_id,
            trust_score: row.trust_score,
            dimensions: Dimensions {
                reliability: row.score_reliability,
                security: row.score_security,
                speed: row.score_speed,
                cost_efficiency: row.score_cost_efficiency,
                consistency: row.score_consistency,
            },
            event_type: row.event_type.parse::<HistoryEvent>()?,
            trust_delta: row.trust_delta,
            created_at: row.created_at,
        })
    }
}

/// Raw `endorsements` row.
#[derive(Debug, sqlx::FromRow)]
pub struct DbEndorsement {
    /// Primary key.
    pub id: String,
    /// Endorsing agent.
    pub endorser_id: String,
    /// Endorsed agent.
    pub target_id: String,
    /// Endorser score snapshot.
    pub endorser_score: f64,
    /// Endorser trace count snapshot.
    pub endorser_traces: i64,
    /// Endorser tier snapshot.
    pub endorser_tier: String,
    /// Applied bonus.
    pub bonus_applied: f64,
    /// Tier multiplier used.
    pub tier_multiplier: f64,
    /// Free-text context.
    pub context: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbEndorsement> for Endorsement {
    type Error = anyhow::Error;

    fn try_from(row: DbEndorsement) -> Result<Self> {
        Ok(Endorsement {
            id: row.id,
            endorser_id: row.endorser_id,
            target_id: row.target_id,
            endorser_score: row.endorser_score,
            endorser_traces: row.endorser_traces as u64,
            endorser_tier: row.endorser_tier.parse::<CertificationTier>()?,
            bonus_applied: row.bonus_applied,
            tier_multiplier: row.tier_multiplier,
            context: row.context,
            created_at: row.created_at,
        })
    }
}

/// Raw `webhooks` row.
#[derive(Debug, sqlx::FromRow)]
pub struct DbWebhook {
    /// Primary key.
    pub id: String,
    /// Owning agent.
    pub agent_id: String,
    /// Delivery URL.
    pub url: String,
    /// HMAC secret.
    pub secret: String,
    /// Subscribed events as JSON.
    pub events: String,
    /// Delivery toggle.
    pub is_active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last successful delivery.
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbWebhook> for Webhook {
    type Error = anyhow::Error;

    fn try_from(row: DbWebhook) -> Result<Self> {
        let events: Vec<WebhookEvent> =
            serde_json::from_str(&row.events).context("webhooks.events is not valid JSON")?;

        Ok(Webhook {
            id: row.id,
            agent_id: row.agent_id,
            url: row.url,
            secret: row.secret,
            events,
            is_active: row.is_active,
            created_at: row.created_at,
            last_triggered_at: row.last_triggered_at,
        })
    }
}
