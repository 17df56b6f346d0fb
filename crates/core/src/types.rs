//! Core types for the GARL reputation ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{BASELINE_SCORE, DID_PREFIX};
use crate::error::CoreError;

/// Outcome of a single execution trace.
///
/// This is a closed set; free-form status strings are rejected at the
/// boundary during deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    /// Task completed as requested.
    Success,
    /// Task failed.
    Failure,
    /// Task completed with caveats.
    Partial,
}

impl TraceStatus {
    /// Canonical lowercase string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::Success => "success",
            TraceStatus::Failure => "failure",
            TraceStatus::Partial => "partial",
        }
    }
}

impl fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraceStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(TraceStatus::Success),
            "failure" => Ok(TraceStatus::Failure),
            "partial" => Ok(TraceStatus::Partial),
            other => Err(CoreError::Validation(format!(
                "Invalid trace status: {other:?} (expected success, failure, or partial)"
            ))),
        }
    }
}

/// Task category an agent operates in. Determines speed/cost benchmarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    /// Software development tasks.
    Coding,
    /// Research and analysis tasks.
    Research,
    /// Sales and outreach tasks.
    Sales,
    /// Data processing tasks.
    Data,
    /// Workflow automation tasks.
    Automation,
    /// Anything else.
    Other,
}

impl TaskCategory {
    /// Canonical lowercase string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::Coding => "coding",
            TaskCategory::Research => "research",
            TaskCategory::Sales => "sales",
            TaskCategory::Data => "data",
            TaskCategory::Automation => "automation",
            TaskCategory::Other => "other",
        }
    }

    /// Category speed benchmark in milliseconds.
    pub const fn speed_benchmark_ms(&self) -> u64 {
        match self {
            TaskCategory::Coding => 10_000,
            TaskCategory::Research => 15_000,
            TaskCategory::Sales => 5_000,
            TaskCategory::Data => 12_000,
            TaskCategory::Automation => 8_000,
            TaskCategory::Other => 10_000,
        }
    }

    /// Category cost benchmark in USD.
    pub const fn cost_benchmark_usd(&self) -> f64 {
        match self {
            TaskCategory::Coding => 0.05,
            TaskCategory::Research => 0.08,
            TaskCategory::Sales => 0.03,
            TaskCategory::Data => 0.06,
            TaskCategory::Automation => 0.04,
            TaskCategory::Other => 0.05,
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskCategory {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coding" => Ok(TaskCategory::Coding),
            "research" => Ok(TaskCategory::Research),
            "sales" => Ok(TaskCategory::Sales),
            "data" => Ok(TaskCategory::Data),
            "automation" => Ok(TaskCategory::Automation),
            "other" => Ok(TaskCategory::Other),
            other => Err(CoreError::Validation(format!(
                "Invalid category: {other:?}"
            ))),
        }
    }
}

/// Certification tier: a coarse bucket over the composite trust score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificationTier {
    /// Composite below 40.
    Bronze,
    /// Composite in [40, 70).
    Silver,
    /// Composite in [70, 90).
    Gold,
    /// Composite 90 and above.
    Enterprise,
}

impl CertificationTier {
    /// Canonical lowercase string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CertificationTier::Bronze => "bronze",
            CertificationTier::Silver => "silver",
            CertificationTier::Gold => "gold",
            CertificationTier::Enterprise => "enterprise",
        }
    }

    /// Pure function of the composite trust score.
    pub fn from_score(trust_score: f64) -> Self {
        if trust_score >= 90.0 {
            CertificationTier::Enterprise
        } else if trust_score >= 70.0 {
            CertificationTier::Gold
        } else if trust_score >= 40.0 {
            CertificationTier::Silver
        } else {
            CertificationTier::Bronze
        }
    }

    /// Endorsement weight of this tier.
    pub const fn endorsement_multiplier(&self) -> f64 {
        match self {
            CertificationTier::Bronze => 0.5,
            CertificationTier::Silver => 1.0,
            CertificationTier::Gold => 1.5,
            CertificationTier::Enterprise => 2.0,
        }
    }
}

impl fmt::Display for CertificationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertificationTier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bronze" => Ok(CertificationTier::Bronze),
            "silver" => Ok(CertificationTier::Silver),
            "gold" => Ok(CertificationTier::Gold),
            "enterprise" => Ok(CertificationTier::Enterprise),
            other => Err(CoreError::Validation(format!("Invalid tier: {other:?}"))),
        }
    }
}

/// Risk level attached to a trust verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Delegation is safe.
    Low,
    /// Delegation needs monitoring.
    Medium,
    /// Delegation is risky.
    High,
    /// Delegation should not happen.
    Critical,
}

impl RiskLevel {
    /// Canonical lowercase string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Recommendation attached to a trust verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// Score >= 75, verified, no active anomaly.
    Trusted,
    /// Score >= 60 and verified.
    TrustedWithMonitoring,
    /// Score >= 50.
    ProceedWithMonitoring,
    /// Score >= 25.
    Caution,
    /// Everything else.
    DoNotDelegate,
}

impl Recommendation {
    /// Canonical lowercase string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Trusted => "trusted",
            Recommendation::TrustedWithMonitoring => "trusted_with_monitoring",
            Recommendation::ProceedWithMonitoring => "proceed_with_monitoring",
            Recommendation::Caution => "caution",
            Recommendation::DoNotDelegate => "do_not_delegate",
        }
    }
}

/// Webhook event kinds a subscriber can opt into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    /// Fires on every accepted trace.
    TraceRecorded,
    /// Fires when the composite moves by >= 2 points.
    ScoreChange,
    /// Fires at fixed total-trace counts.
    Milestone,
    /// Fires per newly detected anomaly flag.
    Anomaly,
    /// Fires on certification tier transitions.
    TierChange,
}

impl WebhookEvent {
    /// Canonical lowercase string form (also the `X-Garl-Event` value).
    pub const fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::TraceRecorded => "trace_recorded",
            WebhookEvent::ScoreChange => "score_change",
            WebhookEvent::Milestone => "milestone",
            WebhookEvent::Anomaly => "anomaly",
            WebhookEvent::TierChange => "tier_change",
        }
    }

    /// Default subscription set for new webhooks.
    pub const fn default_set() -> [WebhookEvent; 4] {
        [
            WebhookEvent::TraceRecorded,
            WebhookEvent::ScoreChange,
            WebhookEvent::Milestone,
            WebhookEvent::Anomaly,
        ]
    }
}

impl FromStr for WebhookEvent {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trace_recorded" => Ok(WebhookEvent::TraceRecorded),
            "score_change" => Ok(WebhookEvent::ScoreChange),
            "milestone" => Ok(WebhookEvent::Milestone),
            "anomaly" => Ok(WebhookEvent::Anomaly),
            "tier_change" => Ok(WebhookEvent::TierChange),
            other => Err(CoreError::Validation(format!(
                "Invalid webhook event: {other:?}"
            ))),
        }
    }
}

/// Event kinds recorded in `reputation_history`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEvent {
    /// Score moved by a trace submission.
    Trace,
    /// Score moved by an endorsement bonus.
    Endorsement,
    /// Score moved by inactivity decay.
    Decay,
    /// An anomaly flag was attached.
    Anomaly,
}

impl HistoryEvent {
    /// Canonical lowercase string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            HistoryEvent::Trace => "trace",
            HistoryEvent::Endorsement => "endorsement",
            HistoryEvent::Decay => "decay",
            HistoryEvent::Anomaly => "anomaly",
        }
    }
}

impl FromStr for HistoryEvent {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trace" => Ok(HistoryEvent::Trace),
            "endorsement" => Ok(HistoryEvent::Endorsement),
            "decay" => Ok(HistoryEvent::Decay),
            "anomaly" => Ok(HistoryEvent::Anomaly),
            other => Err(CoreError::Validation(format!(
                "Invalid history event: {other:?}"
            ))),
        }
    }
}

/// Statistically unusual behaviour detected on a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    /// Failure from an agent with a >= 90% recent success rate.
    UnexpectedFailure,
    /// Duration more than 5x the agent's average.
    DurationSpike,
    /// Cost more than 10x the agent's average.
    CostSpike,
}

impl AnomalyType {
    /// Canonical lowercase string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::UnexpectedFailure => "unexpected_failure",
            AnomalyType::DurationSpike => "duration_spike",
            AnomalyType::CostSpike => "cost_spike",
        }
    }
}

/// Severity of an anomaly flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    /// Auto-archives after 50 consecutive clean traces.
    Warning,
    /// Never auto-clears.
    Critical,
}

/// An anomaly observation attached to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    /// What kind of anomaly was observed.
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    /// How severe it is.
    pub severity: AnomalySeverity,
    /// Human-readable detail.
    pub message: String,
    /// Whether the flag has been archived.
    #[serde(default)]
    pub archived: bool,
    /// When the anomaly was detected.
    pub detected_at: DateTime<Utc>,
}

impl AnomalyFlag {
    /// Whether this flag still counts against the agent.
    pub fn is_active(&self) -> bool {
        !self.archived
    }
}

/// A tool invocation recorded inside a trace. Open-shape beyond these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name.
    pub name: String,
    /// Tool call duration, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Security observations a runtime may attach to a trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    /// A prompt-injection attempt was seen during the run.
    #[serde(default)]
    pub prompt_injection_detected: bool,
    /// The run risked leaking data outside its boundary.
    #[serde(default)]
    pub data_leak_risk: bool,
    /// The run executed inside a sandbox.
    #[serde(default)]
    pub sandboxed: bool,
}

impl SecurityContext {
    /// Number of security events this context flags.
    pub fn event_count(&self) -> u32 {
        u32::from(self.prompt_injection_detected) + u32::from(self.data_leak_risk)
    }
}

/// The five dimensional scores of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Success/failure behaviour with streak weighting.
    pub reliability: f64,
    /// Permission discipline and incident history.
    pub security: f64,
    /// Duration relative to the category benchmark.
    pub speed: f64,
    /// Cost relative to the category benchmark.
    pub cost_efficiency: f64,
    /// Variance of recent outcomes.
    pub consistency: f64,
}

impl Dimensions {
    /// All dimensions at the baseline (new agent).
    pub const fn baseline() -> Self {
        Dimensions {
            reliability: BASELINE_SCORE,
            security: BASELINE_SCORE,
            speed: BASELINE_SCORE,
            cost_efficiency: BASELINE_SCORE,
            consistency: BASELINE_SCORE,
        }
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Dimensions::baseline()
    }
}

/// Full agent state as held by the ledger.
///
/// Mutated only by the reputation engine in response to traces,
/// endorsements, and decay; the identity fields are write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Globally unique identifier (UUID v4).
    pub agent_id: String,
    /// `did:garl:<agent_id>`.
    pub sovereign_id: String,
    /// Display name.
    pub name: String,
    /// Optional free-text description.
    #[serde(default)]
    pub description: String,
    /// Framework the agent runs on (e.g. `langchain`).
    #[serde(default)]
    pub framework: String,
    /// Primary task category.
    pub category: TaskCategory,
    /// SHA-256 hex of the agent's API key. Never serialized outward.
    #[serde(skip_serializing, default)]
    pub api_key_hash: String,
    /// Sandbox agents are hidden from rankings and aggregates.
    #[serde(default)]
    pub is_sandbox: bool,
    /// Soft-deletion marker; the row is never removed.
    #[serde(default)]
    pub is_deleted: bool,

    /// Current dimensional scores (post-EMA).
    pub dimensions: Dimensions,
    /// EMA accumulators behind the dimensional scores.
    pub emas: Dimensions,
    /// Weighted composite of the five dimensions, clamped to [0, 100].
    pub trust_score: f64,
    /// Tier derived from the composite.
    pub certification_tier: CertificationTier,
    /// Total traces ever accepted.
    pub total_traces: u64,
    /// Total successful traces.
    pub success_count: u64,
    /// All-time success rate in percent.
    pub success_rate: f64,
    /// Current success streak; reset by any failure.
    pub consecutive_successes: u64,
    /// Running average trace duration.
    pub avg_duration_ms: u64,
    /// Cumulative reported cost.
    pub total_cost_usd: f64,
    /// Anomaly flags, active first.
    #[serde(default)]
    pub anomaly_flags: Vec<AnomalyFlag>,
    /// Cumulative endorsement bonus received.
    pub endorsement_score: f64,
    /// Number of endorsements received.
    pub endorsement_count: u64,
    /// Permissions the agent declared at registration.
    #[serde(default)]
    pub permissions_declared: Vec<String>,
    /// When the last trace was accepted.
    pub last_trace_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Whether the agent has any active (non-archived) anomaly flag.
    pub fn has_active_anomaly(&self) -> bool {
        self.anomaly_flags.iter().any(AnomalyFlag::is_active)
    }

    /// Whether the agent carries a critical anomaly flag.
    pub fn has_critical_anomaly(&self) -> bool {
        self.anomaly_flags
            .iter()
            .any(|f| f.severity == AnomalySeverity::Critical)
    }

    /// Whether the agent has enough history to count as verified.
    pub fn is_verified(&self) -> bool {
        self.total_traces >= crate::constants::VERIFIED_TRACE_COUNT
    }
}

/// Build the sovereign identifier for an agent id.
pub fn sovereign_id_for(agent_id: &str) -> String {
    format!("{DID_PREFIX}{agent_id}")
}

/// An execution trace as persisted by the ledger. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Server-assigned trace id (UUID v4).
    pub trace_id: String,
    /// Owning agent.
    pub agent_id: String,
    /// What the agent did.
    pub task_description: String,
    /// Outcome.
    pub status: TraceStatus,
    /// Wall-clock duration. Zero means unreported.
    pub duration_ms: u64,
    /// Category the task ran in.
    pub category: TaskCategory,
    /// Reported cost, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Reported token count, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
    /// Tool invocations during the run.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Open-shape metadata attached by the submitter (size-capped).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Input summary; replaced by its SHA-256 hex when masking is requested.
    #[serde(default)]
    pub input_summary: String,
    /// Output summary; replaced by its SHA-256 hex when masking is requested.
    #[serde(default)]
    pub output_summary: String,
    /// Runtime the trace was produced by.
    #[serde(default)]
    pub runtime_env: String,
    /// SHA-256 hex of the canonical client payload.
    pub trace_hash: String,
    /// Signed execution certificate.
    pub certificate: crate::signing::Certificate,
    /// `trust_score_after - trust_score_before`.
    pub trust_delta: f64,
    /// When the ledger accepted the trace.
    pub created_at: DateTime<Utc>,
}

/// A directed, immutable endorsement edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endorsement {
    /// Edge id (UUID v4).
    pub id: String,
    /// Agent giving the endorsement.
    pub endorser_id: String,
    /// Agent receiving it.
    pub target_id: String,
    /// Endorser trust score at endorsement time.
    pub endorser_score: f64,
    /// Endorser trace count at endorsement time.
    pub endorser_traces: u64,
    /// Endorser tier at endorsement time.
    pub endorser_tier: CertificationTier,
    /// Bonus actually added to the target.
    pub bonus_applied: f64,
    /// Tier multiplier that fed the bonus.
    pub tier_multiplier: f64,
    /// Why the endorsement was given.
    #[serde(default)]
    pub context: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A webhook subscription owned by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    /// Subscription id (UUID v4).
    pub id: String,
    /// Owning agent.
    pub agent_id: String,
    /// Delivery target.
    pub url: String,
    /// HMAC secret. Returned once at creation, never listed afterwards.
    #[serde(skip_serializing, default)]
    pub secret: String,
    /// Events this subscription receives.
    pub events: Vec<WebhookEvent>,
    /// Whether deliveries are currently enabled.
    pub is_active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last successful delivery, if any.
    pub last_triggered_at: Option<DateTime<Utc>>,
}

/// One row of the append-only reputation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationEvent {
    /// Agent the event belongs to.
    pub agent_id: String,
    /// Composite after the event.
    pub trust_score: f64,
    /// Dimensional scores after the event.
    pub dimensions: Dimensions,
    /// What moved the score.
    pub event_type: HistoryEvent,
    /// Signed change applied to the composite.
    pub trust_delta: f64,
    /// When the event happened.
    pub created_at: DateTime<Utc>,
}
