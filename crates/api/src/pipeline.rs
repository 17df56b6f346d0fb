//! The ledger service: registration, trace intake, endorsements, and
//! decay-aware reads.
//!
//! `submit_trace` is the write pipeline: authenticate, validate, hash,
//! reject duplicates, run the reputation engine, persist transactionally,
//! sign, and fan events out to the dispatcher. All score mutations for
//! one agent run under that agent's lock.

use base64::Engine as _;
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use garl_core::constants::*;
use garl_core::hashing::{compute_trace_hash, mask_summary, TraceHashInput};
use garl_core::{
    hash_api_key, Agent, Certificate, CertificatePayload, CertificationTier, CoreError, Dimensions,
    Endorsement, HistoryEvent, ReputationEvent, Result, SecurityContext, TaskCategory, ToolCall,
    Trace, TraceStatus, Webhook, WebhookEvent,
};
use garl_engine::{
    apply_trace, assess, compose_trust_score, compute_endorsement_bonus, decay_agent,
    reputation::status_observation, Assessment, TraceObservation, UpdateContext,
};
use garl_storage::Storage;

use crate::dispatcher::{EventSender, LedgerEvent};
use crate::locks::AgentLocks;

/// Agent registration request.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    /// Display name (sanitised server-side).
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: String,
    /// Framework label.
    #[serde(default)]
    pub framework: Option<String>,
    /// Primary category.
    #[serde(default)]
    pub category: Option<TaskCategory>,
    /// Sandbox agents are hidden from rankings.
    #[serde(default)]
    pub is_sandbox: bool,
    /// Permissions the agent intends to use.
    #[serde(default)]
    pub permissions_declared: Vec<String>,
}

/// Trace submission request (`POST /verify`).
#[derive(Debug, Clone, Deserialize)]
pub struct TraceSubmitRequest {
    /// Agent the trace belongs to; must match the API key.
    pub agent_id: String,
    /// What the agent did.
    pub task_description: String,
    /// Outcome.
    pub status: TraceStatus,
    /// Wall-clock duration; zero means unreported.
    pub duration_ms: u64,
    /// Category; defaults to the agent's own.
    #[serde(default)]
    pub category: Option<TaskCategory>,
    /// Input summary.
    #[serde(default)]
    pub input_summary: String,
    /// Output summary.
    #[serde(default)]
    pub output_summary: String,
    /// Open-shape metadata.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Producing runtime.
    #[serde(default)]
    pub runtime_env: String,
    /// Tool invocations.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Reported cost.
    #[serde(default)]
    pub cost_usd: Option<f64>,
    /// Reported token count.
    #[serde(default)]
    pub token_count: Option<u64>,
    /// Replace summaries with their SHA-256 before storage.
    #[serde(default)]
    pub pii_mask: bool,
    /// Permissions used during the run.
    #[serde(default)]
    pub permissions_used: Vec<String>,
    /// Security observations from the runtime.
    #[serde(default)]
    pub security_context: Option<SecurityContext>,
}

/// Endorsement request (`POST /endorse`).
#[derive(Debug, Clone, Deserialize)]
pub struct EndorseRequest {
    /// Agent receiving the endorsement.
    pub target_agent_id: String,
    /// Why the endorsement is given.
    #[serde(default)]
    pub context: String,
}

/// Result of a trace submission.
#[derive(Debug, Clone)]
pub struct TraceOutcome {
    /// The persisted trace (original one on duplicates).
    pub trace: Trace,
    /// Dimensional scores after the update.
    pub new_scores: Dimensions,
    /// Composite after the update.
    pub trust_score: f64,
    /// Tier after the update.
    pub certification_tier: CertificationTier,
    /// Whether this was an idempotent replay of an existing trace.
    pub duplicate: bool,
}

/// Result of an endorsement.
#[derive(Debug, Clone, Serialize)]
pub struct EndorseOutcome {
    /// Edge id.
    pub endorsement_id: String,
    /// Endorsing agent.
    pub endorser_id: String,
    /// Endorsed agent.
    pub target_id: String,
    /// Bonus added to the target.
    pub bonus_applied: f64,
    /// Endorser tier at endorsement time.
    pub endorser_tier: CertificationTier,
    /// Tier multiplier used.
    pub tier_multiplier: f64,
    /// Target composite after the bonus.
    pub target_new_trust_score: f64,
    /// Target tier after the bonus.
    pub target_new_tier: CertificationTier,
}

/// The trust verdict served to delegating callers.
#[derive(Debug, Clone, Serialize)]
pub struct TrustVerdict {
    /// Agent id.
    pub agent_id: String,
    /// Display name.
    pub name: String,
    /// DID handle.
    pub sovereign_id: String,
    /// Composite trust score after decay.
    pub trust_score: f64,
    /// All-time success rate.
    pub success_rate: f64,
    /// Total traces.
    pub total_traces: u64,
    /// Whether the agent has >= 10 traces.
    pub verified: bool,
    /// Risk level from the verdict table.
    pub risk_level: garl_core::RiskLevel,
    /// Recommendation from the verdict table.
    pub recommendation: garl_core::Recommendation,
    /// Current tier.
    pub certification_tier: CertificationTier,
    /// Dimensional breakdown.
    pub dimensions: Dimensions,
    /// Most recent anomaly flags (at most three).
    pub anomalies: Vec<garl_core::AnomalyFlag>,
    /// Last trace timestamp.
    pub last_active: Option<chrono::DateTime<chrono::Utc>>,
}

/// The ledger service shared by all request handlers.
#[derive(Clone)]
pub struct Ledger {
    storage: Storage,
    signer: Arc<garl_core::Signer>,
    locks: Arc<AgentLocks>,
    events: EventSender,
}

impl Ledger {
    /// Assemble the service from its collaborators.
    pub fn new(
        storage: Storage,
        signer: Arc<garl_core::Signer>,
        locks: Arc<AgentLocks>,
        events: EventSender,
    ) -> Self {
        Self {
            storage,
            signer,
            locks,
            events,
        }
    }

    /// The underlying storage, for read-only handlers.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// The ledger's public key, hex.
    pub fn public_key_hex(&self) -> &str {
        self.signer.public_key_hex()
    }

    /// Resolve an API key to its (possibly deleted) agent.
    pub async fn authenticate(&self, api_key: &str) -> Result<Agent> {
        let agent = self
            .storage
            .get_agent_by_api_key_hash(&hash_api_key(api_key))
            .await
            .map_err(CoreError::storage)?
            .ok_or(CoreError::Unauthorized)?;
        Ok(agent)
    }

    /// Register a new agent. Returns the agent and the plaintext API key,
    /// which is shown exactly once.
    pub async fn register(&self, req: RegisterRequest) -> Result<(Agent, String)> {
        let name = sanitize_agent_name(&req.name)?;
        if req.description.len() > 500 {
            return Err(CoreError::Validation(
                "description must be at most 500 characters".into(),
            ));
        }

        let agent_id = Uuid::new_v4().to_string();
        let api_key = generate_api_key();
        let now = Utc::now();

        let agent = Agent {
            sovereign_id: garl_core::types::sovereign_id_for(&agent_id),
            agent_id,
            name,
            description: strip_html(&req.description),
            framework: req.framework.unwrap_or_else(|| "custom".to_string()),
            category: req.category.unwrap_or(TaskCategory::Other),
            api_key_hash: hash_api_key(&api_key),
            is_sandbox: req.is_sandbox,
            is_deleted: false,
            dimensions: Dimensions::baseline(),
            emas: Dimensions::baseline(),
            trust_score: BASELINE_SCORE,
            certification_tier: CertificationTier::from_score(BASELINE_SCORE),
            total_traces: 0,
            success_count: 0,
            success_rate: 0.0,
            consecutive_successes: 0,
            avg_duration_ms: 0,
            total_cost_usd: 0.0,
            anomaly_flags: Vec::new(),
            endorsement_score: 0.0,
            endorsement_count: 0,
            permissions_declared: req.permissions_declared,
            last_trace_at: None,
            created_at: now,
            updated_at: now,
        };

        self.storage
            .insert_agent(&agent)
            .await
            .map_err(CoreError::storage)?;

        info!("Registered agent {} ({})", agent.name, agent.agent_id);
        Ok((agent, api_key))
    }

    /// The trace intake pipeline (`POST /verify`).
    pub async fn submit_trace(
        &self,
        api_key: &str,
        mut req: TraceSubmitRequest,
    ) -> Result<TraceOutcome> {
        let agent = self.authenticate(api_key).await?;
        if agent.is_deleted {
            return Err(CoreError::Forbidden("Agent has been deleted".into()));
        }
        if req.agent_id != agent.agent_id {
            return Err(CoreError::Forbidden(
                "API key does not belong to this agent".into(),
            ));
        }

        req.task_description = strip_html(&req.task_description);
        req.input_summary = strip_html(&req.input_summary);
        req.output_summary = strip_html(&req.output_summary);
        validate_trace_request(&req)?;

        let category = req.category.unwrap_or(agent.category);
        let trace_hash = compute_trace_hash(&TraceHashInput {
            agent_id: &req.agent_id,
            task_description: &req.task_description,
            status: req.status,
            duration_ms: req.duration_ms,
            category,
            cost_usd: req.cost_usd,
            token_count: req.token_count,
            input_summary: &req.input_summary,
            output_summary: &req.output_summary,
            runtime_env: &req.runtime_env,
        })?;

        // Everything that mutates this agent runs under its lock.
        let guard = self.locks.lock(&agent.agent_id).await;

        // Idempotent replay: hand back the original certificate, touch
        // nothing, notify nobody.
        if let Some(existing) = self
            .storage
            .get_trace_by_hash(&agent.agent_id, &trace_hash)
            .await
            .map_err(CoreError::storage)?
        {
            let agent = self
                .storage
                .get_agent(&agent.agent_id)
                .await
                .map_err(CoreError::storage)?
                .ok_or(CoreError::NotFound("agent"))?;
            return Ok(TraceOutcome {
                trace: existing,
                new_scores: agent.dimensions,
                trust_score: agent.trust_score,
                certification_tier: agent.certification_tier,
                duplicate: true,
            });
        }

        // Re-read inside the lock so concurrent submissions stack correctly.
        let agent = self
            .storage
            .get_agent(&agent.agent_id)
            .await
            .map_err(CoreError::storage)?
            .ok_or(CoreError::NotFound("agent"))?;

        let recent = self
            .storage
            .recent_statuses(&agent.agent_id, ANOMALY_RATE_WINDOW)
            .await
            .map_err(CoreError::storage)?;
        let ctx = UpdateContext {
            recent_reliability_obs: recent
                .iter()
                .take(CONSISTENCY_WINDOW - 1)
                .map(|s| status_observation(*s))
                .collect(),
            recent_success_rate: if recent.is_empty() {
                None
            } else {
                let successes = recent
                    .iter()
                    .filter(|s| **s == TraceStatus::Success)
                    .count();
                Some(garl_engine::round2(
                    successes as f64 / recent.len() as f64 * 100.0,
                ))
            },
        };

        let observation = TraceObservation {
            status: req.status,
            duration_ms: req.duration_ms,
            category,
            cost_usd: req.cost_usd,
            permissions_used: &req.permissions_used,
            security_context: req.security_context,
        };
        let now = Utc::now();
        let update = apply_trace(&agent, &observation, &ctx, now);

        let (input_summary, output_summary) = if req.pii_mask {
            (
                mask_nonempty(&req.input_summary),
                mask_nonempty(&req.output_summary),
            )
        } else {
            (req.input_summary.clone(), req.output_summary.clone())
        };

        let trace_id = Uuid::new_v4().to_string();
        let certificate = self.sign_trace(
            &trace_id,
            &agent.agent_id,
            req.status,
            update.trust_score,
            &trace_hash,
            now.timestamp(),
        )?;

        let trace = Trace {
            trace_id,
            agent_id: agent.agent_id.clone(),
            task_description: req.task_description.clone(),
            status: req.status,
            duration_ms: req.duration_ms,
            category,
            cost_usd: req.cost_usd,
            token_count: req.token_count,
            tool_calls: req.tool_calls.clone(),
            metadata: req.metadata.clone(),
            input_summary,
            output_summary,
            runtime_env: req.runtime_env.clone(),
            trace_hash,
            certificate,
            trust_delta: update.trust_delta,
            created_at: now,
        };

        let mut updated = agent.clone();
        updated.dimensions = update.dimensions;
        updated.emas = update.emas;
        updated.trust_score = update.trust_score;
        updated.certification_tier = update.certification_tier;
        updated.total_traces = update.total_traces;
        updated.success_count = update.success_count;
        updated.success_rate = update.success_rate;
        updated.consecutive_successes = update.consecutive_successes;
        updated.avg_duration_ms = update.avg_duration_ms;
        updated.total_cost_usd = update.total_cost_usd;
        updated.anomaly_flags = update.anomaly_flags.clone();
        updated.last_trace_at = Some(now);
        updated.updated_at = now;

        let mut history = vec![ReputationEvent {
            agent_id: updated.agent_id.clone(),
            trust_score: updated.trust_score,
            dimensions: updated.dimensions,
            event_type: HistoryEvent::Trace,
            trust_delta: update.trust_delta,
            created_at: now,
        }];
        if !update.new_anomalies.is_empty() {
            history.push(ReputationEvent {
                agent_id: updated.agent_id.clone(),
                trust_score: updated.trust_score,
                dimensions: updated.dimensions,
                event_type: HistoryEvent::Anomaly,
                trust_delta: 0.0,
                created_at: now,
            });
        }

        // Commit on a detached task: if the client disconnects and this
        // handler future is dropped, the transaction still runs to
        // completion. The agent lock moves into the task and is released
        // only once the commit has finished.
        let commit = {
            let ledger = self.clone();
            let agent = agent.clone();
            let updated = updated.clone();
            let trace = trace.clone();
            let update = update.clone();
            tokio::spawn(async move {
                let _guard = guard;
                ledger
                    .storage
                    .record_trace(&trace, &updated, &history)
                    .await?;
                ledger.emit_trace_events(&agent, &updated, &trace, &update);
                Ok::<(), anyhow::Error>(())
            })
        };
        commit
            .await
            .map_err(CoreError::storage)?
            .map_err(CoreError::storage)?;

        Ok(TraceOutcome {
            trace,
            new_scores: updated.dimensions,
            trust_score: updated.trust_score,
            certification_tier: updated.certification_tier,
            duplicate: false,
        })
    }

    fn sign_trace(
        &self,
        trace_id: &str,
        agent_id: &str,
        status: TraceStatus,
        trust_score_after: f64,
        trace_hash: &str,
        created: i64,
    ) -> Result<Certificate> {
        self.signer.sign_at(
            CertificatePayload {
                trace_id: trace_id.to_string(),
                agent_id: agent_id.to_string(),
                status,
                trust_score_after,
                trace_hash: trace_hash.to_string(),
                created,
            },
            created,
        )
    }

    /// Fan out the events a successful submission produces. Enqueue
    /// failures are swallowed by the sender; they never fail the intake.
    fn emit_trace_events(
        &self,
        before: &Agent,
        after: &Agent,
        trace: &Trace,
        update: &garl_engine::ReputationUpdate,
    ) {
        let timestamp = trace.created_at;

        self.events.enqueue(LedgerEvent {
            event: WebhookEvent::TraceRecorded,
            agent_id: after.agent_id.clone(),
            timestamp,
            data: serde_json::json!({
                "trace_id": trace.trace_id,
                "trace_hash": trace.trace_hash,
                "status": trace.status,
                "trust_score": after.trust_score,
                "certification_tier": after.certification_tier,
                "dimensions": after.dimensions,
            }),
        });

        if update.trust_delta.abs() >= SCORE_CHANGE_EVENT_THRESHOLD {
            self.events.enqueue(LedgerEvent {
                event: WebhookEvent::ScoreChange,
                agent_id: after.agent_id.clone(),
                timestamp,
                data: serde_json::json!({
                    "trace_id": trace.trace_id,
                    "score_before": before.trust_score,
                    "score_after": after.trust_score,
                    "score_delta": update.trust_delta,
                    "certification_tier": after.certification_tier,
                }),
            });
        }

        if MILESTONES.contains(&after.total_traces) {
            self.events.enqueue(LedgerEvent {
                event: WebhookEvent::Milestone,
                agent_id: after.agent_id.clone(),
                timestamp,
                data: serde_json::json!({
                    "milestone": after.total_traces,
                    "trust_score": after.trust_score,
                    "certification_tier": after.certification_tier,
                }),
            });
        }

        if update.tier_changed {
            self.events.enqueue(LedgerEvent {
                event: WebhookEvent::TierChange,
                agent_id: after.agent_id.clone(),
                timestamp,
                data: serde_json::json!({
                    "trace_id": trace.trace_id,
                    "tier_before": before.certification_tier,
                    "tier_after": after.certification_tier,
                    "trust_score": after.trust_score,
                }),
            });
        }

        for flag in &update.new_anomalies {
            self.events.enqueue(LedgerEvent {
                event: WebhookEvent::Anomaly,
                agent_id: after.agent_id.clone(),
                timestamp,
                data: serde_json::json!({
                    "trace_id": trace.trace_id,
                    "anomaly": flag,
                    "trust_score": after.trust_score,
                }),
            });
        }
    }

    /// Create an endorsement edge (`POST /endorse`).
    pub async fn endorse(&self, api_key: &str, req: EndorseRequest) -> Result<EndorseOutcome> {
        let endorser = self.authenticate(api_key).await?;
        if endorser.is_deleted {
            return Err(CoreError::Forbidden("Agent has been deleted".into()));
        }
        if endorser.agent_id == req.target_agent_id {
            return Err(CoreError::Validation(
                "Self-endorsement is not allowed".into(),
            ));
        }
        if req.context.len() > 500 {
            return Err(CoreError::Validation(
                "context must be at most 500 characters".into(),
            ));
        }

        // Target lock: the endorsement mutates the target's score.
        let _guard = self.locks.lock(&req.target_agent_id).await;

        let target = self
            .storage
            .get_agent(&req.target_agent_id)
            .await
            .map_err(CoreError::storage)?
            .filter(|a| !a.is_deleted)
            .ok_or(CoreError::NotFound("agent"))?;

        if self
            .storage
            .endorsement_exists(&endorser.agent_id, &target.agent_id)
            .await
            .map_err(CoreError::storage)?
        {
            return Err(CoreError::Duplicate(
                "Endorsement already exists between these agents".into(),
            ));
        }

        let bonus = compute_endorsement_bonus(
            endorser.trust_score,
            endorser.total_traces,
            endorser.certification_tier,
        );
        let now = Utc::now();

        let endorsement = Endorsement {
            id: Uuid::new_v4().to_string(),
            endorser_id: endorser.agent_id.clone(),
            target_id: target.agent_id.clone(),
            endorser_score: endorser.trust_score,
            endorser_traces: endorser.total_traces,
            endorser_tier: endorser.certification_tier,
            bonus_applied: bonus,
            tier_multiplier: endorser.certification_tier.endorsement_multiplier(),
            context: strip_html(&req.context),
            created_at: now,
        };

        let mut updated = target.clone();
        updated.endorsement_score =
            ((updated.endorsement_score + bonus) * 10_000.0).round() / 10_000.0;
        updated.endorsement_count += 1;
        updated.trust_score = compose_trust_score(&updated.dimensions, updated.endorsement_score);
        updated.certification_tier = CertificationTier::from_score(updated.trust_score);
        updated.updated_at = now;

        let history = ReputationEvent {
            agent_id: updated.agent_id.clone(),
            trust_score: updated.trust_score,
            dimensions: updated.dimensions,
            event_type: HistoryEvent::Endorsement,
            trust_delta: garl_engine::round2(updated.trust_score - target.trust_score),
            created_at: now,
        };

        self.storage
            .record_endorsement(&endorsement, &updated, &history)
            .await
            .map_err(CoreError::storage)?;

        Ok(EndorseOutcome {
            endorsement_id: endorsement.id,
            endorser_id: endorsement.endorser_id,
            target_id: endorsement.target_id,
            bonus_applied: bonus,
            endorser_tier: endorsement.endorser_tier,
            tier_multiplier: endorsement.tier_multiplier,
            target_new_trust_score: updated.trust_score,
            target_new_tier: updated.certification_tier,
        })
    }

    /// Fetch an agent, lazily applying (and persisting) inactivity decay.
    ///
    /// Returns soft-deleted agents as `None`.
    pub async fn get_agent_decayed(&self, agent_id: &str) -> Result<Option<Agent>> {
        let Some(agent) = self
            .storage
            .get_agent(agent_id)
            .await
            .map_err(CoreError::storage)?
        else {
            return Ok(None);
        };
        if agent.is_deleted {
            return Ok(None);
        }

        let Some(last_trace_at) = agent.last_trace_at else {
            return Ok(Some(agent));
        };
        let hours_dormant = (Utc::now() - last_trace_at).num_seconds() as f64 / 3600.0;
        if decay_agent(&agent, hours_dormant).is_none() {
            return Ok(Some(agent));
        }

        // Re-check under the agent's lock so only one reader persists.
        let _guard = self.locks.lock(agent_id).await;
        let mut agent = self
            .storage
            .get_agent(agent_id)
            .await
            .map_err(CoreError::storage)?
            .filter(|a| !a.is_deleted)
            .ok_or(CoreError::NotFound("agent"))?;

        let hours_dormant = agent
            .last_trace_at
            .map(|t| (Utc::now() - t).num_seconds() as f64 / 3600.0)
            .unwrap_or(0.0);
        let Some(decayed) = decay_agent(&agent, hours_dormant) else {
            return Ok(Some(agent));
        };

        let now = Utc::now();
        agent.dimensions = decayed.dimensions;
        agent.trust_score = decayed.trust_score;
        agent.certification_tier = decayed.certification_tier;
        agent.updated_at = now;

        self.storage
            .update_agent_state(&agent)
            .await
            .map_err(CoreError::storage)?;
        self.storage
            .insert_history(&ReputationEvent {
                agent_id: agent.agent_id.clone(),
                trust_score: agent.trust_score,
                dimensions: agent.dimensions,
                event_type: HistoryEvent::Decay,
                trust_delta: decayed.trust_delta,
                created_at: now,
            })
            .await
            .map_err(CoreError::storage)?;

        Ok(Some(agent))
    }

    /// The read-side trust verdict (`GET /trust/verify`).
    pub async fn verdict(&self, agent_id: &str) -> Result<Option<TrustVerdict>> {
        let Some(agent) = self.get_agent_decayed(agent_id).await? else {
            return Ok(None);
        };

        let Assessment {
            recommendation,
            risk_level,
        } = assess(
            agent.trust_score,
            agent.is_verified(),
            agent.has_active_anomaly(),
        );

        let anomalies = agent
            .anomaly_flags
            .iter()
            .rev()
            .take(3)
            .cloned()
            .collect::<Vec<_>>();

        Ok(Some(TrustVerdict {
            agent_id: agent.agent_id.clone(),
            name: agent.name.clone(),
            sovereign_id: agent.sovereign_id.clone(),
            trust_score: agent.trust_score,
            success_rate: agent.success_rate,
            total_traces: agent.total_traces,
            verified: agent.is_verified(),
            risk_level,
            recommendation,
            certification_tier: agent.certification_tier,
            dimensions: agent.dimensions,
            anomalies,
            last_active: agent.last_trace_at,
        }))
    }

    /// Smart routing (`GET /trust/route`): best agents for a category at
    /// or above a tier, critical-anomaly carriers excluded.
    pub async fn route(
        &self,
        category: TaskCategory,
        min_tier: CertificationTier,
        limit: u32,
    ) -> Result<Vec<Agent>> {
        // Over-fetch so post-filtering critical anomalies still fills the page.
        let candidates = self
            .storage
            .route_candidates(category, min_tier, limit.saturating_mul(2).max(limit))
            .await
            .map_err(CoreError::storage)?;

        Ok(candidates
            .into_iter()
            .filter(|a| !a.has_critical_anomaly())
            .take(limit as usize)
            .collect())
    }

    /// Soft-delete an agent (`DELETE /agents/{id}`).
    pub async fn soft_delete(&self, api_key: &str, agent_id: &str) -> Result<()> {
        let agent = self.authenticate(api_key).await?;
        if agent.agent_id != agent_id {
            return Err(CoreError::Forbidden(
                "API key does not belong to this agent".into(),
            ));
        }
        self.storage
            .soft_delete_agent(agent_id, Utc::now())
            .await
            .map_err(CoreError::storage)?;
        info!("Soft-deleted agent {}", agent_id);
        Ok(())
    }

    /// Anonymize an agent (`POST /agents/{id}/anonymize`): PII is removed,
    /// trace integrity and score history stay intact.
    pub async fn anonymize(&self, api_key: &str, agent_id: &str) -> Result<String> {
        let agent = self.authenticate(api_key).await?;
        if agent.agent_id != agent_id {
            return Err(CoreError::Forbidden(
                "API key does not belong to this agent".into(),
            ));
        }
        let anon_name = format!("anon_{}", &garl_core::sha256_hex(agent_id.as_bytes())[..12]);
        self.storage
            .anonymize_agent(agent_id, &anon_name, Utc::now())
            .await
            .map_err(CoreError::storage)?;
        info!("Anonymized agent {}", agent_id);
        Ok(anon_name)
    }

    /// Create a webhook subscription for an owned agent.
    pub async fn create_webhook(
        &self,
        api_key: &str,
        agent_id: &str,
        url: String,
        events: Option<Vec<WebhookEvent>>,
    ) -> Result<Webhook> {
        let agent = self.authenticate(api_key).await?;
        if agent.agent_id != agent_id {
            return Err(CoreError::Forbidden(
                "API key does not belong to this agent".into(),
            ));
        }
        if url.len() > 500 || !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(CoreError::Validation(
                "url must be an http(s) URL of at most 500 characters".into(),
            ));
        }

        let webhook = Webhook {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            url,
            secret: generate_webhook_secret(),
            events: events.unwrap_or_else(|| WebhookEvent::default_set().to_vec()),
            is_active: true,
            created_at: Utc::now(),
            last_triggered_at: None,
        };
        self.storage
            .insert_webhook(&webhook)
            .await
            .map_err(CoreError::storage)?;
        Ok(webhook)
    }
}

/// `garl_` + 32 url-safe random bytes; shown once at registration.
fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!(
        "garl_{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    )
}

/// 24 url-safe random bytes; returned once at webhook creation.
fn generate_webhook_secret() -> String {
    let mut bytes = [0u8; 24];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Strip HTML tags from a free-text field.
pub fn strip_html(text: &str) -> String {
    static TAG: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let tag = TAG.get_or_init(|| regex::Regex::new(r"<[^>]+>").expect("static pattern"));
    tag.replace_all(text, "").trim().to_string()
}

/// Validate and sanitise an agent name.
fn sanitize_agent_name(name: &str) -> Result<String> {
    static NAME: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let pattern = NAME.get_or_init(|| regex::Regex::new(r"^[\w\s.-]+$").expect("static pattern"));

    let mut clean = strip_html(name);
    if clean.is_empty() {
        return Err(CoreError::Validation(
            "Agent name must not be empty or contain only HTML tags".into(),
        ));
    }
    if clean.chars().count() > MAX_AGENT_NAME_LEN {
        clean = clean.chars().take(MAX_AGENT_NAME_LEN).collect();
    }
    if !pattern.is_match(&clean) {
        return Err(CoreError::Validation(
            "Agent name may only contain letters, numbers, spaces, hyphens, underscores, and dots"
                .into(),
        ));
    }
    Ok(clean)
}

fn mask_nonempty(summary: &str) -> String {
    if summary.is_empty() {
        String::new()
    } else {
        mask_summary(summary)
    }
}

fn validate_trace_request(req: &TraceSubmitRequest) -> Result<()> {
    if req.task_description.is_empty() {
        return Err(CoreError::Validation(
            "task_description must not be empty".into(),
        ));
    }
    if req.task_description.len() > MAX_TASK_DESCRIPTION_LEN {
        return Err(CoreError::Validation(format!(
            "task_description must be at most {MAX_TASK_DESCRIPTION_LEN} characters"
        )));
    }
    if req.input_summary.len() > MAX_SUMMARY_LEN || req.output_summary.len() > MAX_SUMMARY_LEN {
        return Err(CoreError::Validation(format!(
            "summaries must be at most {MAX_SUMMARY_LEN} characters"
        )));
    }
    if req.runtime_env.len() > 100 {
        return Err(CoreError::Validation(
            "runtime_env must be at most 100 characters".into(),
        ));
    }
    if let Some(cost) = req.cost_usd {
        if !cost.is_finite() || cost < 0.0 {
            return Err(CoreError::Validation(
                "cost_usd must be a non-negative number".into(),
            ));
        }
    }
    for open_attr in [
        serde_json::to_vec(&req.tool_calls).ok(),
        req.metadata
            .as_ref()
            .and_then(|m| serde_json::to_vec(m).ok()),
    ]
    .into_iter()
    .flatten()
    {
        if open_attr.len() > MAX_OPEN_ATTR_BYTES {
            return Err(CoreError::Validation(format!(
                "tool_calls and metadata must serialize to at most {MAX_OPEN_ATTR_BYTES} bytes"
            )));
        }
    }
    Ok(())
}
