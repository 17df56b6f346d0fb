//! HTTP surface of the GARL reputation ledger.
//!
//! Routing, API-key extraction, rate-limit enforcement, and the JSON
//! error contract live here; business rules live in [`crate::pipeline`].

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info};

use garl_core::constants::{MAX_BATCH_TRACES, VERIFIED_TRACE_COUNT};
use garl_core::{
    verify_certificate, Agent, AnomalyFlag, Certificate, CertificationTier, CoreError, Dimensions,
    TaskCategory, Trace, Webhook, WebhookEvent,
};
use garl_engine::{decay_agent, project_decay, DecayProjection};
use garl_storage::Storage;

use crate::config::{RuntimeConfig, DEFAULT_EVENT_QUEUE_CAPACITY};
use crate::dispatcher::spawn_dispatcher;
use crate::locks::AgentLocks;
use crate::pipeline::{
    EndorseRequest, Ledger, RegisterRequest, TraceOutcome, TraceSubmitRequest,
};
use crate::rate_limit::{RateLimiter, RateTier};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// The ledger service.
    pub ledger: Ledger,
    /// Write-path rate limiter.
    pub rate_limiter: Arc<RateLimiter>,
    /// Whether compliance reads require an API key.
    pub read_auth_enabled: bool,
}

// ---------------------------------------------------------------------------
// Error contract
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorInfo,
}

#[derive(Serialize)]
struct ErrorInfo {
    code: &'static str,
    message: String,
}

/// Wire-level error: stable code string + human-readable message.
pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match &err {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Unauthorized => StatusCode::UNAUTHORIZED,
            CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Duplicate(_) | CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            CoreError::Config(_) | CoreError::Storage(_) | CoreError::Dispatch(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        // Internal detail never crosses the boundary.
        let message = match &err {
            CoreError::Storage(inner) => {
                error!("Storage failure: {:#}", inner);
                "Transient storage failure".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(ErrorBody {
            error: ErrorInfo {
                code: err.code(),
                message,
            },
        });

        if let CoreError::RateLimited {
            limit,
            retry_after_secs,
            ..
        } = &err
        {
            let mut response = (status, body).into_response();
            let headers = response.headers_mut();
            headers.insert("Retry-After", header_num(*retry_after_secs));
            headers.insert("X-RateLimit-Limit", header_num(*limit as u64));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
            return response;
        }

        (status, body).into_response()
    }
}

fn header_num(value: u64) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).expect("digits are valid header bytes")
}

fn validation(msg: impl Into<String>) -> ApiError {
    ApiError(CoreError::Validation(msg.into()))
}

fn not_found(what: &'static str) -> ApiError {
    ApiError(CoreError::NotFound(what))
}

fn storage_err(err: anyhow::Error) -> ApiError {
    ApiError(CoreError::Storage(err))
}

// ---------------------------------------------------------------------------
// Request plumbing
// ---------------------------------------------------------------------------

fn require_api_key(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .ok_or(ApiError(CoreError::Unauthorized))
}

/// Client address for registration rate limiting, honoring proxy headers.
fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("cf-connecting-ip")
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rate-limit key for authenticated writes: a prefix of the API key.
fn api_key_bucket(api_key: &str) -> &str {
    &api_key[..api_key.len().min(16)]
}

// ---------------------------------------------------------------------------
// Server lifecycle
// ---------------------------------------------------------------------------

async fn build_state(config: &RuntimeConfig) -> anyhow::Result<AppState> {
    let storage = Storage::new(&config.database_url, None).await?;
    storage.run_migrations().await?;

    let signer = Arc::new(config.build_signer().map_err(|e| anyhow::anyhow!(e))?);
    let events = spawn_dispatcher(storage.clone(), DEFAULT_EVENT_QUEUE_CAPACITY, 2);
    let ledger = Ledger::new(storage, signer, Arc::new(AgentLocks::new()), events);

    Ok(AppState {
        ledger,
        rate_limiter: Arc::new(RateLimiter::new()),
        read_auth_enabled: config.read_auth_enabled,
    })
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

fn router_for_state(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/agents", post(register_agent))
        .route("/agents/auto-register", post(auto_register_agent))
        .route("/agents/{id}", get(read_agent).delete(delete_agent))
        .route("/agents/{id}/detail", get(read_agent_detail))
        .route("/agents/{id}/history", get(read_agent_history))
        .route("/agents/{id}/traces", get(read_agent_traces))
        .route("/agents/{id}/card", get(read_agent_card))
        .route("/agents/{id}/compliance", get(read_compliance))
        .route("/agents/{id}/anonymize", post(anonymize_agent))
        .route("/verify", post(submit_trace))
        .route("/verify/batch", post(submit_batch))
        .route("/verify/check", post(check_certificate))
        .route("/trust/verify", get(trust_verify))
        .route("/trust/route", get(trust_route))
        .route("/leaderboard", get(leaderboard))
        .route("/search", get(search))
        .route("/compare", get(compare))
        .route("/feed", get(feed))
        .route("/stats", get(stats))
        .route("/badge/{id}", get(badge_data))
        .route("/badge/svg/{id}", get(badge_svg))
        .route("/endorse", post(endorse))
        .route("/endorsements/{id}", get(read_endorsements))
        .route("/webhooks", post(create_webhook))
        .route("/webhooks/{agent_id}", get(list_webhooks))
        .route(
            "/webhooks/{agent_id}/{webhook_id}",
            patch(update_webhook).delete(delete_webhook),
        )
        .route("/.well-known/agent-card.json", get(well_known_card))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

/// Build an in-process router from explicit runtime config.
pub async fn build_app(config: &RuntimeConfig) -> anyhow::Result<Router> {
    let state = build_state(config).await?;
    Ok(router_for_state(state, &config.allowed_origins))
}

/// Run the API server with explicit runtime configuration.
pub async fn run_with_config(config: RuntimeConfig) -> anyhow::Result<()> {
    let state = build_state(&config).await?;
    let storage_for_shutdown = state.ledger.storage().clone();
    let app = router_for_state(state, &config.allowed_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("GARL ledger API listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    storage_for_shutdown.close().await;
    info!("GARL ledger API shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {}", err);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

async fn health() -> &'static str {
    "OK"
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RegisterResponse {
    #[serde(flatten)]
    agent: Agent,
    /// Shown exactly once.
    api_key: String,
}

async fn register_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    state
        .rate_limiter
        .check(&client_key(&headers), RateTier::Register)?;
    let (agent, api_key) = state.ledger.register(req).await?;
    Ok(Json(RegisterResponse { agent, api_key }))
}

#[derive(Debug, Deserialize)]
struct AutoRegisterRequest {
    name: String,
    #[serde(default)]
    framework: Option<String>,
    #[serde(default)]
    category: Option<TaskCategory>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Serialize)]
struct AutoRegisterResponse {
    #[serde(flatten)]
    agent: Agent,
    api_key: String,
    instructions: serde_json::Value,
}

async fn auto_register_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AutoRegisterRequest>,
) -> Result<Json<AutoRegisterResponse>, ApiError> {
    state
        .rate_limiter
        .check(&client_key(&headers), RateTier::AutoRegister)?;

    let framework = req.framework.unwrap_or_else(|| "custom".to_string());
    let category = req.category.unwrap_or(TaskCategory::Other);
    let description = req
        .description
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| format!("Auto-registered {framework} agent"));

    let (agent, api_key) = state
        .ledger
        .register(RegisterRequest {
            name: req.name,
            description,
            framework: Some(framework),
            category: Some(category),
            is_sandbox: false,
            permissions_declared: Vec::new(),
        })
        .await?;

    let instructions = serde_json::json!({
        "welcome": format!("Agent '{}' registered on the GARL ledger.", agent.name),
        "next_steps": [
            {
                "step": 1,
                "action": "Store your api_key securely; it is shown only once.",
            },
            {
                "step": 2,
                "action": "Submit execution traces to build your trust score.",
                "endpoint": "POST /verify",
                "headers": {"X-Api-Key": "YOUR_API_KEY", "Content-Type": "application/json"},
                "example_body": {
                    "agent_id": agent.agent_id.clone(),
                    "task_description": "Completed task X",
                    "status": "success",
                    "duration_ms": 1000,
                    "category": category,
                },
            },
            {
                "step": 3,
                "action": "Check other agents' trust before delegating work.",
                "endpoint": "GET /trust/verify?agent_id=TARGET_ID",
            },
        ],
        "badge_embed": {
            "markdown": format!("![GARL Trust](/badge/svg/{})", agent.agent_id),
        },
    });

    Ok(Json(AutoRegisterResponse {
        agent,
        api_key,
        instructions,
    }))
}

async fn read_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<Agent>, ApiError> {
    let agent = state
        .ledger
        .get_agent_decayed(&agent_id)
        .await?
        .ok_or_else(|| not_found("agent"))?;
    Ok(Json(agent))
}

#[derive(Serialize)]
struct AgentDetail {
    agent: Agent,
    recent_traces: Vec<Trace>,
    reputation_history: Vec<garl_core::ReputationEvent>,
    decay_projection: Vec<DecayProjection>,
}

async fn read_agent_detail(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<AgentDetail>, ApiError> {
    let agent = state
        .ledger
        .get_agent_decayed(&agent_id)
        .await?
        .ok_or_else(|| not_found("agent"))?;

    let storage = state.ledger.storage();
    let recent_traces = storage
        .traces_for_agent(&agent_id, 50, 0)
        .await
        .map_err(storage_err)?;
    let reputation_history = storage
        .history_for_agent(&agent_id, 100)
        .await
        .map_err(storage_err)?;
    let decay_projection = project_decay(agent.trust_score, &[7, 30, 60, 90]);

    Ok(Json(AgentDetail {
        agent,
        recent_traces,
        reputation_history,
        decay_projection,
    }))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: u32,
}

fn default_history_limit() -> u32 {
    50
}

async fn read_agent_history(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<garl_core::ReputationEvent>>, ApiError> {
    let history = state
        .ledger
        .storage()
        .history_for_agent(&agent_id, query.limit.clamp(1, 200))
        .await
        .map_err(storage_err)?;
    Ok(Json(history))
}

#[derive(Debug, Deserialize)]
struct TracesQuery {
    #[serde(default = "default_traces_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

fn default_traces_limit() -> u32 {
    20
}

async fn read_agent_traces(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<TracesQuery>,
) -> Result<Json<Vec<Trace>>, ApiError> {
    let traces = state
        .ledger
        .storage()
        .traces_for_agent(&agent_id, query.limit.clamp(1, 100), query.offset)
        .await
        .map_err(storage_err)?;
    Ok(Json(traces))
}

async fn read_agent_card(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let agent = state
        .ledger
        .get_agent_decayed(&agent_id)
        .await?
        .ok_or_else(|| not_found("agent"))?;

    Ok(Json(serde_json::json!({
        "name": agent.name,
        "description": agent.description.clone(),
        "protocol": "garl/v1",
        "sovereign_id": agent.sovereign_id,
        "certification_tier": agent.certification_tier,
        "auth": {"type": "api_key", "header": "X-Api-Key"},
        "capabilities": [{"type": agent.category, "description": agent.description}],
        "garl_trust": {
            "agent_id": agent.agent_id,
            "trust_score": agent.trust_score,
            "verified": agent.is_verified(),
            "success_rate": agent.success_rate,
            "total_traces": agent.total_traces,
            "dimensions": agent.dimensions,
            "public_key": state.ledger.public_key_hex(),
            "last_verified": agent.last_trace_at,
        },
        "framework": agent.framework,
        "created_at": agent.created_at,
    })))
}

#[derive(Debug, Deserialize)]
struct SoftDeleteRequest {
    confirmation: String,
}

async fn delete_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SoftDeleteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.confirmation != "DELETE_CONFIRMED" {
        return Err(validation("Confirmation must be 'DELETE_CONFIRMED'"));
    }
    let api_key = require_api_key(&headers)?;
    state.ledger.soft_delete(&api_key, &agent_id).await?;
    Ok(Json(serde_json::json!({
        "agent_id": agent_id,
        "status": "soft_deleted",
        "message": "Agent deactivated. Data retained for audit purposes.",
    })))
}

#[derive(Debug, Deserialize)]
struct AnonymizeRequest {
    confirmation: String,
}

async fn anonymize_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AnonymizeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.confirmation != "ANONYMIZE_CONFIRMED" {
        return Err(validation("Confirmation must be 'ANONYMIZE_CONFIRMED'"));
    }
    let api_key = require_api_key(&headers)?;
    let anon_name = state.ledger.anonymize(&api_key, &agent_id).await?;
    Ok(Json(serde_json::json!({
        "agent_id": agent_id,
        "status": "anonymized",
        "anonymized_name": anon_name,
        "message": "PII removed. Trust scores and trace integrity preserved for audit.",
    })))
}

// ---------------------------------------------------------------------------
// Traces
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct TraceResponse {
    trace_id: String,
    agent_id: String,
    status: garl_core::TraceStatus,
    duration_ms: u64,
    trust_delta: f64,
    trace_hash: String,
    certificate: Certificate,
    trust_score: f64,
    certification_tier: CertificationTier,
    new_scores: Dimensions,
    duplicate: bool,
    created_at: DateTime<Utc>,
}

impl From<TraceOutcome> for TraceResponse {
    fn from(outcome: TraceOutcome) -> Self {
        TraceResponse {
            trace_id: outcome.trace.trace_id.clone(),
            agent_id: outcome.trace.agent_id.clone(),
            status: outcome.trace.status,
            duration_ms: outcome.trace.duration_ms,
            trust_delta: outcome.trace.trust_delta,
            trace_hash: outcome.trace.trace_hash.clone(),
            certificate: outcome.trace.certificate.clone(),
            trust_score: outcome.trust_score,
            certification_tier: outcome.certification_tier,
            new_scores: outcome.new_scores,
            duplicate: outcome.duplicate,
            created_at: outcome.trace.created_at,
        }
    }
}

async fn submit_trace(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TraceSubmitRequest>,
) -> Result<Json<TraceResponse>, ApiError> {
    let api_key = require_api_key(&headers)?;
    state
        .rate_limiter
        .check(api_key_bucket(&api_key), RateTier::Write)?;
    let outcome = state.ledger.submit_trace(&api_key, req).await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Deserialize)]
struct BatchTraceRequest {
    traces: Vec<TraceSubmitRequest>,
}

#[derive(Serialize)]
struct BatchItemResult {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trust_delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Serialize)]
struct BatchTraceResponse {
    submitted: usize,
    failed: usize,
    results: Vec<BatchItemResult>,
}

async fn submit_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BatchTraceRequest>,
) -> Result<Json<BatchTraceResponse>, ApiError> {
    let api_key = require_api_key(&headers)?;
    state
        .rate_limiter
        .check(api_key_bucket(&api_key), RateTier::Batch)?;

    if req.traces.is_empty() {
        return Err(validation("Batch must contain at least one trace"));
    }
    if req.traces.len() > MAX_BATCH_TRACES {
        return Err(validation(format!(
            "Batch must contain at most {MAX_BATCH_TRACES} traces"
        )));
    }
    let mut agent_ids = req.traces.iter().map(|t| t.agent_id.as_str());
    let first = agent_ids.next().unwrap_or_default();
    if agent_ids.any(|id| id != first) {
        return Err(validation("All traces in a batch must belong to the same agent"));
    }

    // Not atomic across items: each trace lands (or fails) on its own.
    let mut results = Vec::with_capacity(req.traces.len());
    let mut failed = 0;
    for trace in req.traces {
        match state.ledger.submit_trace(&api_key, trace).await {
            Ok(outcome) => results.push(BatchItemResult {
                status: "ok",
                trace_id: Some(outcome.trace.trace_id.clone()),
                trust_delta: Some(outcome.trace.trust_delta),
                detail: None,
            }),
            Err(err) => {
                failed += 1;
                results.push(BatchItemResult {
                    status: "error",
                    trace_id: None,
                    trust_delta: None,
                    detail: Some(err.to_string()),
                });
            }
        }
    }

    Ok(Json(BatchTraceResponse {
        submitted: results.len() - failed,
        failed,
        results,
    }))
}

#[derive(Serialize)]
struct CheckResponse {
    valid: bool,
    public_key: String,
}

async fn check_certificate(
    State(state): State<AppState>,
    Json(certificate): Json<Certificate>,
) -> Json<CheckResponse> {
    Json(CheckResponse {
        valid: verify_certificate(&certificate),
        public_key: state.ledger.public_key_hex().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Trust verdict & routing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TrustVerifyQuery {
    agent_id: String,
}

async fn trust_verify(
    State(state): State<AppState>,
    Query(query): Query<TrustVerifyQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.ledger.verdict(&query.agent_id).await? {
        Some(verdict) => {
            let mut value = serde_json::to_value(&verdict)
                .map_err(|e| ApiError(CoreError::Storage(e.into())))?;
            value["registered"] = serde_json::Value::Bool(true);
            Ok(Json(value))
        }
        None => Ok(Json(serde_json::json!({
            "agent_id": query.agent_id,
            "registered": false,
            "trust_score": 0,
            "risk_level": "unknown",
            "recommendation": "unknown",
            "message": "This agent is not registered on the GARL ledger. Trust cannot be verified.",
            "register_endpoint": "POST /agents/auto-register",
        }))),
    }
}

#[derive(Debug, Deserialize)]
struct RouteQuery {
    category: TaskCategory,
    #[serde(default = "default_min_tier")]
    min_tier: CertificationTier,
    #[serde(default = "default_route_limit")]
    limit: u32,
}

fn default_min_tier() -> CertificationTier {
    CertificationTier::Silver
}

fn default_route_limit() -> u32 {
    3
}

#[derive(Serialize)]
struct RouteRecommendation {
    agent_id: String,
    name: String,
    sovereign_id: String,
    trust_score: f64,
    certification_tier: CertificationTier,
    dimensions: Dimensions,
    total_traces: u64,
    success_rate: f64,
    framework: String,
}

#[derive(Serialize)]
struct RouteResponse {
    category: TaskCategory,
    min_tier: CertificationTier,
    recommendations: Vec<RouteRecommendation>,
}

async fn trust_route(
    State(state): State<AppState>,
    Query(query): Query<RouteQuery>,
) -> Result<Json<RouteResponse>, ApiError> {
    let agents = state
        .ledger
        .route(query.category, query.min_tier, query.limit.clamp(1, 10))
        .await?;

    Ok(Json(RouteResponse {
        category: query.category,
        min_tier: query.min_tier,
        recommendations: agents
            .into_iter()
            .map(|a| RouteRecommendation {
                agent_id: a.agent_id,
                name: a.name,
                sovereign_id: a.sovereign_id,
                trust_score: a.trust_score,
                certification_tier: a.certification_tier,
                dimensions: a.dimensions,
                total_traces: a.total_traces,
                success_rate: a.success_rate,
                framework: a.framework,
            })
            .collect(),
    }))
}

// ---------------------------------------------------------------------------
// Discovery & ranking
// ---------------------------------------------------------------------------

/// Decay an agent's scores into the response without persisting.
///
/// List endpoints tolerate a slightly stale persisted view; the lazy
/// decay write happens on direct reads.
fn decayed_view(mut agent: Agent) -> Agent {
    if let Some(last) = agent.last_trace_at {
        let hours = (Utc::now() - last).num_seconds() as f64 / 3600.0;
        if let Some(decayed) = decay_agent(&agent, hours) {
            agent.dimensions = decayed.dimensions;
            agent.trust_score = decayed.trust_score;
            agent.certification_tier = decayed.certification_tier;
        }
    }
    agent
}

#[derive(Debug, Deserialize)]
struct LeaderboardQuery {
    #[serde(default)]
    category: Option<TaskCategory>,
    #[serde(default = "default_leaderboard_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

fn default_leaderboard_limit() -> u32 {
    50
}

#[derive(Serialize)]
struct LeaderboardEntry {
    rank: u32,
    #[serde(flatten)]
    agent: Agent,
}

async fn leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let agents = state
        .ledger
        .storage()
        .list_leaderboard(query.category, query.limit.clamp(1, 100), query.offset)
        .await
        .map_err(storage_err)?;

    Ok(Json(
        agents
            .into_iter()
            .map(decayed_view)
            .enumerate()
            .map(|(i, agent)| LeaderboardEntry {
                rank: query.offset + i as u32 + 1,
                agent,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
    #[serde(default)]
    category: Option<TaskCategory>,
    #[serde(default = "default_search_limit")]
    limit: u32,
}

fn default_search_limit() -> u32 {
    10
}

#[derive(Serialize)]
struct SearchHit {
    #[serde(flatten)]
    agent: Agent,
    verified: bool,
    badge_url: String,
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SearchHit>>, ApiError> {
    let needle: String = query.q.chars().take(100).collect();
    let agents = state
        .ledger
        .storage()
        .search_agents(&needle, query.category, query.limit.clamp(1, 50))
        .await
        .map_err(storage_err)?;

    Ok(Json(
        agents
            .into_iter()
            .map(decayed_view)
            .map(|agent| SearchHit {
                verified: agent.is_verified(),
                badge_url: format!("/badge/svg/{}", agent.agent_id),
                agent,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
struct CompareQuery {
    agents: String,
}

async fn compare(
    State(state): State<AppState>,
    Query(query): Query<CompareQuery>,
) -> Result<Json<Vec<Agent>>, ApiError> {
    let ids: Vec<String> = query
        .agents
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if ids.len() < 2 {
        return Err(validation("Provide at least 2 agent IDs"));
    }
    if ids.len() > 10 {
        return Err(validation("Maximum 10 agents"));
    }

    let agents = state
        .ledger
        .storage()
        .get_agents_by_ids(&ids)
        .await
        .map_err(storage_err)?;
    Ok(Json(agents.into_iter().map(decayed_view).collect()))
}

#[derive(Debug, Deserialize)]
struct FeedQuery {
    #[serde(default = "default_feed_limit")]
    limit: u32,
}

fn default_feed_limit() -> u32 {
    20
}

async fn feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Vec<Trace>>, ApiError> {
    let traces = state
        .ledger
        .storage()
        .recent_traces(query.limit.clamp(1, 100))
        .await
        .map_err(storage_err)?;
    Ok(Json(traces))
}

#[derive(Serialize)]
struct StatsResponse {
    total_agents: u64,
    total_traces: u64,
    total_endorsements: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_agent: Option<serde_json::Value>,
}

async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let storage = state.ledger.storage();
    let stats = storage.stats().await.map_err(storage_err)?;
    let top_agent = storage.top_agent().await.map_err(storage_err)?.map(|a| {
        let a = decayed_view(a);
        serde_json::json!({
            "name": a.name,
            "trust_score": a.trust_score,
            "certification_tier": a.certification_tier,
        })
    });

    Ok(Json(StatsResponse {
        total_agents: stats.agent_count,
        total_traces: stats.trace_count,
        total_endorsements: stats.endorsement_count,
        top_agent,
    }))
}

// ---------------------------------------------------------------------------
// Badges
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct BadgeResponse {
    agent_id: String,
    name: String,
    trust_score: f64,
    success_rate: f64,
    total_traces: u64,
    verified: bool,
    certification_tier: CertificationTier,
    sovereign_id: String,
}

async fn badge_data(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<BadgeResponse>, ApiError> {
    let agent = state
        .ledger
        .get_agent_decayed(&agent_id)
        .await?
        .ok_or_else(|| not_found("agent"))?;

    Ok(Json(BadgeResponse {
        agent_id: agent.agent_id.clone(),
        name: agent.name.clone(),
        trust_score: agent.trust_score,
        success_rate: agent.success_rate,
        total_traces: agent.total_traces,
        verified: agent.is_verified(),
        certification_tier: agent.certification_tier,
        sovereign_id: agent.sovereign_id,
    }))
}

fn escape_xml(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

async fn badge_svg(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Response, ApiError> {
    let agent = state
        .ledger
        .get_agent_decayed(&agent_id)
        .await?
        .ok_or_else(|| not_found("agent"))?;

    let tier = agent.certification_tier;
    let color = match tier {
        CertificationTier::Enterprise => "#a855f7",
        CertificationTier::Gold => "#f59e0b",
        CertificationTier::Silver => "#94a3b8",
        CertificationTier::Bronze => "#92400e",
    };

    let label = format!("GARL {}", tier.as_str().to_uppercase());
    let value = format!("{:.1}", agent.trust_score);
    let verified = if agent.total_traces >= VERIFIED_TRACE_COUNT {
        " \u{2713}"
    } else {
        ""
    };

    let label_width = label.len() * 7 + 10;
    let value_width = (value.len() + verified.chars().count()) * 7 + 14;
    let total_width = label_width + value_width;
    let title = escape_xml(&format!("{label}: {value}{verified}"));

    let svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{total_width}" height="20" role="img" aria-label="{title}">
  <title>{title}</title>
  <linearGradient id="s" x2="0" y2="100%">
    <stop offset="0" stop-color="#bbb" stop-opacity=".1"/>
    <stop offset="1" stop-opacity=".1"/>
  </linearGradient>
  <clipPath id="r"><rect width="{total_width}" height="20" rx="3" fill="#fff"/></clipPath>
  <g clip-path="url(#r)">
    <rect width="{label_width}" height="20" fill="#12121a"/>
    <rect x="{label_width}" width="{value_width}" height="20" fill="{color}"/>
    <rect width="{total_width}" height="20" fill="url(#s)"/>
  </g>
  <g fill="#fff" text-anchor="middle" font-family="Verdana,Geneva,DejaVu Sans,sans-serif" text-rendering="geometricPrecision" font-size="11">
    <text x="{label_x}" y="14" fill="#e4e4e7">{label}</text>
    <text x="{value_x}" y="14" fill="#0a0a0f" font-weight="bold">{value}{verified}</text>
  </g>
</svg>"##,
        label_x = label_width / 2,
        value_x = label_width + value_width / 2,
    );

    Ok((
        [
            ("Content-Type", "image/svg+xml"),
            ("Cache-Control", "public, max-age=300"),
        ],
        svg,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Endorsements
// ---------------------------------------------------------------------------

async fn endorse(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EndorseRequest>,
) -> Result<Json<crate::pipeline::EndorseOutcome>, ApiError> {
    let api_key = require_api_key(&headers)?;
    state
        .rate_limiter
        .check(api_key_bucket(&api_key), RateTier::Default)?;
    let outcome = state.ledger.endorse(&api_key, req).await?;
    Ok(Json(outcome))
}

#[derive(Serialize)]
struct EndorsementsResponse {
    received: Vec<garl_core::Endorsement>,
    given: Vec<garl_core::Endorsement>,
    total_endorsement_bonus: f64,
}

async fn read_endorsements(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<EndorsementsResponse>, ApiError> {
    let storage = state.ledger.storage();
    let received = storage
        .endorsements_received(&agent_id)
        .await
        .map_err(storage_err)?;
    let given = storage
        .endorsements_given(&agent_id)
        .await
        .map_err(storage_err)?;
    let total_endorsement_bonus =
        (received.iter().map(|e| e.bonus_applied).sum::<f64>() * 10_000.0).round() / 10_000.0;

    Ok(Json(EndorsementsResponse {
        received,
        given,
        total_endorsement_bonus,
    }))
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WebhookRegisterRequest {
    agent_id: String,
    url: String,
    #[serde(default)]
    events: Option<Vec<WebhookEvent>>,
}

#[derive(Serialize)]
struct WebhookCreatedResponse {
    #[serde(flatten)]
    webhook: Webhook,
    /// Shown exactly once.
    secret: String,
}

async fn create_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<WebhookRegisterRequest>,
) -> Result<Json<WebhookCreatedResponse>, ApiError> {
    let api_key = require_api_key(&headers)?;
    let webhook = state
        .ledger
        .create_webhook(&api_key, &req.agent_id, req.url, req.events)
        .await?;
    let secret = webhook.secret.clone();
    Ok(Json(WebhookCreatedResponse { webhook, secret }))
}

async fn list_webhooks(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<Webhook>>, ApiError> {
    let api_key = require_api_key(&headers)?;
    let agent = state.ledger.authenticate(&api_key).await?;
    if agent.agent_id != agent_id {
        return Err(ApiError(CoreError::Forbidden(
            "API key does not belong to this agent".into(),
        )));
    }
    let webhooks = state
        .ledger
        .storage()
        .webhooks_for_agent(&agent_id)
        .await
        .map_err(storage_err)?;
    Ok(Json(webhooks))
}

#[derive(Debug, Deserialize)]
struct WebhookUpdateRequest {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    events: Option<Vec<WebhookEvent>>,
    #[serde(default)]
    is_active: Option<bool>,
}

async fn update_webhook(
    State(state): State<AppState>,
    Path((agent_id, webhook_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<WebhookUpdateRequest>,
) -> Result<Json<Webhook>, ApiError> {
    let api_key = require_api_key(&headers)?;
    let agent = state.ledger.authenticate(&api_key).await?;
    if agent.agent_id != agent_id {
        return Err(ApiError(CoreError::Forbidden(
            "API key does not belong to this agent".into(),
        )));
    }

    let webhook = state
        .ledger
        .storage()
        .update_webhook(
            &agent_id,
            &webhook_id,
            req.url.as_deref(),
            req.events.as_deref(),
            req.is_active,
        )
        .await
        .map_err(storage_err)?
        .ok_or_else(|| not_found("webhook"))?;
    Ok(Json(webhook))
}

async fn delete_webhook(
    State(state): State<AppState>,
    Path((agent_id, webhook_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let api_key = require_api_key(&headers)?;
    let agent = state.ledger.authenticate(&api_key).await?;
    if agent.agent_id != agent_id {
        return Err(ApiError(CoreError::Forbidden(
            "API key does not belong to this agent".into(),
        )));
    }

    let deleted = state
        .ledger
        .storage()
        .delete_webhook(&agent_id, &webhook_id)
        .await
        .map_err(storage_err)?;
    if !deleted {
        return Err(not_found("webhook"));
    }
    Ok(Json(serde_json::json!({"deleted": true})))
}

// ---------------------------------------------------------------------------
// Compliance & discovery
// ---------------------------------------------------------------------------

async fn read_compliance(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.read_auth_enabled && headers.get("x-api-key").is_none() {
        return Err(ApiError(CoreError::Unauthorized));
    }

    let agent = state
        .ledger
        .get_agent_decayed(&agent_id)
        .await?
        .ok_or_else(|| not_found("agent"))?;

    let storage = state.ledger.storage();
    let received = storage
        .endorsements_received(&agent_id)
        .await
        .map_err(storage_err)?;
    let given = storage
        .endorsements_given(&agent_id)
        .await
        .map_err(storage_err)?;
    let cumulative_bonus =
        (received.iter().map(|e| e.bonus_applied).sum::<f64>() * 10_000.0).round() / 10_000.0;

    let (active, archived): (Vec<&AnomalyFlag>, Vec<&AnomalyFlag>) =
        agent.anomaly_flags.iter().partition(|f| f.is_active());

    let mut security_risks = Vec::new();
    if agent.dimensions.security < 40.0 {
        security_risks.push(serde_json::json!({
            "level": "critical",
            "message": "Security score at critical level",
        }));
    } else if agent.dimensions.security < 60.0 {
        security_risks.push(serde_json::json!({
            "level": "warning",
            "message": "Security score below average",
        }));
    }
    if !active.is_empty() {
        security_risks.push(serde_json::json!({
            "level": "warning",
            "message": format!("{} active anomaly flag(s)", active.len()),
            "details": &active,
        }));
    }
    if agent.permissions_declared.is_empty() {
        security_risks.push(serde_json::json!({
            "level": "info",
            "message": "No permissions declared; security score cannot be fully calculated",
        }));
    }

    Ok(Json(serde_json::json!({
        "agent_id": agent.agent_id,
        "name": agent.name,
        "sovereign_id": agent.sovereign_id,
        "certification_tier": agent.certification_tier,
        "trust_score": agent.trust_score,
        "security_score": agent.dimensions.security,
        "dimensions": agent.dimensions,
        "sla_compliance": {
            "uptime_rate": agent.success_rate,
            "avg_response_ms": agent.avg_duration_ms,
            "total_executions": agent.total_traces,
            "sla_met": agent.success_rate >= 95.0 && agent.total_traces >= VERIFIED_TRACE_COUNT,
            "tier_qualification": agent.certification_tier,
        },
        "anomaly_history": {
            "active": active,
            "archived": archived,
            "total_flags": agent.anomaly_flags.len(),
        },
        "security_risks": security_risks,
        "endorsement_summary": {
            "received": received,
            "given": given,
            "total_endorsement_bonus": cumulative_bonus,
        },
        "permissions_declared": agent.permissions_declared,
        "created_at": agent.created_at,
        "last_active": agent.last_trace_at,
    })))
}

/// Service discovery document, including the certificate public key so
/// third parties can verify certificates without contacting the ledger.
async fn well_known_card(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "GARL Reputation Ledger",
        "protocol": "garl/v1",
        "description": "Trust profiles for autonomous software agents, backed by signed execution traces.",
        "public_key": state.ledger.public_key_hex(),
        "signature_alg": "ECDSA-secp256k1",
        "endpoints": {
            "register": "POST /agents",
            "submit_trace": "POST /verify",
            "verify_certificate": "POST /verify/check",
            "trust_check": "GET /trust/verify?agent_id=",
            "routing": "GET /trust/route?category=&min_tier=&limit=",
        },
    }))
}
