//! Agent storage operations.
//!
//! Agents are the only mutable entity. Identity fields are written once at
//! registration; score state moves only through [`Storage::update_agent_state`]
//! (and the transactional helpers in the trace/endorsement modules).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use garl_core::{Agent, CertificationTier, TaskCategory};

use crate::types::DbAgent;
use crate::Storage;

const AGENT_COLUMNS: &str = "agent_id, sovereign_id, name, description, framework, category, \
     api_key_hash, is_sandbox, is_deleted, \
     score_reliability, score_security, score_speed, score_cost_efficiency, score_consistency, \
     ema_reliability, ema_security, ema_speed, ema_cost_efficiency, ema_consistency, \
     trust_score, certification_tier, total_traces, success_count, success_rate, \
     consecutive_successes, avg_duration_ms, total_cost_usd, anomaly_flags, \
     endorsement_score, endorsement_count, permissions_declared, \
     last_trace_at, created_at, updated_at";

impl Storage {
    /// Insert a freshly registered agent.
    pub async fn insert_agent(&self, agent: &Agent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agents (
                agent_id, sovereign_id, name, description, framework, category,
                api_key_hash, is_sandbox, is_deleted,
                score_reliability, score_security, score_speed, score_cost_efficiency, score_consistency,
                ema_reliability, ema_security, ema_speed, ema_cost_efficiency, ema_consistency,
                trust_score, certification_tier, total_traces, success_count, success_rate,
                consecutive_successes, avg_duration_ms, total_cost_usd, anomaly_flags,
                endorsement_score, endorsement_count, permissions_declared,
                last_trace_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&agent.agent_id)
        .bind(&agent.sovereign_id)
        .bind(&agent.name)
        .bind(&agent.description)
        .bind(&agent.framework)
        .bind(agent.category.as_str())
        .bind(&agent.api_key_hash)
        .bind(agent.is_sandbox)
        .bind(agent.is_deleted)
        .bind(agent.dimensions.reliability)
        .bind(agent.dimensions.security)
        .bind(agent.dimensions.speed)
        .bind(agent.dimensions.cost_efficiency)
        .bind(agent.dimensions.consistency)
        .bind(agent.emas.reliability)
        .bind(agent.emas.security)
        .bind(agent.emas.speed)
        .bind(agent.emas.cost_efficiency)
        .bind(agent.emas.consistency)
        .bind(agent.trust_score)
        .bind(agent.certification_tier.as_str())
        .bind(agent.total_traces as i64)
        .bind(agent.success_count as i64)
        .bind(agent.success_rate)
        .bind(agent.consecutive_successes as i64)
        .bind(agent.avg_duration_ms as i64)
        .bind(agent.total_cost_usd)
        .bind(serde_json::to_string(&agent.anomaly_flags)?)
        .bind(agent.endorsement_score)
        .bind(agent.endorsement_count as i64)
        .bind(serde_json::to_string(&agent.permissions_declared)?)
        .bind(agent.last_trace_at)
        .bind(agent.created_at)
        .bind(agent.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert agent")?;

        Ok(())
    }

    /// Fetch an agent by id, deleted or not. Callers decide visibility.
    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        let row = sqlx::query_as::<_, DbAgent>(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE agent_id = ?"
        ))
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Agent::try_from).transpose()
    }

    /// Resolve an API key hash to its agent.
    pub async fn get_agent_by_api_key_hash(&self, api_key_hash: &str) -> Result<Option<Agent>> {
        let row = sqlx::query_as::<_, DbAgent>(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE api_key_hash = ?"
        ))
        .bind(api_key_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Agent::try_from).transpose()
    }

    /// Persist the mutable score state of an agent.
    pub async fn update_agent_state(&self, agent: &Agent) -> Result<()> {
        update_agent_state_query(agent)?
            .execute(&self.pool)
            .await
            .context("Failed to update agent state")?;
        Ok(())
    }

    /// Soft-delete an agent. The row and its traces remain for audit.
    pub async fn soft_delete_agent(&self, agent_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let result =
            sqlx::query("UPDATE agents SET is_deleted = 1, updated_at = ? WHERE agent_id = ?")
                .bind(now)
                .bind(agent_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Anonymize an agent: strip identity fields, keep score integrity.
    pub async fn anonymize_agent(
        &self,
        agent_id: &str,
        anonymized_name: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE agents
            SET name = ?, description = '', is_deleted = 1, updated_at = ?
            WHERE agent_id = ?
            "#,
        )
        .bind(anonymized_name)
        .bind(now)
        .bind(agent_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Leaderboard slice: visible agents with at least one trace, best first.
    pub async fn list_leaderboard(
        &self,
        category: Option<TaskCategory>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Agent>> {
        let mut sql = format!(
            "SELECT {AGENT_COLUMNS} FROM agents \
             WHERE is_deleted = 0 AND is_sandbox = 0 AND total_traces > 0"
        );
        if category.is_some() {
            sql.push_str(" AND category = ?");
        }
        sql.push_str(" ORDER BY trust_score DESC, total_traces DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query_as::<_, DbAgent>(&sql);
        if let Some(cat) = category {
            query = query.bind(cat.as_str());
        }
        let rows = query
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Agent::try_from).collect()
    }

    /// Name/description substring search over visible agents.
    pub async fn search_agents(
        &self,
        needle: &str,
        category: Option<TaskCategory>,
        limit: u32,
    ) -> Result<Vec<Agent>> {
        let mut sql = format!(
            "SELECT {AGENT_COLUMNS} FROM agents \
             WHERE is_deleted = 0 AND is_sandbox = 0 AND total_traces > 0"
        );
        if !needle.is_empty() {
            sql.push_str(" AND (name LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')");
        }
        if category.is_some() {
            sql.push_str(" AND category = ?");
        }
        sql.push_str(" ORDER BY trust_score DESC LIMIT ?");

        let pattern = format!(
            "%{}%",
            needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        let mut query = sqlx::query_as::<_, DbAgent>(&sql);
        if !needle.is_empty() {
            query = query.bind(pattern.clone()).bind(pattern);
        }
        if let Some(cat) = category {
            query = query.bind(cat.as_str());
        }
        let rows = query.bind(limit as i64).fetch_all(&self.pool).await?;

        rows.into_iter().map(Agent::try_from).collect()
    }

    /// Routing candidates: visible agents in a category at or above a tier.
    ///
    /// Critical-anomaly exclusion happens in the caller, which can read
    /// the decoded flags.
    pub async fn route_candidates(
        &self,
        category: TaskCategory,
        min_tier: CertificationTier,
        limit: u32,
    ) -> Result<Vec<Agent>> {
        let allowed: Vec<&str> = [
            CertificationTier::Bronze,
            CertificationTier::Silver,
            CertificationTier::Gold,
            CertificationTier::Enterprise,
        ]
        .iter()
        .filter(|t| **t >= min_tier)
        .map(|t| t.as_str())
        .collect();

        let placeholders = vec!["?"; allowed.len()].join(", ");
        let sql = format!(
            "SELECT {AGENT_COLUMNS} FROM agents \
             WHERE is_deleted = 0 AND is_sandbox = 0 AND total_traces > 0 \
               AND category = ? AND certification_tier IN ({placeholders}) \
             ORDER BY trust_score DESC, total_traces DESC LIMIT ?"
        );

        let mut query = sqlx::query_as::<_, DbAgent>(&sql).bind(category.as_str());
        for tier in &allowed {
            query = query.bind(*tier);
        }
        let rows = query.bind(limit as i64).fetch_all(&self.pool).await?;

        rows.into_iter().map(Agent::try_from).collect()
    }

    /// Fetch several agents by id, preserving request order where found.
    pub async fn get_agents_by_ids(&self, agent_ids: &[String]) -> Result<Vec<Agent>> {
        let mut agents = Vec::with_capacity(agent_ids.len());
        for id in agent_ids {
            if let Some(agent) = self.get_agent(id).await? {
                if !agent.is_deleted {
                    agents.push(agent);
                }
            }
        }
        Ok(agents)
    }

    /// The highest-scoring visible agent, if any.
    pub async fn top_agent(&self) -> Result<Option<Agent>> {
        let row = sqlx::query_as::<_, DbAgent>(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents \
             WHERE is_deleted = 0 AND is_sandbox = 0 AND total_traces > 0 \
             ORDER BY trust_score DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Agent::try_from).transpose()
    }
}

/// Build the agent-state UPDATE so transactional paths can reuse it.
pub(crate) fn update_agent_state_query(
    agent: &Agent,
) -> Result<sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>>> {
    let anomaly_flags = serde_json::to_string(&agent.anomaly_flags)?;

    Ok(sqlx::query(
        r#"
        UPDATE agents SET
            score_reliability = ?, score_security = ?, score_speed = ?,
            score_cost_efficiency = ?, score_consistency = ?,
            ema_reliability = ?, ema_security = ?, ema_speed = ?,
            ema_cost_efficiency = ?, ema_consistency = ?,
            trust_score = ?, certification_tier = ?,
            total_traces = ?, success_count = ?, success_rate = ?,
            consecutive_successes = ?, avg_duration_ms = ?, total_cost_usd = ?,
            anomaly_flags = ?, endorsement_score = ?, endorsement_count = ?,
            last_trace_at = ?, updated_at = ?
        WHERE agent_id = ?
        "#,
    )
    .bind(agent.dimensions.reliability)
    .bind(agent.dimensions.security)
    .bind(agent.dimensions.speed)
    .bind(agent.dimensions.cost_efficiency)
    .bind(agent.dimensions.consistency)
    .bind(agent.emas.reliability)
    .bind(agent.emas.security)
    .bind(agent.emas.speed)
    .bind(agent.emas.cost_efficiency)
    .bind(agent.emas.consistency)
    .bind(agent.trust_score)
    .bind(agent.certification_tier.as_str())
    .bind(agent.total_traces as i64)
    .bind(agent.success_count as i64)
    .bind(agent.success_rate)
    .bind(agent.consecutive_successes as i64)
    .bind(agent.avg_duration_ms as i64)
    .bind(agent.total_cost_usd)
    .bind(anomaly_flags)
    .bind(agent.endorsement_score)
    .bind(agent.endorsement_count as i64)
    .bind(agent.last_trace_at)
    .bind(agent.updated_at)
    .bind(&agent.agent_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{sample_agent, setup};
    use garl_core::constants::BASELINE_SCORE;

    #[tokio::test]
    async fn test_insert_and_get_round_trip() {
        let storage = setup().await;
        let agent = sample_agent("a1", TaskCategory::Coding);
        storage.insert_agent(&agent).await.unwrap();

        let fetched = storage.get_agent("a1").await.unwrap().unwrap();
        assert_eq!(fetched.name, agent.name);
        assert_eq!(fetched.sovereign_id, agent.sovereign_id);
        assert_eq!(fetched.category, TaskCategory::Coding);
        assert_eq!(fetched.trust_score, BASELINE_SCORE);
        assert_eq!(fetched.total_traces, 0);
    }

    #[tokio::test]
    async fn test_lookup_by_api_key_hash() {
        let storage = setup().await;
        let agent = sample_agent("a1", TaskCategory::Other);
        storage.insert_agent(&agent).await.unwrap();

        let found = storage
            .get_agent_by_api_key_hash(&agent.api_key_hash)
            .await
            .unwrap();
        assert_eq!(found.unwrap().agent_id, "a1");

        let missing = storage.get_agent_by_api_key_hash("nope").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_update_agent_state() {
        let storage = setup().await;
        let mut agent = sample_agent("a1", TaskCategory::Coding);
        storage.insert_agent(&agent).await.unwrap();

        agent.trust_score = 62.5;
        agent.total_traces = 3;
        agent.success_count = 3;
        agent.consecutive_successes = 3;
        agent.last_trace_at = Some(Utc::now());
        storage.update_agent_state(&agent).await.unwrap();

        let fetched = storage.get_agent("a1").await.unwrap().unwrap();
        assert_eq!(fetched.trust_score, 62.5);
        assert_eq!(fetched.total_traces, 3);
        assert!(fetched.last_trace_at.is_some());
    }

    #[tokio::test]
    async fn test_soft_delete_keeps_row() {
        let storage = setup().await;
        storage
            .insert_agent(&sample_agent("a1", TaskCategory::Coding))
            .await
            .unwrap();

        assert!(storage.soft_delete_agent("a1", Utc::now()).await.unwrap());
        let fetched = storage.get_agent("a1").await.unwrap().unwrap();
        assert!(fetched.is_deleted);

        assert!(!storage.soft_delete_agent("missing", Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_anonymize_strips_identity() {
        let storage = setup().await;
        storage
            .insert_agent(&sample_agent("a1", TaskCategory::Coding))
            .await
            .unwrap();

        assert!(storage
            .anonymize_agent("a1", "anon_0badc0de", Utc::now())
            .await
            .unwrap());
        let fetched = storage.get_agent("a1").await.unwrap().unwrap();
        assert_eq!(fetched.name, "anon_0badc0de");
        assert!(fetched.description.is_empty());
        assert!(fetched.is_deleted);
    }

    #[tokio::test]
    async fn test_leaderboard_excludes_sandbox_and_deleted() {
        let storage = setup().await;

        let mut visible = sample_agent("a1", TaskCategory::Coding);
        visible.total_traces = 5;
        visible.trust_score = 70.0;
        storage.insert_agent(&visible).await.unwrap();

        let mut sandbox = sample_agent("a2", TaskCategory::Coding);
        sandbox.is_sandbox = true;
        sandbox.total_traces = 5;
        sandbox.trust_score = 90.0;
        storage.insert_agent(&sandbox).await.unwrap();

        let mut deleted = sample_agent("a3", TaskCategory::Coding);
        deleted.is_deleted = true;
        deleted.total_traces = 5;
        storage.insert_agent(&deleted).await.unwrap();

        let mut traceless = sample_agent("a4", TaskCategory::Coding);
        traceless.total_traces = 0;
        storage.insert_agent(&traceless).await.unwrap();

        let board = storage.list_leaderboard(None, 10, 0).await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].agent_id, "a1");
    }

    #[tokio::test]
    async fn test_route_candidates_filters_tier_and_orders() {
        let storage = setup().await;

        let mut gold = sample_agent("a1", TaskCategory::Coding);
        gold.total_traces = 20;
        gold.trust_score = 82.0;
        gold.certification_tier = CertificationTier::Gold;
        storage.insert_agent(&gold).await.unwrap();

        let mut silver = sample_agent("a2", TaskCategory::Coding);
        silver.total_traces = 15;
        silver.trust_score = 65.0;
        silver.certification_tier = CertificationTier::Silver;
        storage.insert_agent(&silver).await.unwrap();

        let mut bronze = sample_agent("a3", TaskCategory::Coding);
        bronze.total_traces = 15;
        bronze.trust_score = 35.0;
        bronze.certification_tier = CertificationTier::Bronze;
        storage.insert_agent(&bronze).await.unwrap();

        let mut other_cat = sample_agent("a4", TaskCategory::Sales);
        other_cat.total_traces = 15;
        other_cat.trust_score = 95.0;
        other_cat.certification_tier = CertificationTier::Enterprise;
        storage.insert_agent(&other_cat).await.unwrap();

        let candidates = storage
            .route_candidates(TaskCategory::Coding, CertificationTier::Silver, 5)
            .await
            .unwrap();
        let ids: Vec<_> = candidates.iter().map(|a| a.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2"]);
    }

    #[tokio::test]
    async fn test_search_matches_name_and_description() {
        let storage = setup().await;

        let mut agent = sample_agent("a1", TaskCategory::Research);
        agent.name = "paper-summarizer".into();
        agent.description = "summarizes arxiv papers".into();
        agent.total_traces = 2;
        storage.insert_agent(&agent).await.unwrap();

        let hits = storage.search_agents("arxiv", None, 10).await.unwrap();
        assert_eq!(hits.len(), 1);

        let hits = storage.search_agents("summarizer", None, 10).await.unwrap();
        assert_eq!(hits.len(), 1);

        let hits = storage
            .search_agents("arxiv", Some(TaskCategory::Coding), 10)
            .await
            .unwrap();
        assert!(hits.is_empty());

        // LIKE wildcards in the needle are escaped, not interpreted.
        let hits = storage.search_agents("%", None, 10).await.unwrap();
        assert!(hits.is_empty());
    }
}
