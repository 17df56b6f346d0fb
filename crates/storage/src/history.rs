//! Reputation history storage. Append-only.

use anyhow::{Context, Result};
use garl_core::ReputationEvent;

use crate::types::DbHistory;
use crate::Storage;

/// Build the history INSERT so transactional paths can reuse it.
pub(crate) fn insert_history_query(
    event: &ReputationEvent,
) -> sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>> {
    sqlx::query(
        r#"
        INSERT INTO reputation_history (
            agent_id, trust_score,
            score_reliability, score_security, score_speed,
            score_cost_efficiency, score_consistency,
            event_type, trust_delta, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&event.agent_id)
    .bind(event.trust_score)
    .bind(event.dimensions.reliability)
    .bind(event.dimensions.security)
    .bind(event.dimensions.speed)
    .bind(event.dimensions.cost_efficiency)
    .bind(event.dimensions.consistency)
    .bind(event.event_type.as_str())
    .bind(event.trust_delta)
    .bind(event.created_at)
}

impl Storage {
    /// Append one reputation history row.
    pub async fn insert_history(&self, event: &ReputationEvent) -> Result<()> {
        insert_history_query(event)
            .execute(&self.pool)
            .await
            .context("Failed to insert reputation history")?;
        Ok(())
    }

    /// Recent history for an agent, newest first.
    pub async fn history_for_agent(
        &self,
        agent_id: &str,
        limit: u32,
    ) -> Result<Vec<ReputationEvent>> {
        let rows = sqlx::query_as::<_, DbHistory>(
            "SELECT agent_id, trust_score, score_reliability, score_security, score_speed, \
                    score_cost_efficiency, score_consistency, event_type, trust_delta, created_at \
             FROM reputation_history WHERE agent_id = ? \
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(agent_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ReputationEvent::try_from).collect()
    }

    /// Number of history rows for an agent.
    pub async fn history_count(&self, agent_id: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM reputation_history WHERE agent_id = ?")
                .bind(agent_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}
