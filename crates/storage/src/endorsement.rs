//! Endorsement storage operations. Append-only.

use anyhow::{Context, Result};
use garl_core::{Agent, Endorsement, ReputationEvent};

use crate::agent::update_agent_state_query;
use crate::history::insert_history_query;
use crate::types::DbEndorsement;
use crate::Storage;

const ENDORSEMENT_COLUMNS: &str = "id, endorser_id, target_id, endorser_score, endorser_traces, \
     endorser_tier, bonus_applied, tier_multiplier, context, created_at";

impl Storage {
    /// Persist an endorsement atomically: the edge, the updated target
    /// state, and the history row either all land or none do.
    pub async fn record_endorsement(
        &self,
        endorsement: &Endorsement,
        target: &Agent,
        history: &ReputationEvent,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO endorsements (
                id, endorser_id, target_id, endorser_score, endorser_traces,
                endorser_tier, bonus_applied, tier_multiplier, context, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&endorsement.id)
        .bind(&endorsement.endorser_id)
        .bind(&endorsement.target_id)
        .bind(endorsement.endorser_score)
        .bind(endorsement.endorser_traces as i64)
        .bind(endorsement.endorser_tier.as_str())
        .bind(endorsement.bonus_applied)
        .bind(endorsement.tier_multiplier)
        .bind(&endorsement.context)
        .bind(endorsement.created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert endorsement")?;

        update_agent_state_query(target)?
            .execute(&mut *tx)
            .await
            .context("Failed to update endorsement target")?;

        insert_history_query(history)
            .execute(&mut *tx)
            .await
            .context("Failed to insert endorsement history")?;

        tx.commit()
            .await
            .context("Failed to commit endorsement transaction")?;

        Ok(())
    }

    /// Whether an edge already exists for this `(endorser, target)` pair.
    pub async fn endorsement_exists(&self, endorser_id: &str, target_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM endorsements WHERE endorser_id = ? AND target_id = ?",
        )
        .bind(endorser_id)
        .bind(target_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Endorsements received by an agent, newest first.
    pub async fn endorsements_received(&self, agent_id: &str) -> Result<Vec<Endorsement>> {
        let rows = sqlx::query_as::<_, DbEndorsement>(&format!(
            "SELECT {ENDORSEMENT_COLUMNS} FROM endorsements WHERE target_id = ? \
             ORDER BY created_at DESC"
        ))
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Endorsement::try_from).collect()
    }

    /// Endorsements given by an agent, newest first.
    pub async fn endorsements_given(&self, agent_id: &str) -> Result<Vec<Endorsement>> {
        let rows = sqlx::query_as::<_, DbEndorsement>(&format!(
            "SELECT {ENDORSEMENT_COLUMNS} FROM endorsements WHERE endorser_id = ? \
             ORDER BY created_at DESC"
        ))
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Endorsement::try_from).collect()
    }
}
