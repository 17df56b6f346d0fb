//! Trace storage operations.
//!
//! Traces are append-only: the only write is the transactional insert that
//! lands the trace, the history row, and the agent update together.

use anyhow::{Context, Result};
use garl_core::{Agent, ReputationEvent, Trace, TraceStatus};

use crate::agent::update_agent_state_query;
use crate::history::insert_history_query;
use crate::types::DbTrace;
use crate::Storage;

const TRACE_COLUMNS: &str = "trace_id, agent_id, task_description, status, duration_ms, category, \
     cost_usd, token_count, tool_calls, metadata, input_summary, output_summary, runtime_env, \
     trace_hash, certificate, trust_delta, created_at";

impl Storage {
    /// Persist a trace submission atomically: the trace row, the post-trace
    /// agent state, and the reputation history rows either all land or none do.
    pub async fn record_trace(
        &self,
        trace: &Trace,
        agent: &Agent,
        history: &[ReputationEvent],
    ) -> Result<()> {
        let tool_calls = serde_json::to_string(&trace.tool_calls)?;
        let metadata = serde_json::to_string(&trace.metadata)?;
        let certificate = serde_json::to_string(&trace.certificate)?;

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO traces (
                trace_id, agent_id, task_description, status, duration_ms, category,
                cost_usd, token_count, tool_calls, metadata, input_summary, output_summary,
                runtime_env, trace_hash, certificate, trust_delta, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trace.trace_id)
        .bind(&trace.agent_id)
        .bind(&trace.task_description)
        .bind(trace.status.as_str())
        .bind(trace.duration_ms as i64)
        .bind(trace.category.as_str())
        .bind(trace.cost_usd)
        .bind(trace.token_count.map(|t| t as i64))
        .bind(tool_calls)
        .bind(metadata)
        .bind(&trace.input_summary)
        .bind(&trace.output_summary)
        .bind(&trace.runtime_env)
        .bind(&trace.trace_hash)
        .bind(certificate)
        .bind(trace.trust_delta)
        .bind(trace.created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert trace")?;

        update_agent_state_query(agent)?
            .execute(&mut *tx)
            .await
            .context("Failed to update agent state")?;

        for event in history {
            insert_history_query(event)
                .execute(&mut *tx)
                .await
                .context("Failed to insert reputation history")?;
        }

        tx.commit().await.context("Failed to commit trace transaction")?;

        Ok(())
    }

    /// Fetch a trace by id.
    pub async fn get_trace(&self, trace_id: &str) -> Result<Option<Trace>> {
        let row = sqlx::query_as::<_, DbTrace>(&format!(
            "SELECT {TRACE_COLUMNS} FROM traces WHERE trace_id = ?"
        ))
        .bind(trace_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Trace::try_from).transpose()
    }

    /// The duplicate guard: fetch a trace by its `(agent_id, trace_hash)` key.
    pub async fn get_trace_by_hash(
        &self,
        agent_id: &str,
        trace_hash: &str,
    ) -> Result<Option<Trace>> {
        let row = sqlx::query_as::<_, DbTrace>(&format!(
            "SELECT {TRACE_COLUMNS} FROM traces WHERE agent_id = ? AND trace_hash = ?"
        ))
        .bind(agent_id)
        .bind(trace_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Trace::try_from).transpose()
    }

    /// Recent traces for one agent, newest first.
    pub async fn traces_for_agent(
        &self,
        agent_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Trace>> {
        let rows = sqlx::query_as::<_, DbTrace>(&format!(
            "SELECT {TRACE_COLUMNS} FROM traces WHERE agent_id = ? \
             ORDER BY created_at DESC, trace_id DESC LIMIT ? OFFSET ?"
        ))
        .bind(agent_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Trace::try_from).collect()
    }

    /// Statuses of an agent's most recent traces, newest first.
    ///
    /// Feeds the consistency window and the unexpected-failure rate without
    /// decoding full rows.
    pub async fn recent_statuses(&self, agent_id: &str, limit: u32) -> Result<Vec<TraceStatus>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT status FROM traces WHERE agent_id = ? \
             ORDER BY created_at DESC, trace_id DESC LIMIT ?",
        )
        .bind(agent_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(s,)| s.parse::<TraceStatus>().map_err(anyhow::Error::from))
            .collect()
    }

    /// Recent traces across all agents, newest first (the activity feed).
    pub async fn recent_traces(&self, limit: u32) -> Result<Vec<Trace>> {
        let rows = sqlx::query_as::<_, DbTrace>(&format!(
            "SELECT {TRACE_COLUMNS} FROM traces t \
             WHERE EXISTS (
                 SELECT 1 FROM agents a
                 WHERE a.agent_id = t.agent_id AND a.is_deleted = 0 AND a.is_sandbox = 0
             ) \
             ORDER BY created_at DESC, trace_id DESC LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Trace::try_from).collect()
    }
}
