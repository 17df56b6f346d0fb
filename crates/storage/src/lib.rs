//! Storage layer for the GARL reputation ledger.
//!
//! This crate provides database operations for:
//! - Agents (the only mutable entity; scores move under the engine's rules)
//! - Traces (append-only, unique per `(agent_id, trace_hash)`)
//! - Reputation history (append-only)
//! - Endorsements (append-only, unique per `(endorser, target)`)
//! - Webhook subscriptions
//!
//! Append-only semantics are enforced here: no UPDATE or DELETE statement
//! exists for traces, history rows, or endorsements.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub mod agent;
pub mod endorsement;
pub mod history;
pub mod trace;
pub mod types;
pub mod webhook;

pub use types::*;

/// Database storage for the ledger.
///
/// Provides async access to SQLite with connection pooling. Cloning is
/// cheap; all clones share the same pool.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance with the given database URL.
    ///
    /// # Arguments
    /// * `database_url` - SQLite database URL (e.g., "sqlite://garl.db")
    /// * `max_connections` - Maximum pool size (default: 5)
    pub async fn new(database_url: &str, max_connections: Option<u32>) -> Result<Self> {
        let max_conn = max_connections.unwrap_or(5);

        info!("Connecting to database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_conn)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        Ok(Self { pool })
    }

    /// Create a new storage instance backed by a specific file path.
    pub async fn new_with_path<P: AsRef<Path>>(
        path: P,
        max_connections: Option<u32>,
    ) -> Result<Self> {
        let database_url = format!("sqlite://{}", path.as_ref().display());
        Self::new(&database_url, max_connections).await
    }

    /// In-memory storage for tests.
    pub async fn new_in_memory() -> Result<Self> {
        // A single pinned connection keeps the in-memory database alive.
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;
        Ok(Self { pool })
    }

    /// Run database migrations. Call once during initialization.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        Ok(())
    }

    /// Get a reference to the connection pool for custom transactions.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection");
        self.pool.close().await;
    }

    /// Check database health.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }

    /// Get ledger-wide statistics (sandbox and deleted agents excluded).
    pub async fn stats(&self) -> Result<LedgerStats> {
        let agent_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM agents WHERE is_deleted = 0 AND is_sandbox = 0",
        )
        .fetch_one(&self.pool)
        .await?;

        let trace_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM traces")
            .fetch_one(&self.pool)
            .await?;

        let endorsement_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM endorsements")
            .fetch_one(&self.pool)
            .await?;

        Ok(LedgerStats {
            agent_count: agent_count as u64,
            trace_count: trace_count as u64,
            endorsement_count: endorsement_count as u64,
        })
    }
}

/// Ledger-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerStats {
    /// Registered, visible agents.
    pub agent_count: u64,
    /// Total traces ever accepted.
    pub trace_count: u64,
    /// Total endorsement edges.
    pub endorsement_count: u64,
}

#[cfg(test)]
pub(crate) mod testutil {
    use chrono::Utc;
    use garl_core::constants::BASELINE_SCORE;
    use garl_core::types::sovereign_id_for;
    use garl_core::{hash_api_key, Agent, CertificationTier, Dimensions, TaskCategory};

    use crate::Storage;

    pub(crate) async fn setup() -> Storage {
        let storage = Storage::new_in_memory().await.unwrap();
        storage.run_migrations().await.unwrap();
        storage
    }

    pub(crate) fn sample_agent(agent_id: &str, category: TaskCategory) -> Agent {
        let now = Utc::now();
        Agent {
            agent_id: agent_id.to_string(),
            sovereign_id: sovereign_id_for(agent_id),
            name: format!("agent-{agent_id}"),
            description: String::new(),
            framework: "custom".into(),
            category,
            api_key_hash: hash_api_key(&format!("garl_key_{agent_id}")),
            is_sandbox: false,
            is_deleted: false,
            dimensions: Dimensions::baseline(),
            emas: Dimensions::baseline(),
            trust_score: BASELINE_SCORE,
            certification_tier: CertificationTier::Silver,
            total_traces: 0,
            success_count: 0,
            success_rate: 0.0,
            consecutive_successes: 0,
            avg_duration_ms: 0,
            total_cost_usd: 0.0,
            anomaly_flags: vec![],
            endorsement_score: 0.0,
            endorsement_count: 0,
            permissions_declared: vec![],
            last_trace_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
