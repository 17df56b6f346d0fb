//! Webhook subscription storage.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use garl_core::{Webhook, WebhookEvent};

use crate::types::DbWebhook;
use crate::Storage;

const WEBHOOK_COLUMNS: &str =
    "id, agent_id, url, secret, events, is_active, created_at, last_triggered_at";

impl Storage {
    /// Insert a webhook subscription.
    pub async fn insert_webhook(&self, webhook: &Webhook) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO webhooks (id, agent_id, url, secret, events, is_active, created_at, last_triggered_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&webhook.id)
        .bind(&webhook.agent_id)
        .bind(&webhook.url)
        .bind(&webhook.secret)
        .bind(serde_json::to_string(&webhook.events)?)
        .bind(webhook.is_active)
        .bind(webhook.created_at)
        .bind(webhook.last_triggered_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert webhook")?;

        Ok(())
    }

    /// Fetch a webhook scoped to its owner.
    pub async fn get_webhook(&self, agent_id: &str, webhook_id: &str) -> Result<Option<Webhook>> {
        let row = sqlx::query_as::<_, DbWebhook>(&format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE id = ? AND agent_id = ?"
        ))
        .bind(webhook_id)
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Webhook::try_from).transpose()
    }

    /// All webhooks owned by an agent, newest first.
    pub async fn webhooks_for_agent(&self, agent_id: &str) -> Result<Vec<Webhook>> {
        let rows = sqlx::query_as::<_, DbWebhook>(&format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE agent_id = ? ORDER BY created_at DESC"
        ))
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Webhook::try_from).collect()
    }

    /// Active webhooks of an agent subscribed to a given event.
    ///
    /// Event filtering happens here in Rust: the subscription list is tiny
    /// and the JSON layout stays private to this module.
    pub async fn active_webhooks_for_event(
        &self,
        agent_id: &str,
        event: WebhookEvent,
    ) -> Result<Vec<Webhook>> {
        let rows = sqlx::query_as::<_, DbWebhook>(&format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE agent_id = ? AND is_active = 1"
        ))
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        let mut hooks = Vec::new();
        for row in rows {
            let hook = Webhook::try_from(row)?;
            if hook.events.contains(&event) {
                hooks.push(hook);
            }
        }
        Ok(hooks)
    }

    /// Update the mutable fields of a webhook. `None` leaves a field as-is.
    pub async fn update_webhook(
        &self,
        agent_id: &str,
        webhook_id: &str,
        url: Option<&str>,
        events: Option<&[WebhookEvent]>,
        is_active: Option<bool>,
    ) -> Result<Option<Webhook>> {
        let Some(existing) = self.get_webhook(agent_id, webhook_id).await? else {
            return Ok(None);
        };

        let url = url.unwrap_or(&existing.url);
        let events_json = match events {
            Some(events) => serde_json::to_string(events)?,
            None => serde_json::to_string(&existing.events)?,
        };
        let is_active = is_active.unwrap_or(existing.is_active);

        sqlx::query("UPDATE webhooks SET url = ?, events = ?, is_active = ? WHERE id = ?")
            .bind(url)
            .bind(events_json)
            .bind(is_active)
            .bind(webhook_id)
            .execute(&self.pool)
            .await
            .context("Failed to update webhook")?;

        self.get_webhook(agent_id, webhook_id).await
    }

    /// Delete a webhook. Returns whether a row was removed.
    pub async fn delete_webhook(&self, agent_id: &str, webhook_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = ? AND agent_id = ?")
            .bind(webhook_id)
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a successful delivery.
    pub async fn touch_webhook(&self, webhook_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE webhooks SET last_triggered_at = ? WHERE id = ?")
            .bind(at)
            .bind(webhook_id)
            .execute(&self.pool)
            .await
            .context("Failed to touch webhook")?;
        Ok(())
    }
}
