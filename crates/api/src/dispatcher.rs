//! Asynchronous webhook dispatcher.
//!
//! Trace submissions enqueue events onto a bounded in-process queue and
//! return; background workers drain the queue and deliver to subscribers.
//! Delivery is at-least-once, best-effort ordered per subscriber, and
//! never shares a transaction with intake. A full queue drops the event
//! (with a log line) rather than failing the originating submission.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use garl_core::{Webhook, WebhookEvent};
use garl_storage::Storage;

/// Outbound request timeout.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Retries after the initial attempt, with exponential backoff 1s/2s/4s.
const MAX_RETRIES: u32 = 3;

/// How long an enqueue may block on a full queue before dropping.
const ENQUEUE_GRACE: Duration = Duration::from_millis(250);

type HmacSha256 = Hmac<Sha256>;

/// A reputation event headed for webhook subscribers.
///
/// Serialisation of this struct is the webhook body contract:
/// `{event, agent_id, timestamp, data}`.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEvent {
    /// Event kind.
    pub event: WebhookEvent,
    /// Agent the event concerns.
    pub agent_id: String,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Event-specific payload.
    pub data: serde_json::Value,
}

/// Producer handle onto the dispatcher queue. Cheap to clone.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<LedgerEvent>,
}

impl EventSender {
    /// Enqueue an event without ever failing the caller.
    ///
    /// When the queue is full the send blocks briefly on a detached task
    /// and then drops the event with a log line.
    pub fn enqueue(&self, event: LedgerEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if tx.send_timeout(event, ENQUEUE_GRACE).await.is_err() {
                        warn!("Webhook queue full; dropping event");
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Webhook queue closed; dropping event");
            }
        }
    }
}

/// Start the dispatcher: a bounded queue plus `workers` background consumers.
pub fn spawn_dispatcher(storage: Storage, capacity: usize, workers: usize) -> EventSender {
    let (tx, rx) = mpsc::channel::<LedgerEvent>(capacity);
    let rx = Arc::new(Mutex::new(rx));

    let client = reqwest::Client::builder()
        .timeout(DELIVERY_TIMEOUT)
        .build()
        .expect("reqwest client construction cannot fail with static config");

    for _ in 0..workers.max(1) {
        let rx = rx.clone();
        let storage = storage.clone();
        let client = client.clone();
        tokio::spawn(async move {
            loop {
                let event = {
                    let mut guard = rx.lock().await;
                    guard.recv().await
                };
                let Some(event) = event else {
                    // All senders gone: shut the worker down.
                    break;
                };
                deliver_event(&storage, &client, event).await;
            }
        });
    }

    EventSender { tx }
}

/// Fan one event out to every matching active subscriber.
async fn deliver_event(storage: &Storage, client: &reqwest::Client, event: LedgerEvent) {
    let hooks = match storage
        .active_webhooks_for_event(&event.agent_id, event.event)
        .await
    {
        Ok(hooks) => hooks,
        Err(err) => {
            warn!(
                "Failed to load webhooks for agent {}: {:#}",
                event.agent_id, err
            );
            return;
        }
    };

    let body = match serde_jcs::to_vec(&event) {
        Ok(body) => body,
        Err(err) => {
            warn!("Failed to canonicalize webhook body: {}", err);
            return;
        }
    };

    for hook in hooks {
        deliver_to_hook(storage, client, &hook, event.event, &body).await;
    }
}

/// Hex HMAC-SHA256 of the body under the subscriber's secret.
pub fn signature_for(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

async fn deliver_to_hook(
    storage: &Storage,
    client: &reqwest::Client,
    hook: &Webhook,
    event: WebhookEvent,
    body: &[u8],
) {
    let signature = signature_for(&hook.secret, body);

    for attempt in 0..=MAX_RETRIES {
        let result = client
            .post(&hook.url)
            .header("Content-Type", "application/json")
            .header("X-Garl-Event", event.as_str())
            .header("X-Garl-Signature", &signature)
            .body(body.to_vec())
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                if let Err(err) = storage.touch_webhook(&hook.id, Utc::now()).await {
                    warn!("Failed to record webhook delivery: {:#}", err);
                }
                debug!("Delivered {} to {}", event.as_str(), hook.url);
                return;
            }
            Ok(response) => {
                warn!(
                    "Webhook {} returned {} (attempt {}/{})",
                    hook.url,
                    response.status(),
                    attempt + 1,
                    MAX_RETRIES + 1
                );
            }
            Err(err) => {
                warn!(
                    "Webhook {} delivery failed (attempt {}/{}): {}",
                    hook.url,
                    attempt + 1,
                    MAX_RETRIES + 1,
                    err
                );
            }
        }

        if attempt < MAX_RETRIES {
            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
        }
    }

    warn!(
        "Webhook {} delivery exhausted {} attempts; dropping",
        hook.url,
        MAX_RETRIES + 1
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::Router;
    use garl_core::TaskCategory;
    use std::net::SocketAddr;

    #[derive(Clone, Default)]
    struct Received {
        requests: Arc<std::sync::Mutex<Vec<(HeaderMap, Vec<u8>)>>>,
    }

    async fn sink(
        State(received): State<Received>,
        headers: HeaderMap,
        body: axum::body::Bytes,
    ) -> &'static str {
        received
            .requests
            .lock()
            .unwrap()
            .push((headers, body.to_vec()));
        "ok"
    }

    async fn start_sink() -> (SocketAddr, Received) {
        let received = Received::default();
        let app = Router::new()
            .route("/hook", post(sink))
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, received)
    }

    async fn setup_storage_with_hook(url: &str, events: Vec<WebhookEvent>) -> Storage {
        let storage = Storage::new_in_memory().await.unwrap();
        storage.run_migrations().await.unwrap();

        let now = Utc::now();
        let agent = garl_core::Agent {
            agent_id: "a1".into(),
            sovereign_id: garl_core::types::sovereign_id_for("a1"),
            name: "hooked".into(),
            description: String::new(),
            framework: "custom".into(),
            category: TaskCategory::Coding,
            api_key_hash: "x".into(),
            is_sandbox: false,
            is_deleted: false,
            dimensions: garl_core::Dimensions::baseline(),
            emas: garl_core::Dimensions::baseline(),
            trust_score: 50.0,
            certification_tier: garl_core::CertificationTier::Silver,
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
        };
        storage.insert_agent(&agent).await.unwrap();

        storage
            .insert_webhook(&Webhook {
                id: "w1".into(),
                agent_id: "a1".into(),
                url: url.into(),
                secret: "whsec_secret".into(),
                events,
                is_active: true,
                created_at: now,
                last_triggered_at: None,
            })
            .await
            .unwrap();

        storage
    }

    async fn wait_for_request(received: &Received) -> (HeaderMap, Vec<u8>) {
        for _ in 0..100 {
            if let Some(entry) = received.requests.lock().unwrap().first().cloned() {
                return entry;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("webhook request never arrived");
    }

    #[tokio::test]
    async fn test_delivery_carries_signed_canonical_body() {
        let (addr, received) = start_sink().await;
        let url = format!("http://{addr}/hook");
        let storage =
            setup_storage_with_hook(&url, vec![WebhookEvent::TraceRecorded]).await;

        let sender = spawn_dispatcher(storage.clone(), 16, 1);
        sender.enqueue(LedgerEvent {
            event: WebhookEvent::TraceRecorded,
            agent_id: "a1".into(),
            timestamp: Utc::now(),
            data: serde_json::json!({"trace_id": "t1", "trust_score": 55.25}),
        });

        let (headers, body) = wait_for_request(&received).await;

        assert_eq!(headers.get("X-Garl-Event").unwrap(), "trace_recorded");
        let signature = headers
            .get("X-Garl-Signature")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(signature, signature_for("whsec_secret", &body));

        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["event"], "trace_recorded");
        assert_eq!(parsed["agent_id"], "a1");
        assert_eq!(parsed["data"]["trace_id"], "t1");

        // A successful delivery stamps last_triggered_at.
        for _ in 0..100 {
            let hook = storage.get_webhook("a1", "w1").await.unwrap().unwrap();
            if hook.last_triggered_at.is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("last_triggered_at never updated");
    }

    #[tokio::test]
    async fn test_unsubscribed_events_are_not_delivered() {
        let (addr, received) = start_sink().await;
        let url = format!("http://{addr}/hook");
        let storage = setup_storage_with_hook(&url, vec![WebhookEvent::Milestone]).await;

        let sender = spawn_dispatcher(storage, 16, 1);
        sender.enqueue(LedgerEvent {
            event: WebhookEvent::TraceRecorded,
            agent_id: "a1".into(),
            timestamp: Utc::now(),
            data: serde_json::json!({}),
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(received.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_signature_is_hmac_sha256_hex() {
        // Verifiable with any HMAC implementation.
        let signature = signature_for("key", b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            signature,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }
}
