//! Per-agent write serialisation.
//!
//! Every path that mutates one agent's scores (trace submission,
//! endorsement, lazy decay persistence) takes that agent's lock first.
//! Writes to different agents proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// Registry of per-agent async mutexes, keyed by agent id.
#[derive(Debug, Default)]
pub struct AgentLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AgentLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the write lock for one agent.
    ///
    /// The guard is owned, so it can be held across await points for the
    /// duration of the storage transaction.
    pub async fn lock(&self, agent_id: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut map = self.inner.lock().expect("agent lock registry poisoned");
            map.entry(agent_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn test_same_agent_is_serialised() {
        let locks = Arc::new(AgentLocks::new());
        let counter = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let locks = locks.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("agent-1").await;
                // If two tasks were ever inside the section, the running
                // value would exceed 1.
                let running = counter.fetch_add(1, Ordering::SeqCst) + 1;
                assert_eq!(running, 1);
                tokio::task::yield_now().await;
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_different_agents_do_not_block() {
        let locks = AgentLocks::new();
        let _a = locks.lock("agent-a").await;
        // Must not deadlock: agent-b has its own mutex.
        let _b = locks.lock("agent-b").await;
    }
}
