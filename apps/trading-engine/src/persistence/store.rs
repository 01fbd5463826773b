//! Telemetry egress with a bounded retry queue.
//!
//! Records are POSTed to `{endpoint}/{stream}` with a bearer token.
//! Failures enqueue the record (capacity 1000, oldest dropped) for the
//! periodic retry loop. A disabled store accepts and discards
//! everything.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::PersistenceSection;

/// Retry queue capacity; oldest entries are dropped beyond this.
const RETRY_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
struct QueuedWrite {
    stream: String,
    record: Value,
}

/// Remote store client.
pub struct TelemetryStore {
    config: PersistenceSection,
    http: reqwest::Client,
    retry_queue: Mutex<VecDeque<QueuedWrite>>,
}

impl TelemetryStore {
    /// Store from the `persistence` config section.
    #[must_use]
    pub fn new(config: PersistenceSection) -> Self {
        if config.enabled {
            info!(endpoint = %config.endpoint, "telemetry store enabled");
        }
        Self {
            config,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            retry_queue: Mutex::new(VecDeque::with_capacity(RETRY_CAPACITY)),
        }
    }

    /// Whether remote writes are configured.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Write one record; on failure the record is queued for retry.
    /// Returns whether the write reached the store.
    pub async fn insert(&self, stream: &str, record: Value) -> bool {
        if !self.config.enabled {
            return false;
        }
        if self.send(stream, &record).await {
            return true;
        }
        self.enqueue(QueuedWrite {
            stream: stream.to_string(),
            record,
        })
        .await;
        false
    }

    /// Append an event record to the `events` stream.
    pub async fn log_event(&self, event_type: &str, data: Value, session_id: &str) {
        self.insert(
            "events",
            json!({
                "session_id": session_id,
                "timestamp": Utc::now().to_rfc3339(),
                "event_type": event_type,
                "data": data,
            }),
        )
        .await;
    }

    /// Retry queued writes; re-queues what still fails. Returns the
    /// number of successful retries.
    pub async fn retry_pending(&self) -> usize {
        let drained: Vec<QueuedWrite> = {
            let mut queue = self.retry_queue.lock().await;
            queue.drain(..).collect()
        };
        if drained.is_empty() {
            return 0;
        }

        let mut succeeded = 0;
        let mut still_failing = Vec::new();
        for write in drained {
            if self.send(&write.stream, &write.record).await {
                succeeded += 1;
            } else {
                still_failing.push(write);
            }
        }

        let pending = still_failing.len();
        let mut queue = self.retry_queue.lock().await;
        for write in still_failing {
            queue.push_back(write);
        }
        drop(queue);

        if succeeded > 0 {
            info!(succeeded, pending, "telemetry retries flushed");
        }
        succeeded
    }

    /// Writes waiting for retry.
    pub async fn pending_count(&self) -> usize {
        self.retry_queue.lock().await.len()
    }

    async fn send(&self, stream: &str, record: &Value) -> bool {
        let url = format!("{}/{stream}", self.config.endpoint.trim_end_matches('/'));
        let result = self
            .http
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(record)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!(stream, "telemetry write ok");
                true
            }
            Ok(response) => {
                warn!(stream, status = %response.status(), "telemetry write refused");
                false
            }
            Err(e) => {
                warn!(stream, error = %e, "telemetry write failed");
                false
            }
        }
    }

    async fn enqueue(&self, write: QueuedWrite) {
        let mut queue = self.retry_queue.lock().await;
        if queue.len() == RETRY_CAPACITY {
            queue.pop_front();
            warn!("telemetry retry queue full, oldest record dropped");
        }
        queue.push_back(write);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_store(endpoint: &str) -> TelemetryStore {
        TelemetryStore::new(PersistenceSection {
            enabled: true,
            endpoint: endpoint.to_string(),
            api_key: "key".to_string(),
        })
    }

    #[tokio::test]
    async fn test_disabled_store_discards() {
        let store = TelemetryStore::new(PersistenceSection::default());
        assert!(!store.insert("trades", json!({"x": 1})).await);
        assert_eq!(store.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_queues_for_retry() {
        let store = enabled_store("http://127.0.0.1:1");
        assert!(!store.insert("trades", json!({"x": 1})).await);
        assert_eq!(store.pending_count().await, 1);

        // Retry against the same dead endpoint keeps it queued.
        assert_eq!(store.retry_pending().await, 0);
        assert_eq!(store.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_queue_is_bounded() {
        let store = enabled_store("http://127.0.0.1:1");
        for i in 0..(RETRY_CAPACITY + 5) {
            store.enqueue(QueuedWrite {
                stream: "trades".to_string(),
                record: json!({"i": i}),
            })
            .await;
        }
        assert_eq!(store.pending_count().await, RETRY_CAPACITY);
    }
}
