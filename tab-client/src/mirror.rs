//! Event mirroring
//!
//! Session milestones (orders, payments) can be mirrored to a set of
//! external endpoints. Mirroring is strictly best-effort: callers spawn
//! `publish` on a task and never await it on the order or payment path, so
//! a slow or failing endpoint cannot delay a customer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

/// A milestone worth mirroring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorEvent {
    pub kind: String,
    pub table_id: String,
    pub payload: Value,
    pub timestamp: i64,
}

impl MirrorEvent {
    pub fn new(kind: impl Into<String>, table_id: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            table_id: table_id.into(),
            payload,
            timestamp: shared::now_ms(),
        }
    }
}

/// Per-endpoint publish outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointResult {
    pub endpoint: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Fire-and-forget event sink.
#[async_trait]
pub trait EventMirror: Send + Sync {
    async fn publish(&self, event: MirrorEvent) -> Vec<EndpointResult>;
}

/// 默认实现: 丢弃一切
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMirror;

#[async_trait]
impl EventMirror for NoopMirror {
    async fn publish(&self, _event: MirrorEvent) -> Vec<EndpointResult> {
        Vec::new()
    }
}

/// In-memory mirror over a configured endpoint list.
///
/// Records every published event per endpoint and reports success for each;
/// doubles as the test double for mirror-related flows.
#[derive(Debug, Default)]
pub struct RelaySetMirror {
    endpoints: Vec<String>,
    published: Mutex<Vec<MirrorEvent>>,
}

impl RelaySetMirror {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            published: Mutex::new(Vec::new()),
        }
    }

    /// Events published so far, in order.
    pub fn published(&self) -> Vec<MirrorEvent> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventMirror for RelaySetMirror {
    async fn publish(&self, event: MirrorEvent) -> Vec<EndpointResult> {
        tracing::debug!(kind = %event.kind, table_id = %event.table_id, "Mirroring event");
        self.published.lock().unwrap().push(event);
        self.endpoints
            .iter()
            .map(|endpoint| EndpointResult {
                endpoint: endpoint.clone(),
                ok: true,
                detail: None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn relay_set_mirror_reports_per_endpoint_results() {
        let mirror = RelaySetMirror::new(vec!["wss://a".into(), "wss://b".into()]);
        let results = mirror
            .publish(MirrorEvent::new("order", "5", serde_json::json!({"total": 3.0})))
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.ok));
        assert_eq!(mirror.published().len(), 1);
        assert_eq!(mirror.published()[0].table_id, "5");
    }

    #[tokio::test]
    async fn noop_mirror_swallows_everything() {
        let results = NoopMirror
            .publish(MirrorEvent::new("payment", "2", Value::Null))
            .await;
        assert!(results.is_empty());
    }
}
