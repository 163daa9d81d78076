//! Wire protocol message types
//!
//! Every message on the wire is a flat JSON object with a required `type`
//! discriminator and a producer-assigned `timestamp` in milliseconds.
//! Field names are camelCase (`tableId`, `clientId`, `paymentData`).
//!
//! Unknown extra fields on inbound messages are tolerated. A message whose
//! `type` is not recognized is NOT a protocol error: the relay logs and
//! drops it without replying.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::order::{Order, PaymentData};
use crate::table::{AssistanceReason, TableStatus};

/// 客户端角色
///
/// 连接建立时为 `Unknown`；客户端通过 `identify` 消息自报身份后，
/// relay 按角色过滤广播。未自报身份的连接接收所有广播。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    #[default]
    Unknown,
    Table,
    Staff,
}

impl std::fmt::Display for ClientRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientRole::Unknown => write!(f, "unknown"),
            ClientRole::Table => write!(f, "table"),
            ClientRole::Staff => write!(f, "staff"),
        }
    }
}

/// Typed wire message, tagged by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum WireMessage {
    /// Relay → client, sent once at accept time.
    Connected { client_id: String, timestamp: i64 },
    /// Client → relay role/table registration.
    Identify {
        role: ClientRole,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table_id: Option<String>,
        timestamp: i64,
    },
    Heartbeat { timestamp: i64 },
    HeartbeatResponse { timestamp: i64 },
    /// Client → relay; staff-scoped broadcast plus a `notification_sent`
    /// echo to the sender.
    ServerNotification {
        table_id: String,
        reason: AssistanceReason,
        timestamp: i64,
    },
    NotificationSent {
        table_id: String,
        reason: AssistanceReason,
        timestamp: i64,
    },
    OrderSubmitted {
        table_id: String,
        order: Order,
        timestamp: i64,
    },
    /// Relay → sender confirmation carrying the submitted order's id.
    OrderReceived { order_id: i64, timestamp: i64 },
    AssistanceRequest {
        table_id: String,
        reason: AssistanceReason,
        timestamp: i64,
    },
    /// Table-scoped broadcast.
    AssistanceCleared { table_id: String, timestamp: i64 },
    /// Broadcast to everyone except the sender; `data` is an open bag of
    /// status fields merged into the stored table state.
    TableStatusUpdate {
        table_id: String,
        status: TableStatus,
        #[serde(default)]
        data: Map<String, Value>,
        timestamp: i64,
    },
    PaymentUpdate {
        table_id: String,
        payment_data: PaymentData,
        timestamp: i64,
    },
    /// Relay → client reply to malformed input.
    Error { message: String, timestamp: i64 },
}

/// Subscription key: one variant per wire `type` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Identify,
    Heartbeat,
    HeartbeatResponse,
    ServerNotification,
    NotificationSent,
    OrderSubmitted,
    OrderReceived,
    AssistanceRequest,
    AssistanceCleared,
    TableStatusUpdate,
    PaymentUpdate,
    Error,
}

impl EventKind {
    /// 线上 `type` 字段值
    pub fn tag(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Identify => "identify",
            EventKind::Heartbeat => "heartbeat",
            EventKind::HeartbeatResponse => "heartbeat_response",
            EventKind::ServerNotification => "server_notification",
            EventKind::NotificationSent => "notification_sent",
            EventKind::OrderSubmitted => "order_submitted",
            EventKind::OrderReceived => "order_received",
            EventKind::AssistanceRequest => "assistance_request",
            EventKind::AssistanceCleared => "assistance_cleared",
            EventKind::TableStatusUpdate => "table_status_update",
            EventKind::PaymentUpdate => "payment_update",
            EventKind::Error => "error",
        }
    }

    /// Reverse lookup from the wire tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "connected" => Some(EventKind::Connected),
            "identify" => Some(EventKind::Identify),
            "heartbeat" => Some(EventKind::Heartbeat),
            "heartbeat_response" => Some(EventKind::HeartbeatResponse),
            "server_notification" => Some(EventKind::ServerNotification),
            "notification_sent" => Some(EventKind::NotificationSent),
            "order_submitted" => Some(EventKind::OrderSubmitted),
            "order_received" => Some(EventKind::OrderReceived),
            "assistance_request" => Some(EventKind::AssistanceRequest),
            "assistance_cleared" => Some(EventKind::AssistanceCleared),
            "table_status_update" => Some(EventKind::TableStatusUpdate),
            "payment_update" => Some(EventKind::PaymentUpdate),
            "error" => Some(EventKind::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Decode failure, split so the relay can tell "reply with error" apart
/// from "log and drop".
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Body is not valid JSON at all.
    #[error("invalid JSON: {0}")]
    Json(#[source] serde_json::Error),

    /// Valid JSON object but the `type` value is not in the protocol table.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Recognized `type` but required fields are missing or mistyped.
    #[error("invalid payload for '{kind}': {source}")]
    InvalidPayload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },

    /// Top-level value is not an object or has no string `type` field.
    #[error("message is not a typed object")]
    NotAnObject,
}

impl WireMessage {
    /// 消息的事件类型
    pub fn kind(&self) -> EventKind {
        match self {
            WireMessage::Connected { .. } => EventKind::Connected,
            WireMessage::Identify { .. } => EventKind::Identify,
            WireMessage::Heartbeat { .. } => EventKind::Heartbeat,
            WireMessage::HeartbeatResponse { .. } => EventKind::HeartbeatResponse,
            WireMessage::ServerNotification { .. } => EventKind::ServerNotification,
            WireMessage::NotificationSent { .. } => EventKind::NotificationSent,
            WireMessage::OrderSubmitted { .. } => EventKind::OrderSubmitted,
            WireMessage::OrderReceived { .. } => EventKind::OrderReceived,
            WireMessage::AssistanceRequest { .. } => EventKind::AssistanceRequest,
            WireMessage::AssistanceCleared { .. } => EventKind::AssistanceCleared,
            WireMessage::TableStatusUpdate { .. } => EventKind::TableStatusUpdate,
            WireMessage::PaymentUpdate { .. } => EventKind::PaymentUpdate,
            WireMessage::Error { .. } => EventKind::Error,
        }
    }

    /// 消息关联的桌台 id (如果有)
    pub fn table_id(&self) -> Option<&str> {
        match self {
            WireMessage::Identify { table_id, .. } => table_id.as_deref(),
            WireMessage::ServerNotification { table_id, .. }
            | WireMessage::NotificationSent { table_id, .. }
            | WireMessage::OrderSubmitted { table_id, .. }
            | WireMessage::AssistanceRequest { table_id, .. }
            | WireMessage::AssistanceCleared { table_id, .. }
            | WireMessage::TableStatusUpdate { table_id, .. }
            | WireMessage::PaymentUpdate { table_id, .. } => Some(table_id),
            _ => None,
        }
    }

    /// 序列化为 UTF-8 JSON
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a raw frame body into a typed message.
    ///
    /// The three-way split drives the relay's failure policy: `Json` and
    /// `InvalidPayload` earn an `error` reply, `UnknownType` is dropped.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(bytes).map_err(DecodeError::Json)?;

        let tag = value
            .as_object()
            .and_then(|obj| obj.get("type"))
            .and_then(Value::as_str)
            .ok_or(DecodeError::NotAnObject)?;

        let kind = EventKind::from_tag(tag)
            .ok_or_else(|| DecodeError::UnknownType(tag.to_string()))?;

        serde_json::from_value(value)
            .map_err(|source| DecodeError::InvalidPayload { kind, source })
    }

    // ---- Constructors for relay-originated messages ----

    pub fn connected(client_id: impl Into<String>) -> Self {
        WireMessage::Connected {
            client_id: client_id.into(),
            timestamp: crate::now_ms(),
        }
    }

    pub fn heartbeat() -> Self {
        WireMessage::Heartbeat {
            timestamp: crate::now_ms(),
        }
    }

    pub fn heartbeat_response() -> Self {
        WireMessage::HeartbeatResponse {
            timestamp: crate::now_ms(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        WireMessage::Error {
            message: message.into(),
            timestamp: crate::now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn serializes_with_snake_case_tag_and_camel_case_fields() {
        let msg = WireMessage::ServerNotification {
            table_id: "3".to_string(),
            reason: AssistanceReason::CustomerRequest,
            timestamp: 1_000,
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "server_notification");
        assert_eq!(json["tableId"], "3");
        assert_eq!(json["reason"], "customer_request");
        assert_eq!(json["timestamp"], 1_000);
    }

    #[test]
    fn decodes_order_submitted_sample() {
        // Shape taken from a real table client submission.
        let raw = br#"{
            "type": "order_submitted",
            "tableId": "5",
            "order": {"id": 1, "items": [{"name": "Beer", "price": 1.5, "quantity": 2}]},
            "timestamp": 1700000000000
        }"#;

        let msg = WireMessage::decode(raw).unwrap();
        match msg {
            WireMessage::OrderSubmitted { table_id, order, .. } => {
                assert_eq!(table_id, "5");
                assert_eq!(order.id, 1);
                assert_eq!(order.items.len(), 1);
                assert_eq!(order.items[0].name, "Beer");
                assert_eq!(order.items[0].quantity, 2);
                assert_eq!(order.total(), Decimal::new(30, 1)); // 3.0
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_distinguished_from_malformed_json() {
        let err = WireMessage::decode(b"{\"type\":\"mystery\",\"timestamp\":1}").unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType(t) if t == "mystery"));

        let err = WireMessage::decode(b"not json at all").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));

        let err = WireMessage::decode(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, DecodeError::NotAnObject));
    }

    #[test]
    fn known_type_with_bad_fields_is_invalid_payload() {
        let err = WireMessage::decode(b"{\"type\":\"order_submitted\",\"timestamp\":1}").unwrap_err();
        assert!(matches!(
            err,
            DecodeError::InvalidPayload {
                kind: EventKind::OrderSubmitted,
                ..
            }
        ));
    }

    #[test]
    fn extra_fields_are_ignored() {
        let raw = br#"{"type":"heartbeat","timestamp":5,"extra":"field","nested":{"a":1}}"#;
        let msg = WireMessage::decode(raw).unwrap();
        assert_eq!(msg, WireMessage::Heartbeat { timestamp: 5 });
    }

    #[test]
    fn event_kind_tags_round_trip() {
        let kinds = [
            EventKind::Connected,
            EventKind::Identify,
            EventKind::Heartbeat,
            EventKind::HeartbeatResponse,
            EventKind::ServerNotification,
            EventKind::NotificationSent,
            EventKind::OrderSubmitted,
            EventKind::OrderReceived,
            EventKind::AssistanceRequest,
            EventKind::AssistanceCleared,
            EventKind::TableStatusUpdate,
            EventKind::PaymentUpdate,
            EventKind::Error,
        ];
        for kind in kinds {
            assert_eq!(EventKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(EventKind::from_tag("nope"), None);
    }

    #[test]
    fn table_status_update_data_defaults_to_empty() {
        let raw = br#"{"type":"table_status_update","tableId":"2","status":"active","timestamp":9}"#;
        let msg = WireMessage::decode(raw).unwrap();
        match msg {
            WireMessage::TableStatusUpdate { data, status, .. } => {
                assert!(data.is_empty());
                assert_eq!(status, TableStatus::Active);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
