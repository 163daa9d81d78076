//! Inbound message dispatch
//!
//! One dispatcher instance serves every connection. Handlers mutate the
//! table registry and push outbound envelopes; delivery and scope
//! filtering happen in the per-connection forwarder tasks.

use std::sync::Arc;

use shared::message::{DecodeError, WireMessage};
use shared::order::Order;
use shared::{now_ms, PaymentData};
use tokio::sync::broadcast;

use crate::relay::registry::{ClientId, ConnectionRegistry, Envelope, Scope};
use crate::relay::tables::TableRegistry;

/// Reply body for unparseable input, matching what clients already expect.
const INVALID_JSON_MESSAGE: &str = "Invalid JSON format";

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    tables: Arc<TableRegistry>,
    outbound: broadcast::Sender<Envelope>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        tables: Arc<TableRegistry>,
        outbound: broadcast::Sender<Envelope>,
    ) -> Self {
        Self {
            registry,
            tables,
            outbound,
        }
    }

    /// Entry point for one raw inbound frame.
    ///
    /// Malformed input earns exactly one `error` reply to the sender and
    /// nothing else; an unrecognized `type` is logged and dropped. Neither
    /// ever terminates the connection.
    pub fn dispatch(&self, sender: ClientId, raw: &[u8]) {
        match WireMessage::decode(raw) {
            Ok(msg) => self.handle(sender, msg),
            Err(DecodeError::UnknownType(kind)) => {
                tracing::info!(client_id = %sender, message_type = %kind, "Unknown message type, dropping");
            }
            Err(err) => {
                tracing::warn!(client_id = %sender, error = %err, "Failed to parse message");
                self.send(
                    Scope::Direct(sender),
                    WireMessage::error(INVALID_JSON_MESSAGE),
                );
            }
        }
    }

    fn handle(&self, sender: ClientId, msg: WireMessage) {
        match msg {
            WireMessage::Identify { role, table_id, .. } => {
                self.registry.identify(&sender, role, table_id);
            }

            WireMessage::Heartbeat { .. } => {
                self.send(Scope::Direct(sender), WireMessage::heartbeat_response());
            }

            WireMessage::ServerNotification {
                table_id, reason, ..
            } => {
                self.send(
                    Scope::Staff,
                    WireMessage::ServerNotification {
                        table_id: table_id.clone(),
                        reason,
                        timestamp: now_ms(),
                    },
                );
                self.send(
                    Scope::Direct(sender),
                    WireMessage::NotificationSent {
                        table_id,
                        reason,
                        timestamp: now_ms(),
                    },
                );
            }

            WireMessage::OrderSubmitted {
                table_id, order, ..
            } => self.handle_order(sender, table_id, order),

            WireMessage::AssistanceRequest {
                table_id, reason, ..
            } => {
                self.tables.set_assistance(&table_id, reason);
                self.send(
                    Scope::Staff,
                    WireMessage::AssistanceRequest {
                        table_id,
                        reason,
                        timestamp: now_ms(),
                    },
                );
            }

            WireMessage::AssistanceCleared { table_id, .. } => {
                self.tables.clear_assistance(&table_id);
                self.send(
                    Scope::Table(table_id.clone()),
                    WireMessage::AssistanceCleared {
                        table_id,
                        timestamp: now_ms(),
                    },
                );
            }

            WireMessage::TableStatusUpdate {
                table_id,
                status,
                data,
                ..
            } => {
                self.tables.merge_update(&table_id, status, &data, now_ms());
                self.send(
                    Scope::All {
                        exclude: Some(sender),
                    },
                    WireMessage::TableStatusUpdate {
                        table_id,
                        status,
                        data,
                        timestamp: now_ms(),
                    },
                );
            }

            WireMessage::PaymentUpdate {
                table_id,
                payment_data,
                ..
            } => self.handle_payment(table_id, payment_data),

            // Relay-originated types arriving inbound carry no meaning.
            other => {
                tracing::info!(
                    client_id = %sender,
                    message_type = %other.kind(),
                    "Ignoring client-sent relay message"
                );
            }
        }
    }

    fn handle_order(&self, sender: ClientId, table_id: String, order: Order) {
        let order_id = order.id;
        tracing::info!(
            client_id = %sender,
            table_id = %table_id,
            order_id,
            total = %order.total(),
            "Order submitted"
        );

        self.tables.record_order(&table_id, order.clone(), now_ms());

        self.send(
            Scope::Staff,
            WireMessage::OrderSubmitted {
                table_id,
                order,
                timestamp: now_ms(),
            },
        );
        self.send(
            Scope::Direct(sender),
            WireMessage::OrderReceived {
                order_id,
                timestamp: now_ms(),
            },
        );
    }

    fn handle_payment(&self, table_id: String, payment_data: PaymentData) {
        tracing::info!(
            table_id = %table_id,
            order_id = payment_data.order_id,
            status = %payment_data.status,
            "Payment update"
        );
        self.send(
            Scope::Staff,
            WireMessage::PaymentUpdate {
                table_id,
                payment_data,
                timestamp: now_ms(),
            },
        );
    }

    fn send(&self, scope: Scope, message: WireMessage) {
        // No receivers just means no open connections; best-effort.
        let _ = self.outbound.send(Envelope::new(scope, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::registry::ConnectionInfo;
    use shared::table::{AssistanceReason, TableStatus};
    use shared::ClientRole;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    struct Fixture {
        dispatcher: Dispatcher,
        registry: Arc<ConnectionRegistry>,
        tables: Arc<TableRegistry>,
        rx: broadcast::Receiver<Envelope>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let tables = Arc::new(TableRegistry::new());
        let (tx, rx) = broadcast::channel(64);
        let dispatcher = Dispatcher::new(registry.clone(), tables.clone(), tx);
        Fixture {
            dispatcher,
            registry,
            tables,
            rx,
        }
    }

    fn register(fx: &Fixture) -> ClientId {
        let info = ConnectionInfo::new(Uuid::new_v4(), CancellationToken::new());
        let id = info.id;
        fx.registry.register(info);
        id
    }

    fn drain(rx: &mut broadcast::Receiver<Envelope>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(env) = rx.try_recv() {
            out.push(env);
        }
        out
    }

    #[test]
    fn order_produces_one_broadcast_and_one_reply() {
        let mut fx = fixture();
        let sender = register(&fx);

        let raw = br#"{"type":"order_submitted","tableId":"5","order":{"id":42,"items":[{"name":"Beer","price":1.5,"quantity":2}]},"timestamp":1}"#;
        fx.dispatcher.dispatch(sender, raw);

        let envelopes = drain(&mut fx.rx);
        assert_eq!(envelopes.len(), 2);

        assert_eq!(envelopes[0].scope, Scope::Staff);
        assert!(matches!(
            &envelopes[0].message,
            WireMessage::OrderSubmitted { table_id, order, .. }
                if table_id == "5" && order.id == 42
        ));

        assert_eq!(envelopes[1].scope, Scope::Direct(sender));
        assert!(matches!(
            envelopes[1].message,
            WireMessage::OrderReceived { order_id: 42, .. }
        ));

        // Server-side state was upserted.
        let state = fx.tables.get("5").unwrap();
        assert_eq!(state.orders.len(), 1);
        assert!(state.last_order.is_some());
    }

    #[test]
    fn malformed_json_yields_exactly_one_error_reply() {
        let mut fx = fixture();
        let sender = register(&fx);

        fx.dispatcher.dispatch(sender, b"this is not json");

        let envelopes = drain(&mut fx.rx);
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].scope, Scope::Direct(sender));
        assert!(matches!(
            &envelopes[0].message,
            WireMessage::Error { message, .. } if message == "Invalid JSON format"
        ));
    }

    #[test]
    fn unknown_type_is_dropped_without_reply() {
        let mut fx = fixture();
        let sender = register(&fx);

        fx.dispatcher
            .dispatch(sender, br#"{"type":"teleport_table","timestamp":1}"#);
        assert!(drain(&mut fx.rx).is_empty());
    }

    #[test]
    fn assistance_request_broadcasts_without_echo_and_records_state() {
        let mut fx = fixture();
        let sender = register(&fx);

        fx.dispatcher.dispatch(
            sender,
            br#"{"type":"assistance_request","tableId":"3","reason":"customer_request","timestamp":1}"#,
        );

        let envelopes = drain(&mut fx.rx);
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].scope, Scope::Staff);

        let state = fx.tables.get("3").unwrap();
        assert!(state.needs_assistance);
        assert_eq!(state.assistance_reason, Some(AssistanceReason::CustomerRequest));
    }

    #[test]
    fn assistance_cleared_is_table_scoped() {
        let mut fx = fixture();
        let sender = register(&fx);
        fx.tables.set_assistance("3", AssistanceReason::NoInteraction);

        fx.dispatcher.dispatch(
            sender,
            br#"{"type":"assistance_cleared","tableId":"3","timestamp":1}"#,
        );

        let envelopes = drain(&mut fx.rx);
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].scope, Scope::Table("3".into()));
        assert!(!fx.tables.get("3").unwrap().needs_assistance);
    }

    #[test]
    fn status_update_excludes_sender_and_merges_state() {
        let mut fx = fixture();
        let sender = register(&fx);

        fx.dispatcher.dispatch(
            sender,
            br#"{"type":"table_status_update","tableId":"2","status":"inactive","data":{"customerCount":3},"timestamp":1}"#,
        );

        let envelopes = drain(&mut fx.rx);
        assert_eq!(envelopes.len(), 1);
        assert_eq!(
            envelopes[0].scope,
            Scope::All {
                exclude: Some(sender)
            }
        );

        let state = fx.tables.get("2").unwrap();
        assert_eq!(state.status, TableStatus::Inactive);
        assert_eq!(state.extra.get("customerCount"), Some(&serde_json::json!(3)));
    }

    #[test]
    fn server_notification_echoes_notification_sent() {
        let mut fx = fixture();
        let sender = register(&fx);

        fx.dispatcher.dispatch(
            sender,
            br#"{"type":"server_notification","tableId":"8","reason":"payment_help","timestamp":1}"#,
        );

        let envelopes = drain(&mut fx.rx);
        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].scope, Scope::Staff);
        assert_eq!(envelopes[1].scope, Scope::Direct(sender));
        assert!(matches!(
            envelopes[1].message,
            WireMessage::NotificationSent {
                reason: AssistanceReason::PaymentHelp,
                ..
            }
        ));
    }

    #[test]
    fn identify_binds_role_and_table() {
        let mut fx = fixture();
        let sender = register(&fx);

        fx.dispatcher.dispatch(
            sender,
            br#"{"type":"identify","role":"table","tableId":"5","timestamp":1}"#,
        );

        assert!(drain(&mut fx.rx).is_empty());
        let info = fx.registry.get(&sender).unwrap();
        assert_eq!(info.role, ClientRole::Table);
        assert_eq!(info.table_id.as_deref(), Some("5"));
    }

    #[test]
    fn heartbeat_gets_direct_response() {
        let mut fx = fixture();
        let sender = register(&fx);

        fx.dispatcher
            .dispatch(sender, br#"{"type":"heartbeat","timestamp":1}"#);

        let envelopes = drain(&mut fx.rx);
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].scope, Scope::Direct(sender));
        assert!(matches!(
            envelopes[0].message,
            WireMessage::HeartbeatResponse { .. }
        ));
    }
}
