//! Staff view aggregator
//!
//! Folds the relay's broadcast stream into one projection per table plus a
//! short-lived notification feed. The board never talks to the relay on the
//! inbound path; staff actions (`clear_table`, `mark_assistance_complete`)
//! are fire-and-forget sends.

use std::collections::BTreeMap;

use serde_json::Map;
use shared::message::WireMessage;
use shared::order::{Order, PaymentData};
use shared::table::{AssistanceReason, TableStatus};

use crate::transport::RelayClient;

/// Notifications drop off the feed after this long.
pub const NOTIFICATION_TTL_MS: i64 = 10_000;

/// What staff see for one table
#[derive(Debug, Clone, Default)]
pub struct TableProjection {
    pub status: TableStatus,
    pub customer_count: Option<u64>,
    pub orders: Vec<Order>,
    pub has_order: bool,
    pub needs_assistance: bool,
    pub assistance_reason: Option<AssistanceReason>,
    /// Timestamp (ms) of the first event that created this projection
    pub first_seen: i64,
    /// Timestamp (ms) of the last event touching this table
    pub last_activity: i64,
}

impl TableProjection {
    /// Milliseconds since the table first showed up on the board.
    pub fn time_elapsed_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.first_seen).max(0)
    }
}

/// One entry in the transient notification feed
#[derive(Debug, Clone)]
pub struct Notification {
    pub table_id: String,
    pub message: String,
    pub reason: Option<AssistanceReason>,
    pub created_ms: i64,
}

/// Staff-side projection of every table the relay has mentioned.
pub struct StaffBoard {
    client: Option<RelayClient>,
    tables: BTreeMap<String, TableProjection>,
    notifications: Vec<Notification>,
}

impl StaffBoard {
    pub fn new() -> Self {
        Self {
            client: None,
            tables: BTreeMap::new(),
            notifications: Vec::new(),
        }
    }

    /// Attach a relay client for staff actions.
    pub fn with_client(mut self, client: RelayClient) -> Self {
        self.client = Some(client);
        self
    }

    /// Fold one broadcast message into the board.
    pub fn apply(&mut self, msg: &WireMessage) {
        match msg {
            WireMessage::ServerNotification {
                table_id,
                reason,
                timestamp,
            }
            | WireMessage::AssistanceRequest {
                table_id,
                reason,
                timestamp,
            } => {
                let table = self.table_mut(table_id, *timestamp);
                table.needs_assistance = true;
                table.assistance_reason = Some(*reason);
                table.last_activity = *timestamp;
                self.push_notification(
                    table_id,
                    format!("Table {} needs assistance ({})", table_id, reason),
                    Some(*reason),
                    *timestamp,
                );
            }

            WireMessage::AssistanceCleared {
                table_id,
                timestamp,
            } => {
                let table = self.table_mut(table_id, *timestamp);
                table.needs_assistance = false;
                table.assistance_reason = None;
                table.last_activity = *timestamp;
            }

            WireMessage::OrderSubmitted {
                table_id,
                order,
                timestamp,
            } => {
                let table = self.table_mut(table_id, *timestamp);
                table.orders.push(order.clone());
                table.has_order = true;
                table.status = TableStatus::Active;
                table.last_activity = *timestamp;
                self.push_notification(
                    table_id,
                    format!("Table {}: new order ({} items)", table_id, order.items.len()),
                    None,
                    *timestamp,
                );
            }

            WireMessage::PaymentUpdate {
                table_id,
                payment_data,
                timestamp,
            } => {
                self.apply_payment(table_id, payment_data, *timestamp);
            }

            WireMessage::TableStatusUpdate {
                table_id,
                status,
                data,
                timestamp,
            } => {
                let table = self.table_mut(table_id, *timestamp);
                table.status = *status;
                table.last_activity = *timestamp;
                if let Some(count) = data.get("customerCount").and_then(|v| v.as_u64()) {
                    table.customer_count = Some(count);
                }
            }

            // Handshake, heartbeats and direct replies carry nothing for the board.
            _ => {}
        }
    }

    fn apply_payment(&mut self, table_id: &str, payment: &PaymentData, timestamp: i64) {
        let table = self.table_mut(table_id, timestamp);
        table.last_activity = timestamp;
        match table.orders.iter_mut().find(|o| o.id == payment.order_id) {
            Some(order) => order.status = payment.status,
            None => {
                tracing::debug!(table_id, order_id = payment.order_id, "Payment for unknown order");
            }
        }
        self.push_notification(
            table_id,
            format!("Table {}: payment {}", table_id, payment.status),
            None,
            timestamp,
        );
    }

    /// Drop notifications older than [`NOTIFICATION_TTL_MS`].
    pub fn expire_notifications(&mut self, now_ms: i64) {
        self.notifications
            .retain(|n| n.created_ms + NOTIFICATION_TTL_MS > now_ms);
    }

    // ---- Staff actions (fire-and-forget) ----

    /// Reset a table after checkout: the local projection goes back to
    /// inactive, while the relay broadcasts the `cleared` status and drops
    /// the assistance flag.
    pub fn clear_table(&mut self, table_id: &str) {
        if let Some(table) = self.tables.get_mut(table_id) {
            let now = shared::now_ms();
            *table = TableProjection {
                status: TableStatus::Inactive,
                first_seen: now,
                last_activity: now,
                ..TableProjection::default()
            };
        }
        if let Some(client) = &self.client {
            client.try_send(WireMessage::TableStatusUpdate {
                table_id: table_id.to_string(),
                status: TableStatus::Cleared,
                data: Map::new(),
                timestamp: shared::now_ms(),
            });
            client.try_send(WireMessage::AssistanceCleared {
                table_id: table_id.to_string(),
                timestamp: shared::now_ms(),
            });
        }
    }

    /// Staff handled an assistance request.
    pub fn mark_assistance_complete(&mut self, table_id: &str) {
        if let Some(table) = self.tables.get_mut(table_id) {
            table.needs_assistance = false;
            table.assistance_reason = None;
        }
        if let Some(client) = &self.client {
            client.try_send(WireMessage::AssistanceCleared {
                table_id: table_id.to_string(),
                timestamp: shared::now_ms(),
            });
        }
    }

    // ---- Accessors ----

    pub fn table(&self, table_id: &str) -> Option<&TableProjection> {
        self.tables.get(table_id)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&String, &TableProjection)> {
        self.tables.iter()
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Tables currently flagged for assistance.
    pub fn tables_needing_assistance(&self) -> Vec<&String> {
        self.tables
            .iter()
            .filter(|(_, t)| t.needs_assistance)
            .map(|(id, _)| id)
            .collect()
    }

    fn table_mut(&mut self, table_id: &str, timestamp: i64) -> &mut TableProjection {
        let table = self.tables.entry(table_id.to_string()).or_default();
        if table.first_seen == 0 {
            table.first_seen = timestamp;
        }
        table
    }

    fn push_notification(
        &mut self,
        table_id: &str,
        message: String,
        reason: Option<AssistanceReason>,
        created_ms: i64,
    ) {
        self.notifications.push(Notification {
            table_id: table_id.to_string(),
            message,
            reason,
            created_ms,
        });
    }
}

impl Default for StaffBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use shared::order::{LineItem, OrderStatus, PaymentMethod};

    fn order(id: i64) -> Order {
        Order::new(
            id,
            vec![LineItem::new("Super Bock", Decimal::new(15, 1), 2)],
            PaymentMethod::Later,
        )
    }

    #[test]
    fn order_submission_builds_a_projection() {
        let mut board = StaffBoard::new();
        board.apply(&WireMessage::OrderSubmitted {
            table_id: "5".to_string(),
            order: order(1),
            timestamp: 1_000,
        });

        let table = board.table("5").unwrap();
        assert!(table.has_order);
        assert_eq!(table.status, TableStatus::Active);
        assert_eq!(table.orders.len(), 1);
        assert_eq!(table.last_activity, 1_000);
        assert_eq!(table.first_seen, 1_000);
        assert_eq!(table.time_elapsed_ms(5_000), 4_000);
        assert_eq!(board.notifications().len(), 1);
    }

    #[test]
    fn payment_update_merges_by_order_id() {
        let mut board = StaffBoard::new();
        board.apply(&WireMessage::OrderSubmitted {
            table_id: "5".to_string(),
            order: order(42),
            timestamp: 1_000,
        });
        board.apply(&WireMessage::PaymentUpdate {
            table_id: "5".to_string(),
            payment_data: PaymentData::new(42, OrderStatus::Paid),
            timestamp: 2_000,
        });

        assert_eq!(board.table("5").unwrap().orders[0].status, OrderStatus::Paid);

        // A payment for an unknown order never panics or invents orders.
        board.apply(&WireMessage::PaymentUpdate {
            table_id: "5".to_string(),
            payment_data: PaymentData::new(999, OrderStatus::Paid),
            timestamp: 3_000,
        });
        assert_eq!(board.table("5").unwrap().orders.len(), 1);
    }

    #[test]
    fn assistance_flags_follow_request_and_clear() {
        let mut board = StaffBoard::new();
        board.apply(&WireMessage::AssistanceRequest {
            table_id: "3".to_string(),
            reason: AssistanceReason::CustomerRequest,
            timestamp: 500,
        });
        assert_eq!(board.tables_needing_assistance(), vec!["3"]);

        board.apply(&WireMessage::AssistanceCleared {
            table_id: "3".to_string(),
            timestamp: 600,
        });
        assert!(board.tables_needing_assistance().is_empty());
    }

    #[test]
    fn notifications_expire_after_ten_seconds() {
        let mut board = StaffBoard::new();
        board.apply(&WireMessage::ServerNotification {
            table_id: "2".to_string(),
            reason: AssistanceReason::NoInteraction,
            timestamp: 1_000,
        });
        board.apply(&WireMessage::ServerNotification {
            table_id: "4".to_string(),
            reason: AssistanceReason::NoInteraction,
            timestamp: 8_000,
        });

        board.expire_notifications(11_500);
        assert_eq!(board.notifications().len(), 1);
        assert_eq!(board.notifications()[0].table_id, "4");

        board.expire_notifications(18_001);
        assert!(board.notifications().is_empty());
    }

    #[test]
    fn status_update_carries_customer_count() {
        let mut board = StaffBoard::new();
        let mut data = Map::new();
        data.insert("customerCount".to_string(), serde_json::json!(4));
        board.apply(&WireMessage::TableStatusUpdate {
            table_id: "7".to_string(),
            status: TableStatus::Active,
            data,
            timestamp: 100,
        });

        let table = board.table("7").unwrap();
        assert_eq!(table.customer_count, Some(4));
        assert_eq!(table.status, TableStatus::Active);
    }

    #[test]
    fn clear_table_resets_the_projection() {
        let mut board = StaffBoard::new();
        board.apply(&WireMessage::OrderSubmitted {
            table_id: "5".to_string(),
            order: order(1),
            timestamp: 1_000,
        });
        board.apply(&WireMessage::AssistanceRequest {
            table_id: "5".to_string(),
            reason: AssistanceReason::PaymentHelp,
            timestamp: 1_100,
        });

        board.clear_table("5");
        // Local projection returns to inactive; `cleared` only goes on the wire.
        let table = board.table("5").unwrap();
        assert_eq!(table.status, TableStatus::Inactive);
        assert!(table.orders.is_empty());
        assert!(!table.has_order);
        assert!(!table.needs_assistance);
    }
}
