//! 桌台状态模型
//!
//! relay 按桌台 id 懒创建 `TableState`，只在消息处理入口中修改；
//! 清台重置字段但保留条目。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::order::Order;

/// 协助原因码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistanceReason {
    /// 超过 60 个计时单位无交互
    NoInteraction,
    /// 顾客主动呼叫
    CustomerRequest,
    /// 支付环节需要帮助
    PaymentHelp,
}

impl std::fmt::Display for AssistanceReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssistanceReason::NoInteraction => write!(f, "no_interaction"),
            AssistanceReason::CustomerRequest => write!(f, "customer_request"),
            AssistanceReason::PaymentHelp => write!(f, "payment_help"),
        }
    }
}

/// 桌台状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    #[default]
    Active,
    Inactive,
    Cleared,
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableStatus::Active => write!(f, "active"),
            TableStatus::Inactive => write!(f, "inactive"),
            TableStatus::Cleared => write!(f, "cleared"),
        }
    }
}

/// Server-side per-table state.
///
/// `extra` is the open-ended bag of status fields merged from
/// `table_status_update.data`; an explicit `status` always wins last-write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableState {
    pub orders: Vec<Order>,
    pub status: TableStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_order: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<i64>,
    #[serde(default)]
    pub needs_assistance: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistance_reason: Option<AssistanceReason>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TableState {
    /// 追加订单并记录时间
    pub fn record_order(&mut self, order: Order, now_ms: i64) {
        self.orders.push(order);
        self.last_order = Some(now_ms);
        self.status = TableStatus::Active;
    }

    /// 合并一次状态更新: 显式 status 覆盖，data 并入 extra
    pub fn merge_update(&mut self, status: TableStatus, data: &Map<String, Value>, now_ms: i64) {
        self.status = status;
        self.last_update = Some(now_ms);
        for (key, value) in data {
            self.extra.insert(key.clone(), value.clone());
        }
    }

    pub fn set_assistance(&mut self, reason: AssistanceReason) {
        self.needs_assistance = true;
        self.assistance_reason = Some(reason);
    }

    pub fn clear_assistance(&mut self) {
        self.needs_assistance = false;
        self.assistance_reason = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_update_is_last_write_wins_on_status() {
        let mut state = TableState::default();
        state.merge_update(TableStatus::Active, &Map::new(), 1);
        assert_eq!(state.status, TableStatus::Active);

        let mut data = Map::new();
        data.insert("customerCount".into(), serde_json::json!(4));
        state.merge_update(TableStatus::Inactive, &data, 2);

        assert_eq!(state.status, TableStatus::Inactive);
        assert_eq!(state.last_update, Some(2));
        assert_eq!(state.extra.get("customerCount"), Some(&serde_json::json!(4)));

        // Replaying an explicit status overwrites, no merge resolution.
        state.merge_update(TableStatus::Active, &Map::new(), 3);
        assert_eq!(state.status, TableStatus::Active);
    }

    #[test]
    fn assistance_flag_holds_one_reason_at_a_time() {
        let mut state = TableState::default();
        state.set_assistance(AssistanceReason::NoInteraction);
        state.set_assistance(AssistanceReason::CustomerRequest);
        assert_eq!(state.assistance_reason, Some(AssistanceReason::CustomerRequest));

        state.clear_assistance();
        assert!(!state.needs_assistance);
        assert_eq!(state.assistance_reason, None);
    }
}
