//! 桌台状态注册表
//!
//! 按桌台 id 懒创建，只由消息处理入口修改；清台重置字段但保留条目。

use dashmap::DashMap;
use serde_json::{Map, Value};
use shared::table::{AssistanceReason, TableState, TableStatus};
use shared::Order;

#[derive(Debug, Default)]
pub struct TableRegistry {
    tables: DashMap<String, TableState>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
        }
    }

    /// `order_submitted`: 懒创建 + 追加订单 + 打 lastOrder 时间戳
    pub fn record_order(&self, table_id: &str, order: Order, now_ms: i64) {
        let mut state = self.tables.entry(table_id.to_string()).or_default();
        state.record_order(order, now_ms);
    }

    /// `table_status_update`: 显式 status 覆盖，data 并入状态包
    pub fn merge_update(
        &self,
        table_id: &str,
        status: TableStatus,
        data: &Map<String, Value>,
        now_ms: i64,
    ) {
        let mut state = self.tables.entry(table_id.to_string()).or_default();
        state.merge_update(status, data, now_ms);
    }

    pub fn set_assistance(&self, table_id: &str, reason: AssistanceReason) {
        let mut state = self.tables.entry(table_id.to_string()).or_default();
        state.set_assistance(reason);
    }

    pub fn clear_assistance(&self, table_id: &str) {
        if let Some(mut state) = self.tables.get_mut(table_id) {
            state.clear_assistance();
        }
    }

    pub fn get(&self, table_id: &str) -> Option<TableState> {
        self.tables.get(table_id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }
}
