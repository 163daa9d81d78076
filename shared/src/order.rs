//! 订单数据模型
//!
//! 订单由桌台客户端创建：id 为创建时刻的毫秒时间戳，行项目来自
//! 当前选择，总价由行项目派生 (单价 × 数量求和)。

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 支付方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Lightning 即时支付 (发票 + 轮询确认)
    Lightning,
    /// 离店结账
    #[default]
    Later,
}

/// 订单状态流转: pending → awaiting_payment | paid → (可选) confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    AwaitingPayment,
    Paid,
    Confirmed,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::AwaitingPayment => write!(f, "awaiting_payment"),
            OrderStatus::Paid => write!(f, "paid"),
            OrderStatus::Confirmed => write!(f, "confirmed"),
        }
    }
}

/// 订单行项目
///
/// `id` 是菜单项标识，仅客户端选择阶段使用，线上可省略。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub price: Decimal,
    pub quantity: u32,
}

impl LineItem {
    pub fn new(name: impl Into<String>, price: Decimal, quantity: u32) -> Self {
        Self {
            id: None,
            name: name.into(),
            price,
            quantity,
        }
    }

    /// 行小计
    pub fn subtotal(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// 订单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default)]
    pub timestamp: i64,
}

impl Order {
    pub fn new(id: i64, items: Vec<LineItem>, payment_method: PaymentMethod) -> Self {
        let status = match payment_method {
            PaymentMethod::Lightning => OrderStatus::Pending,
            PaymentMethod::Later => OrderStatus::AwaitingPayment,
        };
        Self {
            id,
            items,
            payment_method,
            status,
            timestamp: crate::now_ms(),
        }
    }

    /// 总价: sum(单价 × 数量)
    pub fn total(&self) -> Decimal {
        self.items.iter().map(LineItem::subtotal).sum()
    }
}

/// `payment_update` 消息携带的支付状态
///
/// `extra` 兜住提供方附带的其它字段 (payment hash、preimage 等)。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentData {
    pub order_id: i64,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PaymentData {
    pub fn new(order_id: i64, status: OrderStatus) -> Self {
        Self {
            order_id,
            status,
            payment_hash: None,
            amount: None,
            extra: Map::new(),
        }
    }

    pub fn with_payment_hash(mut self, hash: impl Into<String>) -> Self {
        self.payment_hash = Some(hash.into());
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_total_is_derived_from_line_items() {
        let order = Order::new(
            1,
            vec![
                LineItem::new("Super Bock", Decimal::new(15, 1), 2), // 1.5 × 2
                LineItem::new("Poncha", Decimal::new(40, 1), 1),     // 4.0 × 1
            ],
            PaymentMethod::Later,
        );
        assert_eq!(order.total(), Decimal::new(70, 1)); // 7.0
        assert_eq!(order.status, OrderStatus::AwaitingPayment);
    }

    #[test]
    fn lightning_orders_start_pending() {
        let order = Order::new(2, vec![], PaymentMethod::Lightning);
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[test]
    fn payment_data_keeps_unknown_fields() {
        let raw = r#"{"orderId":1,"status":"paid","preimage":"abc","fee":0.01}"#;
        let data: PaymentData = serde_json::from_str(raw).unwrap();
        assert_eq!(data.order_id, 1);
        assert_eq!(data.status, OrderStatus::Paid);
        assert_eq!(data.extra.get("preimage").and_then(|v| v.as_str()), Some("abc"));
    }

    #[test]
    fn prices_serialize_as_floats() {
        let item = LineItem::new("Beer", Decimal::new(15, 1), 2);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["price"], serde_json::json!(1.5));
        assert!(json.get("id").is_none());
    }
}
