//! TableTab 共享类型库
//!
//! 这些类型在 relay-server 和 clients 之间共享，用于
//! 网络 (TCP) 通信和各端的本地状态建模。
//!
//! # 模块结构
//!
//! - [`message`] - 线上消息类型 (`WireMessage`) 和解码
//! - [`order`] - 订单、行项目、支付数据
//! - [`table`] - 桌台状态和协助原因
//! - [`framing`] - 长度前缀帧读写

pub mod framing;
pub mod message;
pub mod order;
pub mod table;

pub use message::{ClientRole, DecodeError, EventKind, WireMessage};
pub use order::{LineItem, Order, OrderStatus, PaymentData, PaymentMethod};
pub use table::{AssistanceReason, TableState, TableStatus};

/// 当前时间的毫秒时间戳 (线上 `timestamp` 字段)
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
