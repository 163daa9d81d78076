//! 桌台会话状态机
//!
//! 每张桌台一个 `TableSession`：跟踪选择、订单、协助标志与不活跃倒计时。
//! 计时以抽象"单位"推进 (`tick`)，不读墙钟，宿主按固定节奏驱动即可；
//! 所有变更经 `&mut self` 串行，支付轮询只挂起提交这一个 future。
//!
//! 倒计时规则:
//! - 会话开始为 60 单位；归零时上报 `no_interaction` 协助并回绕到 60，
//!   会话永不因超时结束。
//! - 任一订单落定后倒计时固定在 3600 单位回绕，不再触发协助，直到清台。

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::{Map, Value, json};
use shared::message::ClientRole;
use shared::order::{LineItem, Order, OrderStatus, PaymentData, PaymentMethod};
use shared::table::{AssistanceReason, TableStatus};

use crate::error::{ClientError, ClientResult};
use crate::mirror::{EventMirror, MirrorEvent, NoopMirror};
use crate::payment::{Invoice, PaymentProvider, TipRecipient, amount_to_sats, payment_uri, split_tip};
use crate::transport::RelayClient;

/// Session timing and payment-poll knobs
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Units of no interaction before assistance is raised
    pub inactivity_limit: u32,
    /// Countdown ceiling once an order has settled
    pub settled_countdown: u32,
    /// Invoice status polls before giving up
    pub poll_attempts: u32,
    /// Delay between polls
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_limit: 60,
            settled_countdown: 3600,
            poll_attempts: 30,
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl SessionConfig {
    /// 测试用: 加速支付轮询
    pub fn with_poll(mut self, attempts: u32, interval: Duration) -> Self {
        self.poll_attempts = attempts;
        self.poll_interval = interval;
        self
    }
}

/// Per-table session state machine
pub struct TableSession {
    table_id: String,
    client: Option<RelayClient>,
    provider: Arc<dyn PaymentProvider>,
    mirror: Arc<dyn EventMirror>,
    config: SessionConfig,

    active: bool,
    countdown: u32,
    units_since_interaction: u32,

    selection: Vec<LineItem>,
    orders: Vec<Order>,
    has_order: bool,

    needs_assistance: bool,
    assistance_reason: Option<AssistanceReason>,

    payment_processing: bool,
    invoice: Option<Invoice>,
    tip: Decimal,
    tip_recipients: Vec<TipRecipient>,
    zapsplits_enabled: bool,
}

impl TableSession {
    pub fn new(table_id: impl Into<String>, provider: Arc<dyn PaymentProvider>) -> Self {
        let config = SessionConfig::default();
        Self {
            table_id: table_id.into(),
            client: None,
            provider,
            mirror: Arc::new(NoopMirror),
            countdown: config.inactivity_limit,
            config,
            active: false,
            units_since_interaction: 0,
            selection: Vec::new(),
            orders: Vec::new(),
            has_order: false,
            needs_assistance: false,
            assistance_reason: None,
            payment_processing: false,
            invoice: None,
            tip: Decimal::ZERO,
            tip_recipients: Vec::new(),
            zapsplits_enabled: false,
        }
    }

    /// Attach a relay client; the session identifies itself as this table.
    pub fn with_client(mut self, client: RelayClient) -> Self {
        if let Err(e) = client.identify(ClientRole::Table, Some(&self.table_id)) {
            tracing::debug!(error = %e, "Identify deferred until connected");
        }
        self.client = Some(client);
        self
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn EventMirror>) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.countdown = config.inactivity_limit;
        self.config = config;
        self
    }

    /// 启用小费分账
    pub fn with_tip_splitting(mut self, recipients: Vec<TipRecipient>) -> Self {
        self.zapsplits_enabled = true;
        self.tip_recipients = recipients;
        self
    }

    // ---- Lifecycle ----

    /// Begin a session: timer armed at the inactivity limit, any stale
    /// assistance flag dropped.
    pub fn start_session(&mut self) {
        self.active = true;
        self.countdown = self.config.inactivity_limit;
        self.units_since_interaction = 0;
        self.needs_assistance = false;
        self.assistance_reason = None;
        tracing::info!(table_id = %self.table_id, "Session started");
        self.relay(|c, t| c.update_table_status(t, TableStatus::Active, Map::new()));
    }

    /// One abstract time unit. No-op while inactive.
    pub fn tick(&mut self) {
        if !self.active {
            return;
        }
        self.units_since_interaction += 1;
        if self.countdown > 0 {
            self.countdown -= 1;
        }
        if self.countdown == 0 {
            if self.has_order {
                self.countdown = self.config.settled_countdown;
            } else {
                if !self.needs_assistance {
                    self.raise_assistance(AssistanceReason::NoInteraction);
                }
                self.countdown = self.config.inactivity_limit;
            }
        }
    }

    /// Customer touched the UI. Resets the inactivity window and clears an
    /// automatically raised `no_interaction` flag; an explicit
    /// `customer_request` stays until toggled or served.
    pub fn interaction(&mut self) {
        if !self.active {
            return;
        }
        self.units_since_interaction = 0;
        if !self.has_order {
            self.countdown = self.config.inactivity_limit;
        }
        if self.assistance_reason == Some(AssistanceReason::NoInteraction) {
            self.clear_assistance();
        }
    }

    /// Call-waiter button: raises `customer_request`, or clears whatever
    /// assistance is pending.
    pub fn toggle_assistance(&mut self) {
        if self.needs_assistance {
            self.clear_assistance();
        } else {
            self.raise_assistance(AssistanceReason::CustomerRequest);
        }
        self.units_since_interaction = 0;
    }

    /// Hard reset: inactive, selection and orders discarded, timer rearmed.
    pub fn clear_session(&mut self) {
        self.active = false;
        self.countdown = self.config.inactivity_limit;
        self.units_since_interaction = 0;
        self.selection.clear();
        self.orders.clear();
        self.has_order = false;
        self.needs_assistance = false;
        self.assistance_reason = None;
        self.payment_processing = false;
        self.invoice = None;
        self.tip = Decimal::ZERO;
        tracing::info!(table_id = %self.table_id, "Session cleared");
        self.relay(|c, t| c.update_table_status(t, TableStatus::Cleared, Map::new()));
    }

    // ---- Selection ----

    /// Add to the current selection, merging with an existing line of the
    /// same name. A zero quantity changes nothing but still counts as
    /// interaction, as does any add.
    pub fn add_to_order(&mut self, item: LineItem) {
        if item.quantity > 0 {
            match self.selection.iter_mut().find(|l| l.name == item.name) {
                Some(line) => line.quantity += item.quantity,
                None => self.selection.push(item),
            }
        }
        self.interaction();
    }

    /// Remove one unit of an item; the line disappears at zero. Unknown
    /// names are ignored. Counts as interaction.
    pub fn remove_from_order(&mut self, name: &str) {
        if let Some(pos) = self.selection.iter().position(|l| l.name == name) {
            if self.selection[pos].quantity > 1 {
                self.selection[pos].quantity -= 1;
            } else {
                self.selection.remove(pos);
            }
        }
        self.interaction();
    }

    /// 当前选择总价 (不含小费)
    pub fn selection_total(&self) -> Decimal {
        self.selection.iter().map(LineItem::subtotal).sum()
    }

    /// Tip added on top of the selection for lightning payments.
    pub fn set_tip(&mut self, tip: Decimal) {
        self.tip = tip.max(Decimal::ZERO);
    }

    // ---- Ordering ----

    /// Submit the current selection as an order.
    ///
    /// `later` settles immediately; `lightning` creates an invoice and polls
    /// until paid or attempts run out. On any payment failure the selection
    /// is preserved and no order is recorded.
    pub async fn submit_order(&mut self, method: PaymentMethod) -> ClientResult<i64> {
        if !self.active {
            return Err(ClientError::Session("no active session".to_string()));
        }
        if self.selection.is_empty() {
            return Err(ClientError::Session("nothing selected".to_string()));
        }
        if self.payment_processing {
            return Err(ClientError::Session("payment already in progress".to_string()));
        }

        let order_id = shared::now_ms();
        match method {
            PaymentMethod::Later => {
                let order = Order::new(order_id, self.selection.clone(), PaymentMethod::Later);
                tracing::info!(table_id = %self.table_id, order_id, total = %order.total(), "Order placed, pay later");
                self.relay(|c, t| c.submit_order(t, order.clone()));
                self.mirror_event("order", serde_json::to_value(&order).unwrap_or(Value::Null));
                self.settle(order);
                Ok(order_id)
            }
            PaymentMethod::Lightning => self.submit_lightning(order_id).await,
        }
    }

    async fn submit_lightning(&mut self, order_id: i64) -> ClientResult<i64> {
        let total = self.selection_total() + self.tip;
        let memo = format!("Table {} order {}", self.table_id, order_id);
        let metadata = json!({ "tableId": self.table_id, "orderId": order_id });

        self.payment_processing = true;
        let invoice = match self.provider.create_invoice(total, &memo, metadata).await {
            Ok(invoice) => invoice,
            Err(e) => {
                self.payment_processing = false;
                return Err(e);
            }
        };
        tracing::info!(
            table_id = %self.table_id,
            order_id,
            uri = %payment_uri(&invoice.payment_request),
            "Awaiting lightning payment"
        );
        self.invoice = Some(invoice.clone());

        let mut paid = false;
        for attempt in 1..=self.config.poll_attempts {
            match self.provider.check_status(&invoice.checking_id).await {
                Ok(status) if status.paid => {
                    paid = true;
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    self.payment_processing = false;
                    self.invoice = None;
                    return Err(e);
                }
            }
            if attempt < self.config.poll_attempts {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        if !paid {
            self.payment_processing = false;
            self.invoice = None;
            return Err(ClientError::Payment(
                "invoice not settled within the polling window".to_string(),
            ));
        }

        let mut order = Order::new(order_id, self.selection.clone(), PaymentMethod::Lightning);
        order.status = OrderStatus::Paid;

        let mut payment = PaymentData::new(order_id, OrderStatus::Paid)
            .with_payment_hash(invoice.payment_hash.clone())
            .with_amount(total);
        if self.zapsplits_enabled && self.tip > Decimal::ZERO && !self.tip_recipients.is_empty() {
            match amount_to_sats(self.tip) {
                Ok(tip_sats) => {
                    let shares = split_tip(tip_sats, &self.tip_recipients);
                    if let Ok(value) = serde_json::to_value(&shares) {
                        payment.extra.insert("tipSplits".to_string(), value);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Tip split skipped"),
            }
        }

        tracing::info!(table_id = %self.table_id, order_id, "Lightning payment confirmed");
        self.relay(|c, t| c.submit_order(t, order.clone()));
        self.relay(|c, t| c.payment_update(t, payment.clone()));
        self.mirror_event("payment", serde_json::to_value(&payment).unwrap_or(Value::Null));

        self.payment_processing = false;
        self.invoice = None;
        self.settle(order);
        Ok(order_id)
    }

    /// Terminal success: record the order and park the timer.
    fn settle(&mut self, order: Order) {
        self.orders.push(order);
        self.has_order = true;
        self.countdown = self.config.settled_countdown;
        self.units_since_interaction = 0;
        self.selection.clear();
        self.tip = Decimal::ZERO;
    }

    // ---- Assistance ----

    fn raise_assistance(&mut self, reason: AssistanceReason) {
        self.needs_assistance = true;
        self.assistance_reason = Some(reason);
        tracing::info!(table_id = %self.table_id, %reason, "Assistance requested");
        self.relay(|c, t| c.request_assistance(t, reason));
    }

    fn clear_assistance(&mut self) {
        self.needs_assistance = false;
        self.assistance_reason = None;
        self.relay(|c, t| c.clear_assistance(t));
    }

    // ---- Plumbing ----

    fn relay<F>(&self, send: F)
    where
        F: FnOnce(&RelayClient, &str) -> ClientResult<()>,
    {
        if let Some(client) = &self.client {
            if let Err(e) = send(client, &self.table_id) {
                tracing::debug!(error = %e, table_id = %self.table_id, "Relay not notified");
            }
        }
    }

    fn mirror_event(&self, kind: &str, payload: Value) {
        let mirror = self.mirror.clone();
        let event = MirrorEvent::new(kind, self.table_id.clone(), payload);
        tokio::spawn(async move {
            let results = mirror.publish(event).await;
            let failed = results.iter().filter(|r| !r.ok).count();
            if failed > 0 {
                tracing::warn!(failed, "Mirror publish partially failed");
            }
        });
    }

    // ---- Accessors ----

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    pub fn units_since_interaction(&self) -> u32 {
        self.units_since_interaction
    }

    pub fn selection(&self) -> &[LineItem] {
        &self.selection
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn has_order(&self) -> bool {
        self.has_order
    }

    pub fn needs_assistance(&self) -> bool {
        self.needs_assistance
    }

    pub fn assistance_reason(&self) -> Option<AssistanceReason> {
        self.assistance_reason
    }

    pub fn is_payment_processing(&self) -> bool {
        self.payment_processing
    }

    pub fn invoice(&self) -> Option<&Invoice> {
        self.invoice.as_ref()
    }
}
