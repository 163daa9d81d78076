//! Relay client transport
//!
//! A reconnecting, heartbeat-emitting connection to the relay, exposing a
//! typed publish/subscribe surface. Inbound messages fan out through a
//! broadcast hub: one channel per wire `type` plus a firehose channel, so
//! a slow or panicking consumer can never break the transport itself.
//!
//! Lifecycle:
//! - `connect` is idempotent; a second call while open or mid-attempt
//!   returns immediately.
//! - An unexpected close schedules reconnect attempts on a fixed backoff,
//!   bounded by `max_reconnect_attempts`; exhaustion emits the terminal
//!   [`ClientEvent::MaxReconnectAttemptsReached`] and stops retrying until
//!   `connect` is called again.
//! - `send` transmits only while open and never buffers when closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde_json::{Map, Value};
use shared::framing;
use shared::message::{ClientRole, EventKind, WireMessage};
use shared::order::{Order, PaymentData};
use shared::table::{AssistanceReason, TableStatus};
use shared::now_ms;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

const HUB_CHANNEL_CAPACITY: usize = 256;

/// 连接生命周期事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    Reconnecting { attempt: u32 },
    /// 重连次数用尽；直到显式 `connect` 前不再尝试
    MaxReconnectAttemptsReached,
}

/// Per-type subscription hub backed by broadcast channels.
#[derive(Debug)]
struct EventHub {
    all: broadcast::Sender<WireMessage>,
    by_kind: DashMap<EventKind, broadcast::Sender<WireMessage>>,
}

impl EventHub {
    fn new() -> Self {
        let (all, _) = broadcast::channel(HUB_CHANNEL_CAPACITY);
        Self {
            all,
            by_kind: DashMap::new(),
        }
    }

    fn publish(&self, msg: WireMessage) {
        if let Some(tx) = self.by_kind.get(&msg.kind()) {
            let _ = tx.send(msg.clone());
        }
        let _ = self.all.send(msg);
    }

    fn subscribe(&self, kind: EventKind) -> broadcast::Receiver<WireMessage> {
        self.by_kind
            .entry(kind)
            .or_insert_with(|| broadcast::channel(HUB_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    fn subscribe_all(&self) -> broadcast::Receiver<WireMessage> {
        self.all.subscribe()
    }
}

#[derive(Debug)]
struct ActiveConn {
    outbound: mpsc::UnboundedSender<WireMessage>,
    liveness: CancellationToken,
}

#[derive(Debug)]
struct ClientInner {
    config: ClientConfig,
    conn: Mutex<Option<ActiveConn>>,
    connecting: AtomicBool,
    reconnecting: AtomicBool,
    client_id: Mutex<Option<String>>,
    hub: EventHub,
    lifecycle: broadcast::Sender<ClientEvent>,
}

/// Relay Client
///
/// Cheap to clone; all clones share one underlying connection.
#[derive(Debug, Clone)]
pub struct RelayClient {
    inner: Arc<ClientInner>,
}

impl RelayClient {
    pub fn new(config: ClientConfig) -> Self {
        let (lifecycle, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(ClientInner {
                config,
                conn: Mutex::new(None),
                connecting: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                client_id: Mutex::new(None),
                hub: EventHub::new(),
                lifecycle,
            }),
        }
    }

    /// Connect to the relay. Idempotent: returns immediately when already
    /// open or when an attempt is in flight, including an automatic
    /// reconnect waiting out its backoff.
    pub async fn connect(&self) -> ClientResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        if self.inner.reconnecting.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.inner.connecting.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = ClientInner::establish(self.inner.clone()).await;
        self.inner.connecting.store(false, Ordering::SeqCst);
        result
    }

    /// Close the connection. Suppresses automatic reconnection.
    pub fn disconnect(&self) {
        let taken = self.inner.conn.lock().unwrap().take();
        if let Some(conn) = taken {
            conn.liveness.cancel();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .conn
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|c| !c.liveness.is_cancelled())
    }

    /// relay 分配的连接标识 (握手后可用)
    pub fn client_id(&self) -> Option<String> {
        self.inner.client_id.lock().unwrap().clone()
    }

    /// Send a message. Fails without buffering when the transport is closed.
    pub fn send(&self, msg: WireMessage) -> ClientResult<()> {
        let slot = self.inner.conn.lock().unwrap();
        match slot.as_ref() {
            Some(conn) if !conn.liveness.is_cancelled() => conn
                .outbound
                .send(msg)
                .map_err(|_| ClientError::NotConnected),
            _ => Err(ClientError::NotConnected),
        }
    }

    /// `send` 的布尔形式
    pub fn try_send(&self, msg: WireMessage) -> bool {
        if let Err(e) = self.send(msg) {
            tracing::warn!(error = %e, "Message not sent");
            return false;
        }
        true
    }

    /// Subscribe to one wire `type`.
    pub fn subscribe(&self, kind: EventKind) -> broadcast::Receiver<WireMessage> {
        self.inner.hub.subscribe(kind)
    }

    /// Subscribe to every inbound message.
    pub fn subscribe_all(&self) -> broadcast::Receiver<WireMessage> {
        self.inner.hub.subscribe_all()
    }

    /// Subscribe to connection lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.lifecycle.subscribe()
    }

    // ---- Convenience senders ----

    /// 角色/桌台注册，relay 据此过滤广播
    pub fn identify(&self, role: ClientRole, table_id: Option<&str>) -> ClientResult<()> {
        self.send(WireMessage::Identify {
            role,
            table_id: table_id.map(str::to_string),
            timestamp: now_ms(),
        })
    }

    pub fn notify_server(&self, table_id: &str, reason: AssistanceReason) -> ClientResult<()> {
        self.send(WireMessage::ServerNotification {
            table_id: table_id.to_string(),
            reason,
            timestamp: now_ms(),
        })
    }

    pub fn request_assistance(&self, table_id: &str, reason: AssistanceReason) -> ClientResult<()> {
        self.send(WireMessage::AssistanceRequest {
            table_id: table_id.to_string(),
            reason,
            timestamp: now_ms(),
        })
    }

    pub fn clear_assistance(&self, table_id: &str) -> ClientResult<()> {
        self.send(WireMessage::AssistanceCleared {
            table_id: table_id.to_string(),
            timestamp: now_ms(),
        })
    }

    pub fn submit_order(&self, table_id: &str, order: Order) -> ClientResult<()> {
        self.send(WireMessage::OrderSubmitted {
            table_id: table_id.to_string(),
            order,
            timestamp: now_ms(),
        })
    }

    pub fn update_table_status(
        &self,
        table_id: &str,
        status: TableStatus,
        data: Map<String, Value>,
    ) -> ClientResult<()> {
        self.send(WireMessage::TableStatusUpdate {
            table_id: table_id.to_string(),
            status,
            data,
            timestamp: now_ms(),
        })
    }

    pub fn payment_update(&self, table_id: &str, payment_data: PaymentData) -> ClientResult<()> {
        self.send(WireMessage::PaymentUpdate {
            table_id: table_id.to_string(),
            payment_data,
            timestamp: now_ms(),
        })
    }
}

impl ClientInner {
    /// Open the TCP connection and spawn the writer, heartbeat and reader
    /// tasks. Replaces (and closes) any previous connection.
    async fn establish(inner: Arc<ClientInner>) -> ClientResult<()> {
        let addr = inner.config.relay_addr.clone();
        let stream = TcpStream::connect(&addr).await.map_err(|e| {
            ClientError::Connection(format!("connect to {} failed: {}", addr, e))
        })?;
        tracing::info!(relay = %addr, "Connected to relay");

        let (mut read_half, mut write_half) = stream.into_split();
        let liveness = CancellationToken::new();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WireMessage>();
        let heartbeat_tx = outbound_tx.clone();

        {
            let mut slot = inner.conn.lock().unwrap();
            if let Some(old) = slot.take() {
                old.liveness.cancel();
            }
            *slot = Some(ActiveConn {
                outbound: outbound_tx,
                liveness: liveness.clone(),
            });
        }

        // Writer: drains the outbound queue onto the socket.
        {
            let liveness = liveness.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = liveness.cancelled() => break,
                        msg = outbound_rx.recv() => match msg {
                            Some(msg) => {
                                if let Err(e) = framing::write_frame(&mut write_half, &msg).await {
                                    tracing::info!(error = %e, "Relay write failed");
                                    liveness.cancel();
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            });
        }

        // Heartbeat: fixed interval for as long as the connection is open.
        {
            let liveness = liveness.clone();
            let interval = inner.config.heartbeat_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = liveness.cancelled() => break,
                        _ = ticker.tick() => {
                            if heartbeat_tx.send(WireMessage::heartbeat()).is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        // Reader: frames → hub. Decides between explicit close and
        // unexpected drop when the loop ends.
        {
            let liveness = liveness.clone();
            let inner = inner.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = liveness.cancelled() => break,
                        result = framing::read_frame(&mut read_half) => {
                            match result {
                                Ok(raw) => match WireMessage::decode(&raw) {
                                    Ok(msg) => inner.on_message(msg),
                                    Err(e) => {
                                        tracing::warn!(error = %e, "Failed to parse relay message");
                                    }
                                },
                                Err(e) => {
                                    tracing::info!(reason = %e, "Relay connection closed");
                                    break;
                                }
                            }
                        }
                    }
                }

                let explicit = liveness.is_cancelled();
                liveness.cancel();

                // Clear the slot unless a newer connection already took it.
                {
                    let mut slot = inner.conn.lock().unwrap();
                    if slot.as_ref().is_some_and(|c| c.liveness.is_cancelled()) {
                        *slot = None;
                    }
                }

                inner.emit(ClientEvent::Disconnected);
                if !explicit {
                    ClientInner::spawn_reconnect(inner);
                }
            });
        }

        inner.emit(ClientEvent::Connected);
        Ok(())
    }

    /// Bounded fixed-backoff reconnect loop; a single task at a time.
    fn spawn_reconnect(inner: Arc<ClientInner>) {
        if inner.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        tokio::spawn(async move {
            let max = inner.config.max_reconnect_attempts;
            for attempt in 1..=max {
                inner.emit(ClientEvent::Reconnecting { attempt });
                tracing::info!(attempt, max, "Attempting to reconnect");
                tokio::time::sleep(inner.config.reconnect_interval).await;

                match ClientInner::establish(inner.clone()).await {
                    Ok(()) => {
                        inner.reconnecting.store(false, Ordering::SeqCst);
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(attempt, max, error = %e, "Reconnect attempt failed");
                    }
                }
            }

            tracing::error!("Max reconnection attempts reached");
            inner.emit(ClientEvent::MaxReconnectAttemptsReached);
            inner.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    fn on_message(&self, msg: WireMessage) {
        if let WireMessage::Connected { client_id, .. } = &msg {
            tracing::debug!(client_id = %client_id, "Handshake complete");
            *self.client_id.lock().unwrap() = Some(client_id.clone());
        }
        self.hub.publish(msg);
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.lifecycle.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_while_closed_fails_without_buffering() {
        let client = RelayClient::new(ClientConfig::default());
        assert!(!client.is_connected());
        assert!(matches!(
            client.send(WireMessage::heartbeat()),
            Err(ClientError::NotConnected)
        ));
        assert!(!client.try_send(WireMessage::heartbeat()));
    }

    #[tokio::test]
    async fn connect_defers_to_a_reconnect_in_flight() {
        // Against a dead endpoint a real attempt would fail fast; with the
        // reconnect loop marked active, connect must not start a second one.
        let client = RelayClient::new(ClientConfig::default().with_relay_addr("127.0.0.1:1"));
        client.inner.reconnecting.store(true, Ordering::SeqCst);

        client.connect().await.unwrap();
        assert!(!client.is_connected());
        assert!(!client.inner.connecting.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn connect_to_dead_endpoint_rejects() {
        // Port 1 is never a relay.
        let client = RelayClient::new(ClientConfig::default().with_relay_addr("127.0.0.1:1"));
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::Connection(_)));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn hub_delivers_to_typed_and_firehose_subscribers() {
        let client = RelayClient::new(ClientConfig::default());
        let mut typed = client.subscribe(EventKind::Heartbeat);
        let mut all = client.subscribe_all();
        let mut other = client.subscribe(EventKind::Error);

        client.inner.hub.publish(WireMessage::Heartbeat { timestamp: 7 });

        assert_eq!(typed.recv().await.unwrap(), WireMessage::Heartbeat { timestamp: 7 });
        assert_eq!(all.recv().await.unwrap(), WireMessage::Heartbeat { timestamp: 7 });
        assert!(other.try_recv().is_err());
    }
}
