//! TCP relay server
//!
//! Architecture, per connection:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 RelayServer                  │
//! │  ┌────────────────────────────────────────┐  │
//! │  │  broadcast::Sender<Envelope>           │  │
//! │  └────────────────────────────────────────┘  │
//! └───────────────┬──────────────────────────────┘
//!                 │ subscribe per connection
//!     ┌───────────┴───────────┐
//!     ▼                       ▼
//! reader task             forwarder task
//! (frames → Dispatcher)   (Envelope → scope filter → socket)
//! ```
//!
//! Every handler reply and broadcast travels the same channel; the
//! forwarder applies the envelope's [`Scope`] against the connection's
//! current registry entry, so `identify` takes effect mid-stream.

pub mod dispatch;
pub mod registry;
pub mod simulator;
pub mod tables;

pub use dispatch::Dispatcher;
pub use registry::{ClientId, ConnectionInfo, ConnectionRegistry, Envelope, Scope};
pub use tables::TableRegistry;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use shared::framing;
use shared::message::WireMessage;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::{Config, Result};

/// Relay 服务器
#[derive(Debug, Clone)]
pub struct RelayServer {
    config: Config,
    registry: Arc<ConnectionRegistry>,
    tables: Arc<TableRegistry>,
    outbound: broadcast::Sender<Envelope>,
    shutdown: CancellationToken,
}

impl RelayServer {
    pub fn new(config: Config) -> Self {
        let (outbound, _) = broadcast::channel(config.channel_capacity);
        Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            tables: Arc::new(TableRegistry::new()),
            outbound,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn tables(&self) -> &Arc<TableRegistry> {
        &self.tables
    }

    /// 获取取消令牌（用于外部触发 shutdown）
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// 优雅关闭: 取消 accept 循环、清扫任务和所有连接任务
    pub fn shutdown(&self) {
        tracing::info!("Shutting down relay server");
        self.shutdown.cancel();
    }

    /// 绑定配置端口并开始服务
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.config.port).into();
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener).await
    }

    /// Serve on an already-bound listener (tests bind to port 0).
    pub async fn serve_on(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("Relay server listening on {}", local_addr);

        self.spawn_sweeper();

        if self.config.simulate_activity && !self.config.is_production() {
            simulator::spawn(self.outbound.clone(), self.shutdown.clone());
        }

        let dispatcher = Dispatcher::new(
            self.registry.clone(),
            self.tables.clone(),
            self.outbound.clone(),
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Relay server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.accept(stream, peer, dispatcher.clone()),
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Accept: register, subscribe, send `connected`, spawn reader+forwarder.
    fn accept(&self, stream: TcpStream, peer: SocketAddr, dispatcher: Dispatcher) {
        let client_id: ClientId = Uuid::new_v4();
        let liveness = self.shutdown.child_token();

        // Subscribe before any task runs so the connection cannot miss a
        // reply dispatched between registration and forwarder startup.
        let outbound_rx = self.outbound.subscribe();

        self.registry
            .register(ConnectionInfo::new(client_id, liveness.clone()));
        tracing::info!(client_id = %client_id, peer = %peer, "Client connected");

        let (read_half, write_half) = stream.into_split();

        self.spawn_forwarder(client_id, write_half, outbound_rx, liveness.clone());
        self.spawn_reader(client_id, read_half, dispatcher, liveness);
    }

    /// Forwarder: greets with `connected`, then delivers scope-matched
    /// envelopes. A write failure marks the connection dead.
    fn spawn_forwarder(
        &self,
        client_id: ClientId,
        mut write_half: tokio::net::tcp::OwnedWriteHalf,
        mut outbound_rx: broadcast::Receiver<Envelope>,
        liveness: CancellationToken,
    ) {
        let registry = self.registry.clone();

        tokio::spawn(async move {
            if let Err(e) = framing::write_frame(&mut write_half, &WireMessage::connected(client_id.to_string())).await {
                tracing::warn!(client_id = %client_id, error = %e, "Failed to send connected handshake");
                liveness.cancel();
                return;
            }

            loop {
                tokio::select! {
                    _ = liveness.cancelled() => break,

                    result = outbound_rx.recv() => {
                        match result {
                            Ok(envelope) => {
                                // Connection already gone from the registry:
                                // skip the send, never queue.
                                let Some(info) = registry.get(&client_id) else {
                                    break;
                                };
                                if !envelope.scope.matches(&info) {
                                    continue;
                                }
                                if let Err(e) = framing::write_frame(&mut write_half, &envelope.message).await {
                                    tracing::info!(client_id = %client_id, error = %e, "Client write failed");
                                    liveness.cancel();
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                tracing::warn!(client_id = %client_id, skipped, "Slow client, messages dropped");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });
    }

    /// Reader: frames → dispatcher. EOF or a transport error removes the
    /// connection; malformed bodies are the dispatcher's business.
    fn spawn_reader(
        &self,
        client_id: ClientId,
        mut read_half: tokio::net::tcp::OwnedReadHalf,
        dispatcher: Dispatcher,
        liveness: CancellationToken,
    ) {
        let registry = self.registry.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = liveness.cancelled() => break,

                    result = framing::read_frame(&mut read_half) => {
                        match result {
                            Ok(raw) => dispatcher.dispatch(client_id, &raw),
                            Err(e) => {
                                tracing::info!(client_id = %client_id, reason = %e, "Client disconnected");
                                break;
                            }
                        }
                    }
                }
            }

            registry.remove(&client_id);
        });
    }

    /// 周期清扫任务: 移除 close 事件漏掉的死连接
    fn spawn_sweeper(&self) {
        let registry = self.registry.clone();
        let shutdown = self.shutdown.clone();
        let interval = Duration::from_secs(self.config.sweep_interval_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately; skip it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = registry.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, "Swept dead connections");
                        }
                    }
                }
            }
        });
    }
}
