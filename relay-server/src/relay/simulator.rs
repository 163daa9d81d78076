//! 开发辅助: 模拟协助事件
//!
//! 每 30 秒以 20% 概率向员工端广播一条随机桌台的 `server_notification`，
//! 便于在没有真实桌台客户端时调试看板。
//!
//! 仅当 `SIMULATE_ACTIVITY=true` 且非生产环境时启动。

use std::time::Duration;

use rand::Rng;
use shared::message::WireMessage;
use shared::table::AssistanceReason;
use shared::now_ms;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::relay::registry::{Envelope, Scope};

const TICK: Duration = Duration::from_secs(30);
const FIRE_PROBABILITY: f64 = 0.2;

const REASONS: [AssistanceReason; 3] = [
    AssistanceReason::CustomerRequest,
    AssistanceReason::NoInteraction,
    AssistanceReason::PaymentHelp,
];

pub fn spawn(outbound: broadcast::Sender<Envelope>, shutdown: CancellationToken) {
    tracing::info!("Simulated activity enabled (development aid)");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TICK);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let (fire, table_id, reason) = {
                        let mut rng = rand::thread_rng();
                        (
                            rng.gen_bool(FIRE_PROBABILITY),
                            rng.gen_range(1..=10).to_string(),
                            REASONS[rng.gen_range(0..REASONS.len())],
                        )
                    };
                    if !fire {
                        continue;
                    }

                    tracing::debug!(table_id = %table_id, reason = %reason, "Simulated assistance request");
                    let _ = outbound.send(Envelope::new(
                        Scope::Staff,
                        WireMessage::ServerNotification {
                            table_id,
                            reason,
                            timestamp: now_ms(),
                        },
                    ));
                }
            }
        }
    });
}
