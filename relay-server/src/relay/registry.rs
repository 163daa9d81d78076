//! Connection registry and broadcast scoping
//!
//! The registry is the single owner of connection metadata. Handlers only
//! touch it through the relay's entry points; nothing hands out references
//! to its interior.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use shared::ClientRole;
use shared::message::WireMessage;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type ClientId = Uuid;

/// 单个连接的注册信息
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ClientId,
    /// `identify` 之前为 Unknown
    pub role: ClientRole,
    pub table_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    /// 连接存活令牌；取消即视为死连接
    pub liveness: CancellationToken,
}

impl ConnectionInfo {
    pub fn new(id: ClientId, liveness: CancellationToken) -> Self {
        Self {
            id,
            role: ClientRole::Unknown,
            table_id: None,
            connected_at: Utc::now(),
            liveness,
        }
    }
}

/// Delivery scope attached to every outbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Reply to exactly one connection.
    Direct(ClientId),
    /// Every open connection, optionally minus the sender.
    All { exclude: Option<ClientId> },
    /// Staff-eligible connections.
    Staff,
    /// Connections bound to one table (staff dashboards included so they
    /// can drop assistance flags).
    Table(String),
}

impl Scope {
    /// Whether a connection should receive an envelope with this scope.
    ///
    /// Connections that never identified receive every broadcast; the
    /// role/table filter only narrows identified connections.
    pub fn matches(&self, conn: &ConnectionInfo) -> bool {
        match self {
            Scope::Direct(id) => conn.id == *id,
            Scope::All { exclude } => Some(conn.id) != *exclude,
            Scope::Staff => matches!(conn.role, ClientRole::Staff | ClientRole::Unknown),
            Scope::Table(table_id) => match conn.role {
                ClientRole::Unknown | ClientRole::Staff => true,
                ClientRole::Table => conn.table_id.as_deref() == Some(table_id.as_str()),
            },
        }
    }
}

/// 出站信封: 范围 + 消息
#[derive(Debug, Clone)]
pub struct Envelope {
    pub scope: Scope,
    pub message: WireMessage,
}

impl Envelope {
    pub fn new(scope: Scope, message: WireMessage) -> Self {
        Self { scope, message }
    }
}

/// 连接注册表
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    conns: DashMap<ClientId, ConnectionInfo>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            conns: DashMap::new(),
        }
    }

    pub fn register(&self, info: ConnectionInfo) {
        tracing::debug!(client_id = %info.id, "Connection registered");
        self.conns.insert(info.id, info);
    }

    /// 幂等移除: 取消存活令牌并删除条目
    pub fn remove(&self, id: &ClientId) {
        if let Some((_, info)) = self.conns.remove(id) {
            info.liveness.cancel();
            tracing::debug!(client_id = %id, "Connection removed");
        }
    }

    /// `identify` 处理: 绑定角色和桌台
    pub fn identify(&self, id: &ClientId, role: ClientRole, table_id: Option<String>) {
        if let Some(mut entry) = self.conns.get_mut(id) {
            tracing::info!(client_id = %id, role = %role, table_id = ?table_id, "Client identified");
            entry.role = role;
            entry.table_id = table_id;
        }
    }

    pub fn get(&self, id: &ClientId) -> Option<ConnectionInfo> {
        self.conns.get(id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Defensive cleanup for close events that never fired: drop every
    /// entry whose liveness token is already cancelled.
    pub fn sweep(&self) -> usize {
        let dead: Vec<ClientId> = self
            .conns
            .iter()
            .filter(|entry| entry.liveness.is_cancelled())
            .map(|entry| entry.id)
            .collect();

        for id in &dead {
            self.conns.remove(id);
        }
        dead.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(role: ClientRole, table_id: Option<&str>) -> ConnectionInfo {
        let mut info = ConnectionInfo::new(Uuid::new_v4(), CancellationToken::new());
        info.role = role;
        info.table_id = table_id.map(str::to_string);
        info
    }

    #[test]
    fn staff_scope_includes_unidentified_connections() {
        let staff = conn(ClientRole::Staff, None);
        let unknown = conn(ClientRole::Unknown, None);
        let table = conn(ClientRole::Table, Some("5"));

        assert!(Scope::Staff.matches(&staff));
        assert!(Scope::Staff.matches(&unknown));
        assert!(!Scope::Staff.matches(&table));
    }

    #[test]
    fn table_scope_filters_other_tables_only() {
        let scope = Scope::Table("5".into());
        assert!(scope.matches(&conn(ClientRole::Table, Some("5"))));
        assert!(!scope.matches(&conn(ClientRole::Table, Some("7"))));
        assert!(scope.matches(&conn(ClientRole::Staff, None)));
        assert!(scope.matches(&conn(ClientRole::Unknown, None)));
    }

    #[test]
    fn all_scope_excludes_only_the_sender() {
        let a = conn(ClientRole::Unknown, None);
        let b = conn(ClientRole::Unknown, None);
        let scope = Scope::All { exclude: Some(a.id) };
        assert!(!scope.matches(&a));
        assert!(scope.matches(&b));
    }

    #[test]
    fn sweep_removes_cancelled_connections() {
        let registry = ConnectionRegistry::new();
        let live = conn(ClientRole::Unknown, None);
        let dead = conn(ClientRole::Unknown, None);
        dead.liveness.cancel();

        registry.register(live.clone());
        registry.register(dead.clone());
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.sweep(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&live.id).is_some());
        assert!(registry.get(&dead.id).is_none());

        // Idempotent: nothing left to sweep.
        assert_eq!(registry.sweep(), 0);
    }

    #[test]
    fn remove_is_idempotent_and_cancels_liveness() {
        let registry = ConnectionRegistry::new();
        let info = conn(ClientRole::Unknown, None);
        let token = info.liveness.clone();
        let id = info.id;

        registry.register(info);
        registry.remove(&id);
        assert!(token.is_cancelled());
        registry.remove(&id); // no-op
        assert!(registry.is_empty());
    }
}
