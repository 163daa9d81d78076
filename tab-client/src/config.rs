//! Client configuration

use std::time::Duration;

/// Client configuration for connecting to the relay and payment provider
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay address, host:port (e.g. "127.0.0.1:8080")
    pub relay_addr: String,

    /// 重连延迟 (固定退避)
    pub reconnect_interval: Duration,

    /// 最大重连尝试次数，用尽后停止直至显式 connect
    pub max_reconnect_attempts: u32,

    /// 心跳间隔
    pub heartbeat_interval: Duration,

    /// LNbits 风格支付提供方地址
    pub lnbits_url: String,

    /// 收款 API key (开发票)
    pub lnbits_invoice_key: Option<String>,

    /// 管理 API key (查询支付状态)
    pub lnbits_admin_key: Option<String>,

    /// 小费分账特性开关
    pub zapsplits_enabled: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_addr: "127.0.0.1:8080".to_string(),
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_attempts: 5,
            heartbeat_interval: Duration::from_secs(30),
            lnbits_url: "https://lnbits.com".to_string(),
            lnbits_invoice_key: None,
            lnbits_admin_key: None,
            zapsplits_enabled: false,
        }
    }
}

impl ClientConfig {
    /// 从环境变量加载配置
    ///
    /// | 环境变量 | 默认值 |
    /// |----------|--------|
    /// | RELAY_ADDR | 127.0.0.1:8080 |
    /// | LNBITS_URL | https://lnbits.com |
    /// | LNBITS_INVOICE_KEY | - |
    /// | LNBITS_ADMIN_KEY | - |
    /// | ZAPSPLITS_ENABLED | false |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            relay_addr: std::env::var("RELAY_ADDR").unwrap_or(defaults.relay_addr),
            lnbits_url: std::env::var("LNBITS_URL").unwrap_or(defaults.lnbits_url),
            lnbits_invoice_key: std::env::var("LNBITS_INVOICE_KEY").ok(),
            lnbits_admin_key: std::env::var("LNBITS_ADMIN_KEY").ok(),
            zapsplits_enabled: std::env::var("ZAPSPLITS_ENABLED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            ..defaults
        }
    }

    pub fn with_relay_addr(mut self, addr: impl Into<String>) -> Self {
        self.relay_addr = addr.into();
        self
    }

    /// 测试用: 缩短重连节奏
    pub fn with_reconnect(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.reconnect_interval = interval;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}
