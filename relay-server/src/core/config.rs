/// Relay 配置 - 所有配置项
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | RELAY_PORT | 8080 | TCP 监听端口 |
/// | CHANNEL_CAPACITY | 1024 | 广播通道容量 |
/// | SWEEP_INTERVAL_SECS | 30 | 死连接清扫间隔(秒) |
/// | SIMULATE_ACTIVITY | false | 开发模式: 周期性模拟协助事件 |
/// | ENVIRONMENT | development | 运行环境 |
///
/// # 示例
///
/// ```ignore
/// RELAY_PORT=9000 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP 监听端口
    pub port: u16,
    /// 广播通道容量
    pub channel_capacity: usize,
    /// 死连接清扫间隔(秒)
    pub sweep_interval_secs: u64,
    /// 开发辅助: 周期性向员工端广播模拟协助事件
    pub simulate_activity: bool,
    /// 运行环境: development | staging | production
    pub environment: String,
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("RELAY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            channel_capacity: std::env::var("CHANNEL_CAPACITY")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(1024),
            sweep_interval_secs: std::env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(30),
            simulate_activity: std::env::var("SIMULATE_ACTIVITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
        }
    }

    /// 使用自定义端口覆盖配置
    ///
    /// 常用于测试场景
    pub fn with_port(port: u16) -> Self {
        let mut config = Self::from_env();
        config.port = port;
        config
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
