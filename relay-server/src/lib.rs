//! TableTab Relay Server - 餐厅桌台与员工看板的实时协调中继
//!
//! # 架构概述
//!
//! 本模块是 Relay Server 的主入口，提供以下核心功能：
//!
//! - **连接注册表** (`relay::registry`): uuid 连接标识、角色绑定、死连接清扫
//! - **消息分发** (`relay::dispatch`): 按 `type` 路由、桌台状态维护、作用域广播
//! - **桌台状态** (`relay::tables`): 懒创建的每桌状态包
//!
//! # 模块结构
//!
//! ```text
//! relay-server/src/
//! ├── core/          # 配置、错误
//! └── relay/         # 注册表、分发、桌台状态、清扫
//! ```

pub mod core;
pub mod relay;

// Re-export 公共类型
pub use core::{Config, RelayError, Result};
pub use relay::{Dispatcher, RelayServer};

/// 设置环境 (dotenv + tracing)
///
/// 日志级别由 `RUST_LOG` 控制，默认 `info`。
pub fn setup_environment() {
    dotenv::dotenv().ok();

    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

pub fn print_banner() {
    println!(
        r#"
  ______      __    __    ______      __
 /_  __/___ _/ /_  / /__ /_  __/___ _/ /_
  / / / __ `/ __ \/ / _ \ / / / __ `/ __ \
 / / / /_/ / /_/ / /  __// / / /_/ / /_/ /
/_/  \__,_/_.___/_/\___//_/  \__,_/_.___/
                                   relay
    "#
    );
}
