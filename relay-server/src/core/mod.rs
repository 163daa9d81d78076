//! 核心模块 - 配置和错误定义
//!
//! # 模块结构
//!
//! - [`Config`] - relay 配置
//! - [`RelayError`] - relay 错误

pub mod config;
pub mod error;

pub use config::Config;
pub use error::{RelayError, Result};
