use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("帧错误: {0}")]
    Frame(#[from] shared::framing::FrameError),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn internal(msg: impl Into<String>) -> Self {
        RelayError::Internal(msg.into())
    }
}

/// relay 的 Result 类型别名
pub type Result<T> = std::result::Result<T, RelayError>;
