use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 通知引擎错误类型
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum NotificationError {
    #[error("配置错误: {message}")]
    Configuration { message: String },

    #[error("文件系统错误: {message}")]
    FileSystem { message: String, path: Option<String> },

    #[error("解析错误: {message}")]
    Parsing { message: String, content_type: String },

    #[error("验证错误: {message}")]
    Validation { message: String, field: Option<String> },

    #[error("通道投递错误: {channel} - {message}")]
    ChannelDelivery { channel: String, message: String },

    #[error("超时错误: {operation} 超时 ({timeout_ms}ms)")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("引擎错误 ({notification_type}): {message}")]
    Engine { notification_type: String, message: String },

    #[error("内部错误: {message}")]
    Internal { message: String },
}

pub type Result<T> = std::result::Result<T, NotificationError>;

impl NotificationError {
    /// 创建配置错误
    pub fn config(message: impl Into<String>) -> Self {
        NotificationError::Configuration {
            message: message.into(),
        }
    }

    /// 创建文件系统错误
    pub fn file_system(message: impl Into<String>, path: Option<String>) -> Self {
        NotificationError::FileSystem {
            message: message.into(),
            path,
        }
    }

    /// 创建验证错误
    pub fn validation(message: impl Into<String>, field: Option<String>) -> Self {
        NotificationError::Validation {
            message: message.into(),
            field,
        }
    }

    /// 创建通道投递错误
    pub fn channel(channel: impl Into<String>, message: impl Into<String>) -> Self {
        NotificationError::ChannelDelivery {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// 创建超时错误
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        NotificationError::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// 将意外故障包装为携带通知类型的引擎错误
    pub fn engine(notification_type: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        NotificationError::Engine {
            notification_type: notification_type.into(),
            message: cause.to_string(),
        }
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        NotificationError::Internal {
            message: message.into(),
        }
    }
}

// 实现从常见错误类型的转换
impl From<std::io::Error> for NotificationError {
    fn from(error: std::io::Error) -> Self {
        NotificationError::FileSystem {
            message: error.to_string(),
            path: None,
        }
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(error: serde_json::Error) -> Self {
        NotificationError::Parsing {
            message: error.to_string(),
            content_type: "JSON".to_string(),
        }
    }
}

impl From<toml::de::Error> for NotificationError {
    fn from(error: toml::de::Error) -> Self {
        NotificationError::Parsing {
            message: error.to_string(),
            content_type: "TOML".to_string(),
        }
    }
}

impl From<serde_yaml::Error> for NotificationError {
    fn from(error: serde_yaml::Error) -> Self {
        NotificationError::Parsing {
            message: error.to_string(),
            content_type: "YAML".to_string(),
        }
    }
}

impl From<anyhow::Error> for NotificationError {
    fn from(error: anyhow::Error) -> Self {
        NotificationError::Internal {
            message: error.to_string(),
        }
    }
}
