pub mod clock;
pub mod message;
pub mod quiet_hours;
pub mod rate_limiter;
pub mod store;
pub mod policy;
pub mod delivery;
pub mod dispatcher;
pub mod janitor;
pub mod metrics;
pub mod providers;
pub mod engine;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::infrastructure::error::NotificationError;

pub use clock::{Clock, ManualClock, SystemClock};
pub use message::{
    ChannelPayload, HistoryEntry, NotificationAction, NotificationRecord, NotificationRequest,
};
pub use quiet_hours::QuietHours;
pub use rate_limiter::{RateLimitIntervals, RateLimitKey, RateLimiter};
pub use store::{CleanupReport, NotificationStore};
pub use policy::{BypassFlags, GateDecision, PolicyEngine, SuppressionReason};
pub use delivery::DeliveryMethodSelector;
pub use dispatcher::{ChannelDispatcher, DispatchReport};
pub use janitor::{Janitor, JanitorState};
pub use metrics::{MetricsSnapshot, NotificationMetrics};
pub use providers::{
    fallback_display_name, DisplayNameResolver, PersistentNotifier, ServiceRegistry,
};
pub use engine::{EngineCollaborators, NotificationEngine};

/// 通知优先级，`Urgent` 为最高级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
    #[serde(alias = "critical")]
    Urgent,
}

impl NotificationPriority {
    pub const ALL: [NotificationPriority; 4] = [
        NotificationPriority::Low,
        NotificationPriority::Normal,
        NotificationPriority::High,
        NotificationPriority::Urgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "high",
            NotificationPriority::Urgent => "urgent",
        }
    }

    /// 最高级别的通知不受静默时段和频率限制约束
    pub fn is_top_tier(&self) -> bool {
        matches!(self, NotificationPriority::Urgent)
    }
}

impl Default for NotificationPriority {
    fn default() -> Self {
        NotificationPriority::Normal
    }
}

impl fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationPriority {
    type Err = NotificationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(NotificationPriority::Low),
            "normal" => Ok(NotificationPriority::Normal),
            "high" => Ok(NotificationPriority::High),
            "urgent" | "critical" => Ok(NotificationPriority::Urgent),
            other => Err(NotificationError::validation(
                format!("unknown priority '{}'", other),
                Some("priority".to_string()),
            )),
        }
    }
}

/// 投递通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    /// 宿主界面中的常驻通知卡片
    Persistent,
    /// 推送通知，按已注册设备逐一发送
    MobilePush,
    /// 语音播报
    Tts,
    Webhook,
    Chat,
}

impl DeliveryChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryChannel::Persistent => "persistent",
            DeliveryChannel::MobilePush => "mobile_push",
            DeliveryChannel::Tts => "tts",
            DeliveryChannel::Webhook => "webhook",
            DeliveryChannel::Chat => "chat",
        }
    }
}

impl fmt::Display for DeliveryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryChannel {
    type Err = NotificationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "persistent" => Ok(DeliveryChannel::Persistent),
            "mobile_push" | "push" => Ok(DeliveryChannel::MobilePush),
            "tts" => Ok(DeliveryChannel::Tts),
            "webhook" => Ok(DeliveryChannel::Webhook),
            "chat" => Ok(DeliveryChannel::Chat),
            other => Err(NotificationError::validation(
                format!("unknown delivery channel '{}'", other),
                Some("channels".to_string()),
            )),
        }
    }
}

/// 单个通道的投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Success,
    Failed,
    /// 推送通道没有任何已注册设备
    Skipped,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Success => "success",
            DeliveryOutcome::Failed => "failed",
            DeliveryOutcome::Skipped => "skipped",
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
