use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::notification::{DeliveryChannel, DeliveryOutcome, NotificationPriority, RateLimitKey};

/// 交互按钮
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

impl NotificationAction {
    pub fn new(action: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            title: title.into(),
        }
    }
}

/// 通知请求（调用方输入，仅存在于一次发送过程中）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub entity_id: String,
    pub notification_type: String,
    pub message: String,
    pub title: Option<String>,
    pub priority: NotificationPriority,
    pub data: Option<serde_json::Value>,
    pub channels: Option<Vec<DeliveryChannel>>,
    pub actions: Vec<NotificationAction>,
    pub force: bool,
}

impl NotificationRequest {
    pub fn new(
        entity_id: impl Into<String>,
        notification_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            notification_type: notification_type.into(),
            message: message.into(),
            title: None,
            priority: NotificationPriority::Normal,
            data: None,
            channels: None,
            actions: Vec::new(),
            force: false,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_channels(mut self, channels: Vec<DeliveryChannel>) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    /// 频率限制使用的 (实体, 类型) 键
    pub fn rate_limit_key(&self) -> RateLimitKey {
        RateLimitKey::new(self.entity_id.as_str(), self.notification_type.as_str())
    }
}

/// 活跃通知记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub entity_id: String,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub data: Option<serde_json::Value>,
    pub actions: Vec<NotificationAction>,
    /// 写入时选定的通道，投递尚未完成时也可据此撤销
    pub channels: Vec<DeliveryChannel>,
    pub delivery_status: HashMap<DeliveryChannel, DeliveryOutcome>,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// 由实体 ID、类型和时间戳派生的基础 ID
    pub fn base_id(entity_id: &str, notification_type: &str, at: DateTime<Utc>) -> String {
        format!("{}_{}_{}", entity_id, notification_type, at.timestamp_millis())
    }

    pub fn used_channel(&self, channel: DeliveryChannel) -> bool {
        self.channels.contains(&channel) || self.delivery_status.contains_key(&channel)
    }

    pub fn failed_channels(&self) -> usize {
        self.delivery_status
            .values()
            .filter(|outcome| **outcome == DeliveryOutcome::Failed)
            .count()
    }

    pub fn to_history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            id: self.id.clone(),
            entity_id: self.entity_id.clone(),
            notification_type: self.notification_type.clone(),
            priority: self.priority,
            timestamp: self.created_at,
        }
    }
}

/// 历史记录条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub entity_id: String,
    pub notification_type: String,
    pub priority: NotificationPriority,
    pub timestamp: DateTime<Utc>,
}

/// 交给通道适配器的标准化负载
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPayload {
    pub id: String,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub entity_id: String,
    pub notification_type: String,
    pub data: Option<serde_json::Value>,
    pub actions: Vec<NotificationAction>,
}
