use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::infrastructure::error::{NotificationError, Result};
use crate::notification::{NotificationPriority, NotificationStore};

/// 频率限制桶的键
///
/// 实体与类型分开保存，`("mr_whiskers", "feeding")` 与 `("mr", "whiskers_feeding")` 是两个桶。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RateLimitKey {
    pub entity_id: String,
    pub notification_type: String,
}

impl RateLimitKey {
    pub fn new(entity_id: impl Into<String>, notification_type: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            notification_type: notification_type.into(),
        }
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_id, self.notification_type)
    }
}

/// 各优先级的最小发送间隔（秒）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitIntervals {
    pub low_secs: u64,
    pub normal_secs: u64,
    pub high_secs: u64,
    /// 仅作记录，最高级别始终豁免
    pub urgent_secs: u64,
}

impl Default for RateLimitIntervals {
    fn default() -> Self {
        Self {
            low_secs: 60 * 60,
            normal_secs: 30 * 60,
            high_secs: 5 * 60,
            urgent_secs: 0,
        }
    }
}

impl RateLimitIntervals {
    pub fn interval_for(&self, priority: NotificationPriority) -> Duration {
        match priority {
            NotificationPriority::Low => Duration::from_secs(self.low_secs),
            NotificationPriority::Normal => Duration::from_secs(self.normal_secs),
            NotificationPriority::High => Duration::from_secs(self.high_secs),
            NotificationPriority::Urgent => Duration::ZERO,
        }
    }

    /// 配置中最长的间隔
    pub fn longest(&self) -> Duration {
        NotificationPriority::ALL
            .iter()
            .map(|priority| self.interval_for(*priority))
            .max()
            .unwrap_or(Duration::ZERO)
    }
}

/// 按 (实体, 类型) 组合键记录上次发送时间的频率限制器
///
/// 时间戳只在一次投递尝试完成后写入；同一键上的并发发送可能同时通过检查，
/// 这是有意接受的宽松保证。
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<NotificationStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<NotificationStore>) -> Self {
        Self { store }
    }

    /// 检查是否允许发送，不修改任何状态
    pub async fn is_allowed(
        &self,
        key: &RateLimitKey,
        priority: NotificationPriority,
        intervals: &RateLimitIntervals,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let interval = intervals.interval_for(priority);
        if interval.is_zero() {
            return Ok(true);
        }

        let Some(last_sent) = self.store.last_sent(key).await else {
            return Ok(true);
        };

        let interval = chrono::Duration::from_std(interval)
            .map_err(|e| NotificationError::internal(format!("rate limit interval out of range: {}", e)))?;

        Ok(now.signed_duration_since(last_sent) >= interval)
    }

    /// 记录一次已完成的投递尝试
    pub async fn record_attempt(&self, key: RateLimitKey, now: DateTime<Utc>) {
        self.store.record_sent(key, now).await;
    }

    pub async fn last_sent(&self, key: &RateLimitKey) -> Option<DateTime<Utc>> {
        self.store.last_sent(key).await
    }

    /// 计算过期阈值：最长间隔加上保留余量
    pub fn stale_cutoff(
        intervals: &RateLimitIntervals,
        margin: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let retention = chrono::Duration::from_std(intervals.longest() + margin)
            .map_err(|e| NotificationError::internal(format!("rate limit retention out of range: {}", e)))?;

        now.checked_sub_signed(retention)
            .ok_or_else(|| NotificationError::internal("rate limit retention underflows the clock"))
    }

    /// 从快照中找出早于阈值的条目
    pub async fn stale_entries(&self, cutoff: DateTime<Utc>) -> Vec<(RateLimitKey, DateTime<Utc>)> {
        self.store
            .rate_limit_snapshot()
            .await
            .into_iter()
            .filter(|(_, last_sent)| *last_sent < cutoff)
            .collect()
    }
}
