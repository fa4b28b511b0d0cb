use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::notification::{
    DeliveryChannel, DeliveryOutcome, HistoryEntry, NotificationRecord, RateLimitKey,
};

/// 一次清理的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub history_expired: usize,
    pub history_truncated: usize,
    pub rate_limits_removed: usize,
    pub active_expired: usize,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.history_expired == 0
            && self.history_truncated == 0
            && self.rate_limits_removed == 0
            && self.active_expired == 0
    }
}

/// 通知存储：活跃通知、历史记录与频率限制时间戳
///
/// 所有读取接口都返回快照副本，调用方不会持有内部集合的引用。
#[derive(Debug, Default)]
pub struct NotificationStore {
    active: RwLock<HashMap<String, NotificationRecord>>,
    history: RwLock<VecDeque<HistoryEntry>>,
    rate_limits: RwLock<HashMap<RateLimitKey, DateTime<Utc>>>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入活跃通知并追加历史，返回最终使用的 ID
    ///
    /// ID 冲突时追加数字后缀；历史长度在追加后立即截断到 `max_history`。
    pub async fn commit(&self, mut record: NotificationRecord, max_history: usize) -> String {
        let mut active = self.active.write().await;
        let base = record.id.clone();
        let mut candidate = base.clone();
        let mut suffix = 1;
        while active.contains_key(&candidate) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        record.id = candidate.clone();
        let entry = record.to_history_entry();
        active.insert(candidate.clone(), record);

        let mut history = self.history.write().await;
        history.push_back(entry);
        while history.len() > max_history {
            history.pop_front();
        }

        candidate
    }

    /// 写入投递结果；记录已被移除时返回 false
    pub async fn set_delivery_status(
        &self,
        id: &str,
        delivery_status: HashMap<DeliveryChannel, DeliveryOutcome>,
    ) -> bool {
        match self.active.write().await.get_mut(id) {
            Some(record) => {
                record.delivery_status = delivery_status;
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, id: &str) -> Option<NotificationRecord> {
        self.active.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<NotificationRecord> {
        self.active.write().await.remove(id)
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.active.read().await.contains_key(id)
    }

    /// 活跃通知快照，按创建时间排序
    pub async fn active_snapshot(&self) -> Vec<NotificationRecord> {
        let mut records: Vec<NotificationRecord> =
            self.active.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    pub async fn append_history(&self, entry: HistoryEntry, max_history: usize) {
        let mut history = self.history.write().await;
        history.push_back(entry);
        while history.len() > max_history {
            history.pop_front();
        }
    }

    pub async fn history_snapshot(&self) -> Vec<HistoryEntry> {
        self.history.read().await.iter().cloned().collect()
    }

    pub async fn history_len(&self) -> usize {
        self.history.read().await.len()
    }

    pub async fn last_sent(&self, key: &RateLimitKey) -> Option<DateTime<Utc>> {
        self.rate_limits.read().await.get(key).copied()
    }

    pub async fn record_sent(&self, key: RateLimitKey, at: DateTime<Utc>) {
        self.rate_limits.write().await.insert(key, at);
    }

    pub async fn rate_limit_snapshot(&self) -> HashMap<RateLimitKey, DateTime<Utc>> {
        self.rate_limits.read().await.clone()
    }

    /// 按年龄和数量裁剪历史，返回 (过期删除数, 超量删除数)
    pub async fn prune_history(&self, cutoff: DateTime<Utc>, max_count: usize) -> (usize, usize) {
        let mut history = self.history.write().await;

        let before = history.len();
        history.retain(|entry| entry.timestamp >= cutoff);
        let expired = before - history.len();

        let mut truncated = 0;
        while history.len() > max_count {
            history.pop_front();
            truncated += 1;
        }

        (expired, truncated)
    }

    /// 移除早于 `cutoff` 的活跃通知，再按创建时间从旧到新裁剪到 `max_count`
    ///
    /// 返回被移除的记录，调用方据此撤销已创建的持久通知。
    pub async fn expire_active(&self, cutoff: DateTime<Utc>, max_count: usize) -> Vec<NotificationRecord> {
        let mut active = self.active.write().await;

        let expired: Vec<String> = active
            .values()
            .filter(|record| record.created_at < cutoff)
            .map(|record| record.id.clone())
            .collect();
        let mut removed: Vec<NotificationRecord> =
            expired.iter().filter_map(|id| active.remove(id)).collect();

        if active.len() > max_count {
            let mut oldest: Vec<(DateTime<Utc>, String)> = active
                .values()
                .map(|record| (record.created_at, record.id.clone()))
                .collect();
            oldest.sort();

            let excess = active.len() - max_count;
            for (_, id) in oldest.into_iter().take(excess) {
                if let Some(record) = active.remove(&id) {
                    removed.push(record);
                }
            }
        }

        removed
    }

    /// 删除快照中判定为过期的频率限制条目
    ///
    /// 只有时间戳仍与快照一致时才删除，期间被重新写入的键保留。
    pub async fn remove_rate_limits(&self, stale: &[(RateLimitKey, DateTime<Utc>)]) -> usize {
        if stale.is_empty() {
            return 0;
        }

        let mut rate_limits = self.rate_limits.write().await;
        let mut removed = 0;
        for (key, seen_at) in stale {
            if rate_limits.get(key) == Some(seen_at) {
                rate_limits.remove(key);
                removed += 1;
            }
        }
        removed
    }

    pub async fn clear(&self) {
        self.active.write().await.clear();
        self.history.write().await.clear();
        self.rate_limits.write().await.clear();
    }
}
