use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::notification::{DeliveryChannel, DeliveryOutcome};

/// 单个通道的投递计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCounts {
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// 引擎运行计数器，仅在进程重启时归零
#[derive(Debug, Default)]
pub struct NotificationMetrics {
    notifications_sent: AtomicU64,
    notifications_suppressed: AtomicU64,
    rate_limited_count: AtomicU64,
    delivery_failures: AtomicU64,
    notifications_dismissed: AtomicU64,
    janitor_runs: AtomicU64,
    janitor_errors: AtomicU64,
    validation_failures: AtomicU64,
    channels: RwLock<HashMap<DeliveryChannel, ChannelCounts>>,
}

impl NotificationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.notifications_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dismissed(&self) {
        self.notifications_dismissed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_janitor_run(&self) {
        self.janitor_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_janitor_error(&self) {
        self.janitor_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一个通道的投递结果，失败时同时累加 `delivery_failures`
    pub async fn record_delivery(&self, channel: DeliveryChannel, outcome: DeliveryOutcome) {
        if outcome == DeliveryOutcome::Failed {
            self.delivery_failures.fetch_add(1, Ordering::Relaxed);
        }

        let mut channels = self.channels.write().await;
        let counts = channels.entry(channel).or_default();
        match outcome {
            DeliveryOutcome::Success => counts.success += 1,
            DeliveryOutcome::Failed => counts.failed += 1,
            DeliveryOutcome::Skipped => counts.skipped += 1,
        }
    }

    pub fn delivery_failures(&self) -> u64 {
        self.delivery_failures.load(Ordering::Relaxed)
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let channels = self
            .channels
            .read()
            .await
            .iter()
            .map(|(channel, counts)| (channel.as_str().to_string(), *counts))
            .collect();

        MetricsSnapshot {
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_suppressed: self.notifications_suppressed.load(Ordering::Relaxed),
            rate_limited_count: self.rate_limited_count.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            notifications_dismissed: self.notifications_dismissed.load(Ordering::Relaxed),
            janitor_runs: self.janitor_runs.load(Ordering::Relaxed),
            janitor_errors: self.janitor_errors.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            channels,
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub notifications_sent: u64,
    pub notifications_suppressed: u64,
    pub rate_limited_count: u64,
    pub delivery_failures: u64,
    pub notifications_dismissed: u64,
    pub janitor_runs: u64,
    pub janitor_errors: u64,
    pub validation_failures: u64,
    /// 按通道名排序，便于输出
    pub channels: BTreeMap<String, ChannelCounts>,
}
