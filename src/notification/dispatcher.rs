use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, FutureExt};
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;

use crate::infrastructure::error::NotificationError;
use crate::notification::{
    ChannelPayload, DeliveryChannel, DeliveryOutcome, NotificationMetrics, PersistentNotifier,
    ServiceRegistry,
};

/// 一次扇出的结果，每个尝试过的通道恰好一条
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivery_status: HashMap<DeliveryChannel, DeliveryOutcome>,
}

impl DispatchReport {
    pub fn outcome(&self, channel: DeliveryChannel) -> Option<DeliveryOutcome> {
        self.delivery_status.get(&channel).copied()
    }

    pub fn successes(&self) -> usize {
        self.count(DeliveryOutcome::Success)
    }

    pub fn failures(&self) -> usize {
        self.count(DeliveryOutcome::Failed)
    }

    fn count(&self, outcome: DeliveryOutcome) -> usize {
        self.delivery_status.values().filter(|o| **o == outcome).count()
    }
}

/// 通道分发器
///
/// 所有通道并发执行，单个通道受 `channel_timeout` 约束，整体受 `dispatch_timeout` 约束。
/// 任一通道失败都不会影响其他通道。
pub struct ChannelDispatcher {
    registry: Arc<dyn ServiceRegistry>,
    persistent: Arc<dyn PersistentNotifier>,
    metrics: Arc<NotificationMetrics>,
}

impl ChannelDispatcher {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        persistent: Arc<dyn PersistentNotifier>,
        metrics: Arc<NotificationMetrics>,
    ) -> Self {
        Self {
            registry,
            persistent,
            metrics,
        }
    }

    pub async fn dispatch(
        &self,
        channels: &[DeliveryChannel],
        payload: &ChannelPayload,
        channel_timeout: Duration,
        dispatch_timeout: Duration,
    ) -> DispatchReport {
        let deadline = Instant::now() + dispatch_timeout;
        let mut delivery_status = HashMap::with_capacity(channels.len());

        {
            let mut pending: FuturesUnordered<_> = channels
                .iter()
                .map(|&channel| async move {
                    let outcome = AssertUnwindSafe(self.deliver(channel, payload, channel_timeout))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| {
                            let error = NotificationError::channel(
                                channel.to_string(),
                                format!("adapter panicked: {}", panic_message(&*panic)),
                            );
                            tracing::error!(id = %payload.id, channel = %channel, error = %error, "Channel adapter panicked");
                            DeliveryOutcome::Failed
                        });
                    (channel, outcome)
                })
                .collect();

            loop {
                match tokio::time::timeout_at(deadline, pending.next()).await {
                    Ok(Some((channel, outcome))) => {
                        delivery_status.insert(channel, outcome);
                    }
                    Ok(None) => break,
                    Err(_) => {
                        tracing::warn!(
                            id = %payload.id,
                            unfinished = pending.len(),
                            timeout_ms = dispatch_timeout.as_millis() as u64,
                            "Dispatch deadline reached, abandoning unfinished channels"
                        );
                        break;
                    }
                }
            }
        }

        // 截止时仍未完成的通道记为失败
        for channel in channels {
            delivery_status.entry(*channel).or_insert(DeliveryOutcome::Failed);
        }

        for (channel, outcome) in &delivery_status {
            self.metrics.record_delivery(*channel, *outcome).await;
        }

        DispatchReport { delivery_status }
    }

    async fn deliver(
        &self,
        channel: DeliveryChannel,
        payload: &ChannelPayload,
        timeout: Duration,
    ) -> DeliveryOutcome {
        match channel {
            DeliveryChannel::Persistent => {
                bounded(
                    channel,
                    None,
                    timeout,
                    self.persistent.create(&payload.id, &payload.title, &payload.message),
                )
                .await
            }
            DeliveryChannel::MobilePush => self.deliver_push(payload, timeout).await,
            _ => bounded(channel, None, timeout, self.registry.call(channel, None, payload)).await,
        }
    }

    /// 推送通道按已注册设备逐一发送，至少一个成功即视为成功
    async fn deliver_push(&self, payload: &ChannelPayload, timeout: Duration) -> DeliveryOutcome {
        let channel = DeliveryChannel::MobilePush;

        let targets = match tokio::time::timeout(timeout, self.registry.targets(channel)).await {
            Ok(Ok(targets)) => targets,
            Ok(Err(e)) => {
                tracing::warn!(channel = %channel, error = %e, "Failed to list push targets");
                return DeliveryOutcome::Failed;
            }
            Err(_) => {
                tracing::warn!(channel = %channel, "Listing push targets timed out");
                return DeliveryOutcome::Failed;
            }
        };

        if targets.is_empty() {
            tracing::debug!(id = %payload.id, "No push targets registered, skipping");
            return DeliveryOutcome::Skipped;
        }

        let outcomes = join_all(targets.iter().map(|target| {
            bounded(
                channel,
                Some(target.as_str()),
                timeout,
                self.registry.call(channel, Some(target.as_str()), payload),
            )
        }))
        .await;

        if outcomes.contains(&DeliveryOutcome::Success) {
            DeliveryOutcome::Success
        } else {
            DeliveryOutcome::Failed
        }
    }
}

async fn bounded<F>(
    channel: DeliveryChannel,
    target: Option<&str>,
    timeout: Duration,
    call: F,
) -> DeliveryOutcome
where
    F: Future<Output = anyhow::Result<()>>,
{
    let error = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(())) => return DeliveryOutcome::Success,
        Ok(Err(e)) => NotificationError::channel(channel.to_string(), format!("{:#}", e)),
        Err(_) => NotificationError::timeout(format!("{} delivery", channel), timeout.as_millis() as u64),
    };

    tracing::warn!(channel = %channel, target = target.unwrap_or("-"), error = %error, "Channel delivery failed");
    DeliveryOutcome::Failed
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotificationPriority;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct TestRegistry {
        push_targets: Vec<String>,
        failing: Vec<DeliveryChannel>,
        failing_targets: Vec<String>,
        slow: Option<DeliveryChannel>,
        panicking: Option<DeliveryChannel>,
        calls: AtomicU32,
    }

    impl TestRegistry {
        fn new() -> Self {
            Self {
                push_targets: vec![],
                failing: vec![],
                failing_targets: vec![],
                slow: None,
                panicking: None,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ServiceRegistry for TestRegistry {
        async fn targets(&self, _channel: DeliveryChannel) -> anyhow::Result<Vec<String>> {
            Ok(self.push_targets.clone())
        }

        async fn call(
            &self,
            channel: DeliveryChannel,
            target: Option<&str>,
            _payload: &ChannelPayload,
        ) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.slow == Some(channel) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if self.panicking == Some(channel) {
                panic!("{} adapter bug", channel);
            }
            if self.failing.contains(&channel) {
                anyhow::bail!("{} is down", channel);
            }
            if let Some(target) = target {
                if self.failing_targets.iter().any(|t| t == target) {
                    anyhow::bail!("device {} unreachable", target);
                }
            }
            Ok(())
        }
    }

    struct NoopPersistent;

    #[async_trait]
    impl PersistentNotifier for NoopPersistent {
        async fn create(&self, _id: &str, _title: &str, _message: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn dismiss(&self, _id: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn payload() -> ChannelPayload {
        ChannelPayload {
            id: "buddy_feeding_1".to_string(),
            title: "Feeding".to_string(),
            message: "Time to feed!".to_string(),
            priority: NotificationPriority::Normal,
            entity_id: "buddy".to_string(),
            notification_type: "feeding".to_string(),
            data: None,
            actions: vec![],
        }
    }

    fn dispatcher(registry: TestRegistry) -> (ChannelDispatcher, Arc<NotificationMetrics>) {
        let metrics = Arc::new(NotificationMetrics::new());
        (
            ChannelDispatcher::new(Arc::new(registry), Arc::new(NoopPersistent), metrics.clone()),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_one_failing_channel_is_isolated() {
        let mut registry = TestRegistry::new();
        registry.failing = vec![DeliveryChannel::Webhook];
        let (dispatcher, metrics) = dispatcher(registry);

        let report = dispatcher
            .dispatch(
                &[DeliveryChannel::Persistent, DeliveryChannel::Webhook, DeliveryChannel::Chat],
                &payload(),
                Duration::from_secs(1),
                Duration::from_secs(2),
            )
            .await;

        assert_eq!(report.successes(), 2);
        assert_eq!(report.failures(), 1);
        assert_eq!(report.outcome(DeliveryChannel::Webhook), Some(DeliveryOutcome::Failed));
        assert_eq!(metrics.delivery_failures(), 1);
    }

    #[tokio::test]
    async fn test_push_fans_out_per_target() {
        let mut registry = TestRegistry::new();
        registry.push_targets = vec!["phone".to_string(), "tablet".to_string()];
        registry.failing_targets = vec!["tablet".to_string()];
        let registry = Arc::new(registry);
        let metrics = Arc::new(NotificationMetrics::new());
        let dispatcher = ChannelDispatcher::new(registry.clone(), Arc::new(NoopPersistent), metrics);

        let report = dispatcher
            .dispatch(&[DeliveryChannel::MobilePush], &payload(), Duration::from_secs(1), Duration::from_secs(2))
            .await;

        assert_eq!(registry.calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.outcome(DeliveryChannel::MobilePush), Some(DeliveryOutcome::Success));
    }

    #[tokio::test]
    async fn test_push_without_targets_is_skipped() {
        let (dispatcher, metrics) = dispatcher(TestRegistry::new());

        let report = dispatcher
            .dispatch(&[DeliveryChannel::MobilePush], &payload(), Duration::from_secs(1), Duration::from_secs(2))
            .await;

        assert_eq!(report.outcome(DeliveryChannel::MobilePush), Some(DeliveryOutcome::Skipped));
        assert_eq!(metrics.delivery_failures(), 0);
    }

    #[tokio::test]
    async fn test_slow_channel_times_out() {
        let mut registry = TestRegistry::new();
        registry.slow = Some(DeliveryChannel::Tts);
        let (dispatcher, metrics) = dispatcher(registry);

        let report = dispatcher
            .dispatch(
                &[DeliveryChannel::Tts, DeliveryChannel::Chat],
                &payload(),
                Duration::from_millis(50),
                Duration::from_millis(200),
            )
            .await;

        assert_eq!(report.outcome(DeliveryChannel::Tts), Some(DeliveryOutcome::Failed));
        assert_eq!(report.outcome(DeliveryChannel::Chat), Some(DeliveryOutcome::Success));
        assert_eq!(metrics.delivery_failures(), 1);
    }

    #[tokio::test]
    async fn test_overall_deadline_marks_unfinished_failed() {
        let mut registry = TestRegistry::new();
        registry.slow = Some(DeliveryChannel::Webhook);
        let (dispatcher, _) = dispatcher(registry);

        // 单通道超时大于整体截止时间，整体截止先触发
        let report = dispatcher
            .dispatch(
                &[DeliveryChannel::Webhook, DeliveryChannel::Persistent],
                &payload(),
                Duration::from_secs(10),
                Duration::from_millis(100),
            )
            .await;

        assert_eq!(report.delivery_status.len(), 2);
        assert_eq!(report.outcome(DeliveryChannel::Webhook), Some(DeliveryOutcome::Failed));
        assert_eq!(report.outcome(DeliveryChannel::Persistent), Some(DeliveryOutcome::Success));
    }

    #[tokio::test]
    async fn test_panicking_adapter_is_isolated() {
        let mut registry = TestRegistry::new();
        registry.panicking = Some(DeliveryChannel::Chat);
        let (dispatcher, metrics) = dispatcher(registry);

        let report = dispatcher
            .dispatch(
                &[DeliveryChannel::Persistent, DeliveryChannel::Chat, DeliveryChannel::Webhook],
                &payload(),
                Duration::from_secs(1),
                Duration::from_secs(2),
            )
            .await;

        assert_eq!(report.delivery_status.len(), 3);
        assert_eq!(report.outcome(DeliveryChannel::Chat), Some(DeliveryOutcome::Failed));
        assert_eq!(report.successes(), 2);
        assert_eq!(metrics.delivery_failures(), 1);
    }
}
