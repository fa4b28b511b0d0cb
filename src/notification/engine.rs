use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::{EngineConfig, EntityPreferences, SettingsProvider};
use crate::infrastructure::error::{NotificationError, Result};
use crate::notification::{
    fallback_display_name, BypassFlags, ChannelDispatcher, ChannelPayload, Clock, DeliveryChannel,
    DeliveryMethodSelector, DeliveryOutcome, DisplayNameResolver, GateDecision, HistoryEntry, Janitor, JanitorState,
    MetricsSnapshot, NotificationAction, NotificationMetrics, NotificationPriority, NotificationRecord,
    NotificationRequest, NotificationStore, PersistentNotifier, PolicyEngine, RateLimiter,
    ServiceRegistry, SystemClock,
};

/// 测试通知的类型标签
pub const TEST_NOTIFICATION_TYPE: &str = "test";

const DEFAULT_TEST_MESSAGE: &str =
    "This is a test notification. If you can read this, delivery is working.";

/// 引擎依赖的外部协作方
#[derive(Clone)]
pub struct EngineCollaborators {
    pub registry: Arc<dyn ServiceRegistry>,
    pub persistent: Arc<dyn PersistentNotifier>,
    pub names: Arc<dyn DisplayNameResolver>,
}

/// 通知分发引擎
///
/// 每个实例独立拥有自己的存储、指标和后台清理任务，没有全局单例。
/// 宿主通过构造时传入的 `CancellationToken` 触发关闭。
pub struct NotificationEngine {
    settings: Arc<dyn SettingsProvider>,
    names: Arc<dyn DisplayNameResolver>,
    persistent: Arc<dyn PersistentNotifier>,
    clock: Arc<dyn Clock>,
    config: Arc<RwLock<EngineConfig>>,
    store: Arc<NotificationStore>,
    rate_limiter: RateLimiter,
    policy: PolicyEngine,
    dispatcher: ChannelDispatcher,
    janitor: Janitor,
    metrics: Arc<NotificationMetrics>,
    host_shutdown: CancellationToken,
    closed: CancellationToken,
    initialized: AtomicBool,
    shut_down: AtomicBool,
    shutdown_hook: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationEngine {
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        collaborators: EngineCollaborators,
        host_shutdown: CancellationToken,
    ) -> Arc<Self> {
        Self::with_clock(settings, collaborators, Arc::new(SystemClock), host_shutdown)
    }

    pub fn with_clock(
        settings: Arc<dyn SettingsProvider>,
        collaborators: EngineCollaborators,
        clock: Arc<dyn Clock>,
        host_shutdown: CancellationToken,
    ) -> Arc<Self> {
        let store = Arc::new(NotificationStore::new());
        let metrics = Arc::new(NotificationMetrics::new());
        let config = Arc::new(RwLock::new(EngineConfig::default()));
        let rate_limiter = RateLimiter::new(store.clone());

        Arc::new(Self {
            policy: PolicyEngine::new(rate_limiter.clone(), clock.clone()),
            dispatcher: ChannelDispatcher::new(
                collaborators.registry,
                collaborators.persistent.clone(),
                metrics.clone(),
            ),
            janitor: Janitor::new(
                store.clone(),
                collaborators.persistent.clone(),
                config.clone(),
                clock.clone(),
                metrics.clone(),
            ),
            settings,
            names: collaborators.names,
            persistent: collaborators.persistent,
            clock,
            config,
            store,
            rate_limiter,
            metrics,
            host_shutdown,
            closed: CancellationToken::new(),
            initialized: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            shutdown_hook: Mutex::new(None),
        })
    }

    /// 加载配置、启动后台清理并注册关闭钩子
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(NotificationError::internal("notification engine has been shut down"));
        }

        self.reload_config().await?;

        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.janitor.start(&self.host_shutdown);
        self.register_shutdown_hook();

        let config = self.config.read().await;
        tracing::info!(
            enabled = config.enabled,
            quiet_hours = config.quiet_hours.enabled,
            rate_limiting = config.rate_limiting.enabled,
            "Notification engine initialized"
        );

        Ok(())
    }

    fn register_shutdown_hook(self: &Arc<Self>) {
        let engine = Arc::downgrade(self);
        let host = self.host_shutdown.clone();
        let closed = self.closed.clone();

        let hook = tokio::spawn(async move {
            tokio::select! {
                _ = host.cancelled() => {
                    if let Some(engine) = engine.upgrade() {
                        tracing::debug!("Host shutdown requested");
                        engine.shutdown().await;
                    }
                }
                _ = closed.cancelled() => {}
            }
        });

        *self.shutdown_hook.lock().unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    /// 依次停止清理任务、撤销所有活跃通知、清空存储；重复调用无副作用
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.closed.cancel();
        self.shutdown_hook.lock().unwrap_or_else(|e| e.into_inner()).take();

        self.janitor.stop().await;

        let active = self.store.active_snapshot().await;
        let total = active.len();
        let mut dismissed = 0;
        for record in active {
            if self.dismiss(&record.id).await {
                dismissed += 1;
            }
        }

        self.store.clear().await;

        tracing::info!(dismissed, total, "Notification engine shut down");
    }

    /// 重新读取配置
    pub async fn reload_config(&self) -> Result<()> {
        self.settings.reload()?;
        let config = self.settings.engine_config()?;
        *self.config.write().await = config;
        tracing::debug!("Notification configuration reloaded");
        Ok(())
    }

    /// 发送通知
    ///
    /// 校验失败或被抑制时返回 `Ok(false)`；门控通过后无论各通道结果如何都返回 `Ok(true)`。
    /// 只有非预期的内部错误才返回 `Err(NotificationError::Engine)`。
    pub async fn send(&self, request: NotificationRequest) -> Result<bool> {
        if let Err(e) = PolicyEngine::validate(&request) {
            self.metrics.record_validation_failure();
            tracing::debug!(error = %e, "Rejected invalid notification request");
            return Ok(false);
        }

        if self.shut_down.load(Ordering::SeqCst) {
            tracing::debug!(
                entity_id = %request.entity_id,
                notification_type = %request.notification_type,
                "Notification engine is shut down, dropping request"
            );
            return Ok(false);
        }

        let notification_type = request.notification_type.clone();
        self.send_validated(request).await.map_err(|e| match e {
            NotificationError::Engine { .. } => e,
            other => NotificationError::engine(notification_type, other),
        })
    }

    /// 以字符串形式给出优先级的发送入口，未知优先级视为校验失败
    pub async fn send_raw(
        &self,
        entity_id: &str,
        notification_type: &str,
        message: &str,
        priority: &str,
    ) -> Result<bool> {
        let priority = match priority.parse::<NotificationPriority>() {
            Ok(priority) => priority,
            Err(e) => {
                self.metrics.record_validation_failure();
                tracing::debug!(error = %e, "Rejected notification with unknown priority");
                return Ok(false);
            }
        };

        self.send(NotificationRequest::new(entity_id, notification_type, message).with_priority(priority))
            .await
    }

    /// 发送诊断用测试通知，绕过所有门控
    pub async fn send_test(
        &self,
        entity_id: &str,
        message: Option<&str>,
        priority: Option<NotificationPriority>,
    ) -> Result<bool> {
        let name = self.display_name(entity_id).await;
        let request = NotificationRequest::new(
            entity_id,
            TEST_NOTIFICATION_TYPE,
            message.unwrap_or(DEFAULT_TEST_MESSAGE),
        )
        .with_title(format!("Test notification for {}", name))
        .with_priority(priority.unwrap_or_default())
        .with_action(NotificationAction::new("ACKNOWLEDGE", "Acknowledge"))
        .with_action(NotificationAction::new("DISMISS", "Dismiss"))
        .forced();

        self.send(request).await
    }

    async fn send_validated(&self, request: NotificationRequest) -> Result<bool> {
        let config = self.config.read().await.clone();
        let entity_settings = self.settings.entity_settings(&request.entity_id)?;
        let preferences = EntityPreferences::resolve(entity_settings.as_ref(), &config);
        let bypass = BypassFlags::for_request(request.force, request.priority);

        match self.policy.evaluate(&request, bypass, &config, &preferences).await? {
            GateDecision::Allow => {}
            GateDecision::Suppressed(reason) => {
                self.metrics.record_suppressed();
                tracing::debug!(
                    entity_id = %request.entity_id,
                    notification_type = %request.notification_type,
                    %reason,
                    "Notification suppressed"
                );
                return Ok(false);
            }
            GateDecision::RateLimited => {
                self.metrics.record_rate_limited();
                tracing::debug!(
                    entity_id = %request.entity_id,
                    notification_type = %request.notification_type,
                    priority = %request.priority,
                    "Notification rate limited"
                );
                return Ok(false);
            }
        }

        let channels = DeliveryMethodSelector::select(&request, &preferences);
        let title = match request.title.clone() {
            Some(title) => title,
            None => self.default_title(&request).await,
        };

        let created_at = self.clock.now();
        let record = NotificationRecord {
            id: NotificationRecord::base_id(&request.entity_id, &request.notification_type, created_at),
            entity_id: request.entity_id.clone(),
            notification_type: request.notification_type.clone(),
            title,
            message: request.message.clone(),
            priority: request.priority,
            data: request.data.clone(),
            actions: request.actions.clone(),
            channels: channels.clone(),
            delivery_status: HashMap::new(),
            created_at,
        };
        let payload = ChannelPayload {
            id: String::new(),
            title: record.title.clone(),
            message: record.message.clone(),
            priority: record.priority,
            entity_id: record.entity_id.clone(),
            notification_type: record.notification_type.clone(),
            data: record.data.clone(),
            actions: record.actions.clone(),
        };

        // 先写入以确定唯一 ID，通道拿到的 ID 与存储中的一致
        let id = self.store.commit(record, config.history.max_count).await;
        let payload = ChannelPayload { id: id.clone(), ..payload };

        let report = self
            .dispatcher
            .dispatch(&channels, &payload, config.channel_timeout(), config.dispatch_timeout())
            .await;

        let successes = report.successes();
        let failures = report.failures();
        let persistent_created = report.outcome(DeliveryChannel::Persistent) == Some(DeliveryOutcome::Success);
        if !self.store.set_delivery_status(&id, report.delivery_status).await && persistent_created {
            // 投递期间记录已被撤销或清理，持久通知是在那之后才创建的
            tracing::debug!(id = %id, "Notification removed during delivery, retracting persistent notification");
            self.dismiss_persistent(&id, config.channel_timeout()).await;
        }
        self.rate_limiter
            .record_attempt(request.rate_limit_key(), self.clock.now())
            .await;
        self.metrics.record_sent();

        tracing::info!(
            id = %id,
            entity_id = %request.entity_id,
            notification_type = %request.notification_type,
            priority = %request.priority,
            successes,
            failures,
            "Notification sent"
        );

        Ok(true)
    }

    /// 撤销一条活跃通知，未知 ID 返回 false
    pub async fn dismiss(&self, id: &str) -> bool {
        let Some(record) = self.store.remove(id).await else {
            return false;
        };

        if record.used_channel(DeliveryChannel::Persistent) {
            let timeout = self.config.read().await.channel_timeout();
            self.dismiss_persistent(id, timeout).await;
        }

        self.metrics.record_dismissed();
        tracing::debug!(id, "Notification dismissed");
        true
    }

    /// 撤销某个实体的所有活跃通知，返回撤销数量
    pub async fn dismiss_entity(&self, entity_id: &str) -> usize {
        let mut dismissed = 0;
        for record in self.active_for_entity(entity_id).await {
            if self.dismiss(&record.id).await {
                dismissed += 1;
            }
        }
        dismissed
    }

    pub async fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot().await
    }

    pub async fn active_notifications(&self) -> Vec<NotificationRecord> {
        self.store.active_snapshot().await
    }

    pub async fn active_for_entity(&self, entity_id: &str) -> Vec<NotificationRecord> {
        self.store
            .active_snapshot()
            .await
            .into_iter()
            .filter(|record| record.entity_id == entity_id)
            .collect()
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.store.history_snapshot().await
    }

    pub async fn config(&self) -> EngineConfig {
        self.config.read().await.clone()
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    pub fn janitor(&self) -> &Janitor {
        &self.janitor
    }

    pub fn janitor_state(&self) -> JanitorState {
        self.janitor.state()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    async fn dismiss_persistent(&self, id: &str, timeout: std::time::Duration) {
        match tokio::time::timeout(timeout, self.persistent.dismiss(id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(id, error = %e, "Failed to dismiss persistent notification");
            }
            Err(_) => {
                tracing::warn!(id, "Dismissing persistent notification timed out");
            }
        }
    }

    async fn display_name(&self, entity_id: &str) -> String {
        let timeout = self.config.read().await.channel_timeout();
        match tokio::time::timeout(timeout, self.names.display_name(entity_id)).await {
            Ok(Some(name)) => name,
            Ok(None) => fallback_display_name(entity_id),
            Err(_) => {
                tracing::debug!(entity_id, "Display name lookup timed out, using fallback");
                fallback_display_name(entity_id)
            }
        }
    }

    async fn default_title(&self, request: &NotificationRequest) -> String {
        let name = self.display_name(&request.entity_id).await;
        format!("{}: {}", name, fallback_display_name(&request.notification_type))
    }
}

impl Drop for NotificationEngine {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}
