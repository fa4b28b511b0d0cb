use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::error::Result;
use crate::notification::{
    CleanupReport, Clock, DeliveryChannel, NotificationMetrics, NotificationStore, PersistentNotifier,
    RateLimiter,
};

/// 清理任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JanitorState {
    Scheduled,
    Running,
    Succeeded,
    Errored,
    Stopped,
}

impl fmt::Display for JanitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            JanitorState::Scheduled => "scheduled",
            JanitorState::Running => "running",
            JanitorState::Succeeded => "succeeded",
            JanitorState::Errored => "errored",
            JanitorState::Stopped => "stopped",
        };
        f.write_str(state)
    }
}

struct JanitorInner {
    store: Arc<NotificationStore>,
    rate_limiter: RateLimiter,
    persistent: Arc<dyn PersistentNotifier>,
    config: Arc<RwLock<EngineConfig>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<NotificationMetrics>,
    state: watch::Sender<JanitorState>,
}

/// 后台清理任务：按固定间隔清理过期的活跃通知、历史记录和频率限制条目
///
/// 单次清理失败只记录日志和计数，调度继续进行。
pub struct Janitor {
    inner: Arc<JanitorInner>,
    cancel: Mutex<Option<CancellationToken>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Janitor {
    pub fn new(
        store: Arc<NotificationStore>,
        persistent: Arc<dyn PersistentNotifier>,
        config: Arc<RwLock<EngineConfig>>,
        clock: Arc<dyn Clock>,
        metrics: Arc<NotificationMetrics>,
    ) -> Self {
        let (state, _) = watch::channel(JanitorState::Stopped);
        Self {
            inner: Arc::new(JanitorInner {
                rate_limiter: RateLimiter::new(store.clone()),
                store,
                persistent,
                config,
                clock,
                metrics,
                state,
            }),
            cancel: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// 启动后台任务，取消令牌派生自 `parent`；已在运行时不做任何事
    pub fn start(&self, parent: &CancellationToken) {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let token = parent.child_token();
        *self.cancel.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());

        let inner = self.inner.clone();
        inner.state.send_replace(JanitorState::Scheduled);
        *handle = Some(tokio::spawn(async move {
            inner.run_loop(token).await;
        }));

        tracing::debug!("Notification janitor started");
    }

    /// 停止后台任务并等待其退出，可重复调用
    pub async fn stop(&self) {
        let token = self.cancel.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(token) = token {
            token.cancel();
        }

        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Notification janitor task ended abnormally");
            }
        }

        self.inner.state.send_replace(JanitorState::Stopped);
    }

    pub fn state(&self) -> JanitorState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<JanitorState> {
        self.inner.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// 执行一次清理
    pub async fn run_cycle(&self) -> Result<CleanupReport> {
        self.inner.run_cycle().await
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        if let Some(token) = self.cancel.lock().unwrap_or_else(|e| e.into_inner()).take() {
            token.cancel();
        }
    }
}

impl JanitorInner {
    async fn run_loop(&self, cancel: CancellationToken) {
        loop {
            let interval = self.config.read().await.janitor_interval();
            self.state.send_replace(JanitorState::Scheduled);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            self.tick().await;
        }

        self.state.send_replace(JanitorState::Stopped);
        tracing::debug!("Notification janitor stopped");
    }

    async fn tick(&self) {
        self.state.send_replace(JanitorState::Running);

        match self.run_cycle().await {
            Ok(report) => {
                self.metrics.record_janitor_run();
                if !report.is_empty() {
                    tracing::debug!(
                        history_expired = report.history_expired,
                        history_truncated = report.history_truncated,
                        rate_limits_removed = report.rate_limits_removed,
                        active_expired = report.active_expired,
                        "Notification cleanup finished"
                    );
                }
                self.state.send_replace(JanitorState::Succeeded);
            }
            Err(e) => {
                self.metrics.record_janitor_error();
                tracing::warn!(error = %e, "Notification cleanup cycle failed, skipping");
                self.state.send_replace(JanitorState::Errored);
            }
        }
    }

    async fn run_cycle(&self) -> Result<CleanupReport> {
        let config = self.config.read().await.clone();
        let now = self.clock.now();

        let history_cutoff = config.history_cutoff(now)?;
        let (history_expired, history_truncated) = self
            .store
            .prune_history(history_cutoff, config.history.max_count)
            .await;

        let rate_cutoff = RateLimiter::stale_cutoff(
            &config.rate_limiting.intervals,
            config.rate_limit_retention_margin(),
            now,
        )?;
        let stale = self.rate_limiter.stale_entries(rate_cutoff).await;
        let rate_limits_removed = self.store.remove_rate_limits(&stale).await;

        let expired = self.store.expire_active(history_cutoff, config.history.max_active).await;
        let active_expired = expired.len();
        for record in expired {
            if record.used_channel(DeliveryChannel::Persistent) {
                self.dismiss_persistent(&record.id, config.channel_timeout()).await;
            }
        }

        Ok(CleanupReport {
            history_expired,
            history_truncated,
            rate_limits_removed,
            active_expired,
        })
    }

    async fn dismiss_persistent(&self, id: &str, timeout: std::time::Duration) {
        match tokio::time::timeout(timeout, self.persistent.dismiss(id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(id, error = %e, "Failed to dismiss expired persistent notification"),
            Err(_) => tracing::warn!(id, "Dismissing expired persistent notification timed out"),
        }
    }
}
