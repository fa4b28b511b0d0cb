use std::fmt;
use std::sync::Arc;

use crate::infrastructure::config::{EngineConfig, EntityPreferences};
use crate::infrastructure::error::{NotificationError, Result};
use crate::notification::{Clock, NotificationPriority, NotificationRequest, RateLimiter};

/// 单次请求的旁路标志，每个请求只计算一次
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BypassFlags {
    /// 忽略引擎与实体的禁用设置
    pub disabled: bool,
    pub quiet_hours: bool,
    pub rate_limit: bool,
}

impl BypassFlags {
    pub fn all() -> Self {
        Self {
            disabled: true,
            quiet_hours: true,
            rate_limit: true,
        }
    }

    pub fn for_request(force: bool, priority: NotificationPriority) -> Self {
        if force {
            return Self::all();
        }

        let top_tier = priority.is_top_tier();
        Self {
            disabled: false,
            quiet_hours: top_tier,
            rate_limit: top_tier,
        }
    }
}

/// 抑制原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressionReason {
    EngineDisabled,
    EntityDisabled,
    TypeNotAllowed,
    QuietHours,
}

impl fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SuppressionReason::EngineDisabled => "engine disabled",
            SuppressionReason::EntityDisabled => "entity disabled",
            SuppressionReason::TypeNotAllowed => "type not allowed for entity",
            SuppressionReason::QuietHours => "quiet hours",
        };
        f.write_str(reason)
    }
}

/// 门控判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Suppressed(SuppressionReason),
    RateLimited,
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

/// 策略引擎：请求校验与抑制门控
pub struct PolicyEngine {
    rate_limiter: RateLimiter,
    clock: Arc<dyn Clock>,
}

impl PolicyEngine {
    pub fn new(rate_limiter: RateLimiter, clock: Arc<dyn Clock>) -> Self {
        Self { rate_limiter, clock }
    }

    /// 校验请求，失败时不产生任何副作用
    pub fn validate(request: &NotificationRequest) -> Result<()> {
        if request.entity_id.trim().is_empty() {
            return Err(NotificationError::validation(
                "entity_id must not be empty",
                Some("entity_id".to_string()),
            ));
        }

        if request.notification_type.trim().is_empty() {
            return Err(NotificationError::validation(
                "notification type must not be empty",
                Some("notification_type".to_string()),
            ));
        }

        if matches!(&request.channels, Some(channels) if channels.is_empty()) {
            return Err(NotificationError::validation(
                "explicit channel list must not be empty",
                Some("channels".to_string()),
            ));
        }

        Ok(())
    }

    /// 依次执行禁用、实体偏好、静默时段、频率限制四道门控
    pub async fn evaluate(
        &self,
        request: &NotificationRequest,
        bypass: BypassFlags,
        engine: &EngineConfig,
        preferences: &EntityPreferences,
    ) -> Result<GateDecision> {
        if !bypass.disabled {
            if !engine.enabled {
                return Ok(GateDecision::Suppressed(SuppressionReason::EngineDisabled));
            }
            if !preferences.enabled {
                return Ok(GateDecision::Suppressed(SuppressionReason::EntityDisabled));
            }
            if !preferences.allows(&request.notification_type) {
                return Ok(GateDecision::Suppressed(SuppressionReason::TypeNotAllowed));
            }
        }

        if !bypass.quiet_hours && engine.quiet_hours.is_quiet_at(self.clock.local_time()) {
            return Ok(GateDecision::Suppressed(SuppressionReason::QuietHours));
        }

        if !bypass.rate_limit && engine.rate_limiting.enabled {
            let allowed = self
                .rate_limiter
                .is_allowed(
                    &request.rate_limit_key(),
                    request.priority,
                    &engine.rate_limiting.intervals,
                    self.clock.now(),
                )
                .await?;
            if !allowed {
                return Ok(GateDecision::RateLimited);
            }
        }

        Ok(GateDecision::Allow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::EntitySettings;
    use crate::notification::{DeliveryChannel, ManualClock, NotificationStore, QuietHours};
    use chrono::{TimeZone, Utc};

    fn policy_at(hour: u32) -> (PolicyEngine, RateLimiter) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()));
        let limiter = RateLimiter::new(Arc::new(NotificationStore::new()));
        (PolicyEngine::new(limiter.clone(), clock), limiter)
    }

    fn quiet_engine() -> EngineConfig {
        EngineConfig {
            quiet_hours: QuietHours::parse(true, "22:00", "08:00").unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn test_bypass_flags() {
        assert_eq!(BypassFlags::for_request(true, NotificationPriority::Low), BypassFlags::all());

        let urgent = BypassFlags::for_request(false, NotificationPriority::Urgent);
        assert!(!urgent.disabled);
        assert!(urgent.quiet_hours && urgent.rate_limit);

        assert_eq!(BypassFlags::for_request(false, NotificationPriority::High), BypassFlags::default());
    }

    #[test]
    fn test_validation() {
        assert!(PolicyEngine::validate(&NotificationRequest::new("buddy", "feeding", "hi")).is_ok());
        assert!(PolicyEngine::validate(&NotificationRequest::new("  ", "feeding", "hi")).is_err());
        assert!(PolicyEngine::validate(&NotificationRequest::new("buddy", "", "hi")).is_err());
        let empty_channels = NotificationRequest::new("buddy", "feeding", "hi").with_channels(vec![]);
        assert!(PolicyEngine::validate(&empty_channels).is_err());
        let one_channel = NotificationRequest::new("buddy", "feeding", "hi")
            .with_channels(vec![DeliveryChannel::Chat]);
        assert!(PolicyEngine::validate(&one_channel).is_ok());
    }

    #[tokio::test]
    async fn test_quiet_hours_gate() {
        let (policy, _) = policy_at(23);
        let engine = quiet_engine();
        let prefs = EntityPreferences::resolve(None, &engine);

        let normal = NotificationRequest::new("buddy", "feeding", "hi");
        let bypass = BypassFlags::for_request(false, normal.priority);
        assert_eq!(
            policy.evaluate(&normal, bypass, &engine, &prefs).await.unwrap(),
            GateDecision::Suppressed(SuppressionReason::QuietHours)
        );

        let urgent = normal.clone().with_priority(NotificationPriority::Urgent);
        let bypass = BypassFlags::for_request(false, urgent.priority);
        assert!(policy.evaluate(&urgent, bypass, &engine, &prefs).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_disabled_gates_and_force() {
        let (policy, _) = policy_at(12);
        let engine = EngineConfig {
            enabled: false,
            ..Default::default()
        };
        let prefs = EntityPreferences::resolve(None, &engine);
        let request = NotificationRequest::new("buddy", "feeding", "hi");

        assert_eq!(
            policy.evaluate(&request, BypassFlags::default(), &engine, &prefs).await.unwrap(),
            GateDecision::Suppressed(SuppressionReason::EngineDisabled)
        );
        assert!(policy.evaluate(&request, BypassFlags::all(), &engine, &prefs).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_entity_type_filter() {
        let (policy, _) = policy_at(12);
        let engine = EngineConfig::default();
        let settings = EntitySettings {
            allowed_types: vec!["walk".to_string()],
            ..Default::default()
        };
        let prefs = EntityPreferences::resolve(Some(&settings), &engine);

        let feeding = NotificationRequest::new("buddy", "feeding", "hi");
        assert_eq!(
            policy.evaluate(&feeding, BypassFlags::default(), &engine, &prefs).await.unwrap(),
            GateDecision::Suppressed(SuppressionReason::TypeNotAllowed)
        );
    }

    #[tokio::test]
    async fn test_rate_limit_gate_reads_only() {
        let (policy, limiter) = policy_at(12);
        let engine = EngineConfig::default();
        let prefs = EntityPreferences::resolve(None, &engine);
        let request = NotificationRequest::new("buddy", "feeding", "hi");

        // 仅评估门控不会写入时间戳
        for _ in 0..2 {
            assert!(policy.evaluate(&request, BypassFlags::default(), &engine, &prefs).await.unwrap().is_allowed());
        }
        assert!(limiter.last_sent(&request.rate_limit_key()).await.is_none());

        limiter
            .record_attempt(request.rate_limit_key(), Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
            .await;
        assert_eq!(
            policy.evaluate(&request, BypassFlags::default(), &engine, &prefs).await.unwrap(),
            GateDecision::RateLimited
        );

        let mut unlimited = engine.clone();
        unlimited.rate_limiting.enabled = false;
        assert!(policy.evaluate(&request, BypassFlags::default(), &unlimited, &prefs).await.unwrap().is_allowed());
    }
}
