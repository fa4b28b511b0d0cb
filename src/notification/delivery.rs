use crate::infrastructure::config::EntityPreferences;
use crate::notification::{DeliveryChannel, NotificationPriority, NotificationRequest};

/// 投递通道选择器
pub struct DeliveryMethodSelector;

impl DeliveryMethodSelector {
    /// 解析本次请求的通道列表
    ///
    /// 显式通道替换默认配置；否则使用实体覆盖或引擎默认值。
    /// 高优先级追加推送，最高优先级再追加语音播报。结果保持顺序且无重复。
    pub fn select(request: &NotificationRequest, preferences: &EntityPreferences) -> Vec<DeliveryChannel> {
        let base = match &request.channels {
            Some(explicit) => explicit.as_slice(),
            None => preferences.channels.as_slice(),
        };

        let mut channels: Vec<DeliveryChannel> = Vec::with_capacity(base.len() + 2);
        for channel in base {
            push_unique(&mut channels, *channel);
        }

        match request.priority {
            NotificationPriority::High => {
                push_unique(&mut channels, DeliveryChannel::MobilePush);
            }
            NotificationPriority::Urgent => {
                push_unique(&mut channels, DeliveryChannel::MobilePush);
                push_unique(&mut channels, DeliveryChannel::Tts);
            }
            NotificationPriority::Low | NotificationPriority::Normal => {}
        }

        channels
    }
}

fn push_unique(channels: &mut Vec<DeliveryChannel>, channel: DeliveryChannel) {
    if !channels.contains(&channel) {
        channels.push(channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::{EngineConfig, EntitySettings};

    fn defaults() -> EntityPreferences {
        EntityPreferences::resolve(None, &EngineConfig::default())
    }

    #[test]
    fn test_defaults_for_normal_priority() {
        let request = NotificationRequest::new("buddy", "feeding", "hi");
        assert_eq!(DeliveryMethodSelector::select(&request, &defaults()), vec![DeliveryChannel::Persistent]);
    }

    #[test]
    fn test_escalation() {
        let high = NotificationRequest::new("buddy", "feeding", "hi").with_priority(NotificationPriority::High);
        assert_eq!(
            DeliveryMethodSelector::select(&high, &defaults()),
            vec![DeliveryChannel::Persistent, DeliveryChannel::MobilePush]
        );

        let urgent = high.clone().with_priority(NotificationPriority::Urgent);
        assert_eq!(
            DeliveryMethodSelector::select(&urgent, &defaults()),
            vec![DeliveryChannel::Persistent, DeliveryChannel::MobilePush, DeliveryChannel::Tts]
        );
    }

    #[test]
    fn test_explicit_channels_replace_defaults() {
        let request = NotificationRequest::new("buddy", "feeding", "hi")
            .with_priority(NotificationPriority::Urgent)
            .with_channels(vec![DeliveryChannel::Tts, DeliveryChannel::Webhook, DeliveryChannel::Tts]);

        assert_eq!(
            DeliveryMethodSelector::select(&request, &defaults()),
            vec![DeliveryChannel::Tts, DeliveryChannel::Webhook, DeliveryChannel::MobilePush]
        );
    }

    #[test]
    fn test_entity_override() {
        let settings = EntitySettings {
            channels: vec![DeliveryChannel::Chat],
            ..Default::default()
        };
        let prefs = EntityPreferences::resolve(Some(&settings), &EngineConfig::default());
        let request = NotificationRequest::new("buddy", "feeding", "hi");
        assert_eq!(DeliveryMethodSelector::select(&request, &prefs), vec![DeliveryChannel::Chat]);
    }
}
