pub mod console;

use async_trait::async_trait;

use crate::notification::{ChannelPayload, DeliveryChannel};

pub use console::{ConsolePersistentNotifier, ConsoleServiceRegistry, StaticNameResolver};

/// 通道服务注册表：枚举目标并执行通道调用
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// 某类通道下已注册的目标（例如推送设备）
    async fn targets(&self, channel: DeliveryChannel) -> anyhow::Result<Vec<String>>;

    /// 执行一次通道调用；`target` 为空表示通道本身没有目标概念
    async fn call(
        &self,
        channel: DeliveryChannel,
        target: Option<&str>,
        payload: &ChannelPayload,
    ) -> anyhow::Result<()>;
}

/// 宿主界面中的常驻通知
#[async_trait]
pub trait PersistentNotifier: Send + Sync {
    async fn create(&self, id: &str, title: &str, message: &str) -> anyhow::Result<()>;

    async fn dismiss(&self, id: &str) -> anyhow::Result<()>;
}

/// 实体 ID 到显示名称的解析
#[async_trait]
pub trait DisplayNameResolver: Send + Sync {
    async fn display_name(&self, entity_id: &str) -> Option<String>;
}

/// 没有配置显示名称时，从实体 ID 派生一个可读名称
///
/// 下划线视为空格，每个单词首字母大写："mr_whiskers" -> "Mr Whiskers"。
pub fn fallback_display_name(entity_id: &str) -> String {
    entity_id
        .split(|c: char| c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_display_name() {
        assert_eq!(fallback_display_name("buddy"), "Buddy");
        assert_eq!(fallback_display_name("mr_whiskers"), "Mr Whiskers");
        assert_eq!(fallback_display_name("__odd__id"), "Odd Id");
        assert_eq!(fallback_display_name(""), "");
    }
}
