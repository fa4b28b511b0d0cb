use std::collections::HashMap;

use async_trait::async_trait;

use crate::notification::providers::{DisplayNameResolver, PersistentNotifier, ServiceRegistry};
use crate::notification::{ChannelPayload, DeliveryChannel};

/// 将通道调用写入日志的注册表，供演示程序和本地调试使用
#[derive(Debug, Clone, Default)]
pub struct ConsoleServiceRegistry {
    targets: HashMap<DeliveryChannel, Vec<String>>,
}

impl ConsoleServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets(mut self, channel: DeliveryChannel, targets: Vec<String>) -> Self {
        self.targets.insert(channel, targets);
        self
    }
}

#[async_trait]
impl ServiceRegistry for ConsoleServiceRegistry {
    async fn targets(&self, channel: DeliveryChannel) -> anyhow::Result<Vec<String>> {
        Ok(self.targets.get(&channel).cloned().unwrap_or_default())
    }

    async fn call(
        &self,
        channel: DeliveryChannel,
        target: Option<&str>,
        payload: &ChannelPayload,
    ) -> anyhow::Result<()> {
        tracing::info!(
            channel = %channel,
            target = target.unwrap_or("-"),
            id = %payload.id,
            priority = %payload.priority,
            "{}: {}",
            payload.title,
            payload.message
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConsolePersistentNotifier;

#[async_trait]
impl PersistentNotifier for ConsolePersistentNotifier {
    async fn create(&self, id: &str, title: &str, message: &str) -> anyhow::Result<()> {
        tracing::info!(id, "[persistent] {}: {}", title, message);
        Ok(())
    }

    async fn dismiss(&self, id: &str) -> anyhow::Result<()> {
        tracing::info!(id, "[persistent] dismissed");
        Ok(())
    }
}

/// 固定映射的显示名称解析器
#[derive(Debug, Clone, Default)]
pub struct StaticNameResolver {
    names: HashMap<String, String>,
}

impl StaticNameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, entity_id: impl Into<String>, name: impl Into<String>) -> Self {
        self.names.insert(entity_id.into(), name.into());
        self
    }
}

#[async_trait]
impl DisplayNameResolver for StaticNameResolver {
    async fn display_name(&self, entity_id: &str) -> Option<String> {
        self.names.get(entity_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_console_registry_targets() {
        let registry = ConsoleServiceRegistry::new()
            .with_targets(DeliveryChannel::MobilePush, vec!["phone".to_string()]);

        assert_eq!(registry.targets(DeliveryChannel::MobilePush).await.unwrap(), vec!["phone"]);
        assert!(registry.targets(DeliveryChannel::Chat).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_static_names() {
        let names = StaticNameResolver::new().with_name("buddy", "Buddy the Dog");
        assert_eq!(names.display_name("buddy").await.as_deref(), Some("Buddy the Dog"));
        assert!(names.display_name("rex").await.is_none());
    }
}
