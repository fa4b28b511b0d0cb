use anyhow::Context;

use crate::cli::args::{Command, SendArgs};
use crate::notification::{NotificationEngine, NotificationPriority, NotificationRequest};

/// 执行子命令
pub async fn run_command(engine: &NotificationEngine, command: &Command) -> anyhow::Result<()> {
    match command {
        Command::Send(args) => handle_send(engine, args).await,
        Command::Test {
            entity_id,
            message,
            priority,
        } => {
            let sent = engine.send_test(entity_id, message.as_deref(), *priority).await?;
            print_result(engine, sent).await;
            Ok(())
        }
        Command::Metrics => {
            let config = engine.config().await;
            println!("{}", serde_json::to_string_pretty(&config)?);
            println!("{}", serde_json::to_string_pretty(&engine.metrics().await)?);
            Ok(())
        }
    }
}

async fn handle_send(engine: &NotificationEngine, args: &SendArgs) -> anyhow::Result<()> {
    let sent = send_repeated(engine, args).await?;
    print_result(engine, sent).await;
    Ok(())
}

/// 按 `--repeat` 次数发送，任意一次成功即返回 true
async fn send_repeated(engine: &NotificationEngine, args: &SendArgs) -> anyhow::Result<bool> {
    let priority: NotificationPriority = args
        .priority
        .parse()
        .with_context(|| format!("无效的优先级: {}", args.priority))?;

    let mut request = NotificationRequest::new(&args.entity_id, &args.notification_type, &args.message)
        .with_priority(priority);

    if let Some(title) = &args.title {
        request = request.with_title(title);
    }
    if !args.channels.is_empty() {
        request = request.with_channels(args.channels.clone());
    }
    if let Some(data) = &args.data {
        let data = serde_json::from_str(data).context("--data 不是有效的 JSON")?;
        request = request.with_data(data);
    }
    if args.force {
        request = request.forced();
    }

    let mut any_sent = false;
    for attempt in 1..=args.repeat.max(1) {
        let sent = engine.send(request.clone()).await?;
        println!("#{} {}", attempt, if sent { "✅ sent" } else { "⏸️ suppressed" });
        any_sent |= sent;
    }

    Ok(any_sent)
}

async fn print_result(engine: &NotificationEngine, sent: bool) {
    if !sent {
        println!("⏸️ 通知未发送");
    }

    for record in engine.active_notifications().await {
        let mut status: Vec<String> = record
            .delivery_status
            .iter()
            .map(|(channel, outcome)| format!("{}={}", channel, outcome))
            .collect();
        status.sort();
        println!("📨 {} [{}] {}", record.id, status.join(", "), record.title);
    }

    let metrics = engine.metrics().await;
    println!(
        "📊 sent={} suppressed={} rate_limited={} delivery_failures={}",
        metrics.notifications_sent,
        metrics.notifications_suppressed,
        metrics.rate_limited_count,
        metrics.delivery_failures
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::{ConfigManager, ConfigSource};
    use crate::notification::providers::{
        ConsolePersistentNotifier, ConsoleServiceRegistry, StaticNameResolver,
    };
    use crate::notification::EngineCollaborators;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    async fn engine(settings: serde_json::Value) -> Arc<NotificationEngine> {
        let engine = NotificationEngine::new(
            Arc::new(ConfigManager::new().add_source(ConfigSource::Blob(settings))),
            EngineCollaborators {
                registry: Arc::new(ConsoleServiceRegistry::new()),
                persistent: Arc::new(ConsolePersistentNotifier),
                names: Arc::new(StaticNameResolver::new()),
            },
            CancellationToken::new(),
        );
        engine.initialize().await.unwrap();
        engine
    }

    fn send_args(repeat: u32) -> SendArgs {
        SendArgs {
            entity_id: "buddy".to_string(),
            notification_type: "feeding".to_string(),
            message: "Time to feed!".to_string(),
            title: None,
            priority: "normal".to_string(),
            channels: vec![],
            data: None,
            force: false,
            repeat,
        }
    }

    #[tokio::test]
    async fn test_send_repeated_reports_suppression() {
        let engine = engine(json!({ "engine": { "enabled": false } })).await;
        assert!(!send_repeated(&engine, &send_args(2)).await.unwrap());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_repeated_reports_any_success() {
        let engine = engine(json!({})).await;
        // 第二次被频率限制，但第一次已成功
        assert!(send_repeated(&engine, &send_args(2)).await.unwrap());
        assert_eq!(engine.metrics().await.rate_limited_count, 1);
        engine.shutdown().await;
    }
}
