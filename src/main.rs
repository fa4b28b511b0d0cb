use std::sync::Arc;

use alert_dispatch::cli::{run_command, Args};
use alert_dispatch::infrastructure::config::{ConfigManager, ConfigSource};
use alert_dispatch::infrastructure::logging::{setup_logging, LoggingConfig};
use alert_dispatch::notification::providers::{
    ConsolePersistentNotifier, ConsoleServiceRegistry, StaticNameResolver,
};
use alert_dispatch::notification::{DeliveryChannel, EngineCollaborators, NotificationEngine};
use clap::Parser;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 中的变量作为环境变量配置源
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut manager = ConfigManager::new();
    if let Some(path) = &args.config {
        manager = manager.add_source(ConfigSource::File(path.clone()));
    }
    let manager = manager.add_source(ConfigSource::Environment);
    let settings = manager.load()?;

    let mut logging = LoggingConfig::from_settings(&settings.logging)?;
    if let Some(level) = &args.log_level {
        logging.filter = Some(format!("alert_dispatch={}", level));
    }
    setup_logging(logging)?;

    let collaborators = EngineCollaborators {
        registry: Arc::new(
            ConsoleServiceRegistry::new().with_targets(DeliveryChannel::MobilePush, args.push_targets.clone()),
        ),
        persistent: Arc::new(ConsolePersistentNotifier),
        names: Arc::new(StaticNameResolver::new()),
    };

    let shutdown = CancellationToken::new();
    let engine = NotificationEngine::new(Arc::new(manager), collaborators, shutdown.clone());
    engine.initialize().await?;

    let result = run_command(&engine, &args.command).await;

    shutdown.cancel();
    engine.shutdown().await;

    result
}
