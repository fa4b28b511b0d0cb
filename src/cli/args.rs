use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::notification::{DeliveryChannel, NotificationPriority};

#[derive(Parser, Debug)]
#[command(
    name = "alert-dispatch",
    version,
    about = "通知分发引擎演示程序",
    long_about = "alert-dispatch 加载通知配置，并通过控制台适配器演示静默时段、频率限制、多通道投递等行为。"
)]
pub struct Args {
    /// 配置文件路径（toml / yaml / json）
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// 覆盖日志级别（trace, debug, info, warn, error）
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// 控制台注册表中的推送设备，可重复指定
    #[arg(long = "push-target", value_name = "DEVICE")]
    pub push_targets: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 发送一条通知
    Send(SendArgs),

    /// 发送测试通知（绕过所有门控）
    Test {
        entity_id: String,

        #[arg(short, long)]
        message: Option<String>,

        #[arg(short, long, value_parser = parse_priority)]
        priority: Option<NotificationPriority>,
    },

    /// 输出当前配置与指标
    Metrics,
}

#[derive(clap::Args, Debug)]
pub struct SendArgs {
    pub entity_id: String,

    pub notification_type: String,

    pub message: String,

    #[arg(short, long)]
    pub title: Option<String>,

    /// low, normal, high, urgent
    #[arg(short, long, default_value = "normal")]
    pub priority: String,

    /// 显式指定通道，可重复；指定后替换默认通道
    #[arg(long = "channel", value_name = "CHANNEL", value_parser = parse_channel)]
    pub channels: Vec<DeliveryChannel>,

    /// 附加 JSON 数据
    #[arg(long, value_name = "JSON")]
    pub data: Option<String>,

    /// 绕过所有门控
    #[arg(short, long, default_value_t = false)]
    pub force: bool,

    /// 连续发送次数，用于观察频率限制
    #[arg(long, default_value_t = 1)]
    pub repeat: u32,
}

fn parse_priority(value: &str) -> Result<NotificationPriority, String> {
    value.parse().map_err(|e: crate::infrastructure::error::NotificationError| e.to_string())
}

fn parse_channel(value: &str) -> Result<DeliveryChannel, String> {
    value.parse().map_err(|e: crate::infrastructure::error::NotificationError| e.to_string())
}
