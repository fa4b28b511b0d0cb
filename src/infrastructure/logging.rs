use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::infrastructure::config::LoggingSettings;
use crate::infrastructure::error::{NotificationError, Result};

/// 日志配置
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    pub include_file_location: bool,
    pub include_span_events: bool,
    /// 完整的过滤指令，设置后忽略 `level`
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            output: LogOutput::Stdout,
            include_file_location: false,
            include_span_events: false,
            filter: None,
        }
    }
}

impl LoggingConfig {
    /// 由配置文件中的 `[logging]` 段构建
    pub fn from_settings(settings: &LoggingSettings) -> Result<Self> {
        let level = Level::from_str(settings.level.trim()).map_err(|_| {
            NotificationError::config(format!("无效的日志级别: {}", settings.level))
        })?;

        let format = match settings.format.trim().to_ascii_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            "json" => LogFormat::Json,
            other => return Err(NotificationError::config(format!("无效的日志格式: {}", other))),
        };

        let output = match settings.output.trim().to_ascii_lowercase().as_str() {
            "stdout" => LogOutput::Stdout,
            "stderr" => LogOutput::Stderr,
            "file" => match &settings.file_path {
                Some(path) => LogOutput::File(path.clone()),
                None => return Err(NotificationError::config("日志输出为 file 时必须设置 file_path")),
            },
            other => return Err(NotificationError::config(format!("无效的日志输出: {}", other))),
        };

        Ok(Self {
            level,
            format,
            output,
            include_file_location: settings.include_file_location,
            ..Default::default()
        })
    }

    fn env_filter(&self) -> anyhow::Result<EnvFilter> {
        let filter = match &self.filter {
            Some(filter) => EnvFilter::try_new(filter)?,
            None => EnvFilter::from_default_env()
                .add_directive(format!("alert_dispatch={}", self.level).parse()?),
        };
        Ok(filter)
    }
}

/// 日志格式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    /// 人类可读的格式
    Pretty,
    /// 紧凑格式
    Compact,
    /// JSON 格式
    Json,
}

/// 日志输出目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    File(PathBuf),
}

/// 设置日志系统，重复调用时保留已安装的订阅者
pub fn setup_logging(config: LoggingConfig) -> anyhow::Result<()> {
    let env_filter = config.env_filter()?;

    let fmt_layer = match &config.output {
        LogOutput::Stdout => create_fmt_layer(&config, io::stdout),
        LogOutput::Stderr => create_fmt_layer(&config, io::stderr),
        LogOutput::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            create_fmt_layer(&config, Mutex::new(file))
        }
    };

    if tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already installed");
    }

    Ok(())
}

fn create_fmt_layer<W>(
    config: &LoggingConfig,
    make_writer: W,
) -> Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>
where
    W: for<'writer> fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let mut layer = fmt::layer()
        .with_writer(make_writer)
        .with_target(true)
        .with_level(true);

    if config.include_file_location {
        layer = layer.with_file(true).with_line_number(true);
    }

    if config.include_span_events {
        layer = layer.with_span_events(FmtSpan::CLOSE);
    }

    match config.format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}
