use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::infrastructure::error::{NotificationError, Result};
use crate::notification::{DeliveryChannel, QuietHours, RateLimitIntervals};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "ALERT_DISPATCH";

/// 完整配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// 引擎级配置
    pub engine: EngineConfig,

    /// 按实体 ID 的覆盖配置
    pub entities: HashMap<String, EntitySettings>,

    /// 日志配置
    pub logging: LoggingSettings,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            entities: HashMap::new(),
            logging: LoggingSettings::default(),
        }
    }
}

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub enabled: bool,
    pub quiet_hours: QuietHours,
    pub rate_limiting: RateLimitConfig,
    pub default_channels: Vec<DeliveryChannel>,
    pub history: HistoryConfig,
    pub janitor_interval_secs: u64,
    pub channel_timeout_ms: u64,
    pub dispatch_timeout_ms: u64,
    /// 频率限制条目在最长间隔之外额外保留的时间
    pub rate_limit_retention_margin_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            quiet_hours: QuietHours::default(),
            rate_limiting: RateLimitConfig::default(),
            default_channels: vec![DeliveryChannel::Persistent],
            history: HistoryConfig::default(),
            janitor_interval_secs: 60 * 60,
            channel_timeout_ms: 10_000,
            dispatch_timeout_ms: 30_000,
            rate_limit_retention_margin_secs: 60 * 60,
        }
    }
}

impl EngineConfig {
    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn rate_limit_retention_margin(&self) -> Duration {
        Duration::from_secs(self.rate_limit_retention_margin_secs)
    }

    /// 历史记录的最早保留时间
    pub fn history_cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let max_age = chrono::Duration::try_days(i64::from(self.history.max_age_days))
            .ok_or_else(|| NotificationError::internal("history max age out of range"))?;
        now.checked_sub_signed(max_age)
            .ok_or_else(|| NotificationError::internal("history max age underflows the clock"))
    }
}

/// 频率限制配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub intervals: RateLimitIntervals,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            intervals: RateLimitIntervals::default(),
        }
    }
}

/// 历史记录配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_count: usize,
    /// 同时适用于历史记录和活跃通知
    pub max_age_days: u32,
    pub max_active: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_count: 100,
            max_age_days: 30,
            max_active: 100,
        }
    }
}

/// 单个实体的通知偏好
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitySettings {
    pub enabled: bool,
    /// 为空表示允许所有类型
    pub allowed_types: Vec<String>,
    /// 为空表示使用引擎默认通道
    pub channels: Vec<DeliveryChannel>,
}

impl Default for EntitySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_types: Vec::new(),
            channels: Vec::new(),
        }
    }
}

/// 解析后的实体偏好，缺省值已显式填入
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityPreferences {
    pub enabled: bool,
    pub allowed_types: Option<HashSet<String>>,
    pub channels: Vec<DeliveryChannel>,
}

impl EntityPreferences {
    pub fn resolve(settings: Option<&EntitySettings>, engine: &EngineConfig) -> Self {
        match settings {
            None => Self {
                enabled: true,
                allowed_types: None,
                channels: engine.default_channels.clone(),
            },
            Some(settings) => {
                let allowed_types = if settings.allowed_types.is_empty() {
                    None
                } else {
                    Some(settings.allowed_types.iter().cloned().collect())
                };
                let channels = if settings.channels.is_empty() {
                    engine.default_channels.clone()
                } else {
                    settings.channels.clone()
                };

                Self {
                    enabled: settings.enabled,
                    allowed_types,
                    channels,
                }
            }
        }
    }

    /// 实体是否允许接收该类型的通知
    pub fn allows(&self, notification_type: &str) -> bool {
        if !self.enabled {
            return false;
        }
        match &self.allowed_types {
            Some(types) => types.contains(notification_type),
            None => true,
        }
    }
}

/// 日志配置（配置文件形式）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
    pub output: String,
    pub file_path: Option<PathBuf>,
    pub include_file_location: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            file_path: None,
            include_file_location: false,
        }
    }
}

/// 配置源
#[derive(Debug, Clone)]
pub enum ConfigSource {
    File(PathBuf),
    Environment,
    /// 宿主提供的键值配置
    Blob(Value),
    Default,
}

/// 配置读取接口，引擎通过它获取引擎配置与实体偏好
pub trait SettingsProvider: Send + Sync {
    fn engine_config(&self) -> Result<EngineConfig>;

    fn entity_settings(&self, entity_id: &str) -> Result<Option<EntitySettings>>;

    /// 重新读取所有配置源
    fn reload(&self) -> Result<()> {
        Ok(())
    }
}

/// 配置管理器
pub struct ConfigManager {
    sources: Vec<ConfigSource>,
    settings: RwLock<NotificationSettings>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            sources: vec![ConfigSource::Default],
            settings: RwLock::new(NotificationSettings::default()),
        }
    }

    /// 直接使用给定配置（不读取任何外部源）
    pub fn from_settings(settings: NotificationSettings) -> Self {
        let mut manager = Self::new();
        if let Ok(blob) = serde_json::to_value(&settings) {
            manager.sources.push(ConfigSource::Blob(blob));
        }
        manager.settings = RwLock::new(settings);
        manager
    }

    /// 添加配置源，后添加的源优先级更高
    pub fn add_source(mut self, source: ConfigSource) -> Self {
        self.sources.push(source);
        self
    }

    /// 加载配置
    pub fn load(&self) -> Result<NotificationSettings> {
        let mut merged = serde_json::to_value(NotificationSettings::default())?;

        // 按优先级顺序加载配置源
        for source in &self.sources {
            match source {
                ConfigSource::File(path) => {
                    if let Some(patch) = Self::load_from_file(path)? {
                        merge_values(&mut merged, patch);
                    }
                }
                ConfigSource::Environment => {
                    let patch = environment_patch(|key| std::env::var(key).ok())?;
                    merge_values(&mut merged, patch);
                }
                ConfigSource::Blob(blob) => {
                    merge_values(&mut merged, blob.clone());
                }
                ConfigSource::Default => {
                    // 默认配置已经设置
                }
            }
        }

        let settings: NotificationSettings = serde_json::from_value(merged)
            .map_err(|e| NotificationError::config(format!("invalid notification settings: {}", e)))?;

        Self::validate(&settings)?;

        let mut guard = self
            .settings
            .write()
            .map_err(|_| NotificationError::internal("settings lock poisoned"))?;
        *guard = settings.clone();

        tracing::debug!(
            entities = settings.entities.len(),
            enabled = settings.engine.enabled,
            "Notification settings loaded"
        );

        Ok(settings)
    }

    /// 从文件读取配置，文件不存在时跳过
    fn load_from_file(path: &PathBuf) -> Result<Option<Value>> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, skipping");
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            NotificationError::file_system(
                format!("无法读取配置文件: {}", e),
                Some(path.to_string_lossy().to_string()),
            )
        })?;

        let value: Value = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => return Err(NotificationError::config("不支持的配置文件格式")),
        };

        Ok(Some(value))
    }

    /// 验证配置
    pub fn validate(settings: &NotificationSettings) -> Result<()> {
        let engine = &settings.engine;

        if engine.default_channels.is_empty() {
            return Err(NotificationError::config("default_channels 不能为空"));
        }

        if engine.janitor_interval_secs == 0 {
            return Err(NotificationError::config("janitor_interval_secs 必须大于 0"));
        }

        if engine.history.max_count == 0 {
            return Err(NotificationError::config("history.max_count 必须大于 0"));
        }

        if engine.history.max_active == 0 {
            return Err(NotificationError::config("history.max_active 必须大于 0"));
        }

        if engine.channel_timeout_ms == 0 || engine.dispatch_timeout_ms == 0 {
            return Err(NotificationError::config("超时时间必须大于 0"));
        }

        if engine.dispatch_timeout_ms < engine.channel_timeout_ms {
            return Err(NotificationError::config(
                "dispatch_timeout_ms 不能小于 channel_timeout_ms",
            ));
        }

        if settings.entities.keys().any(|id| id.trim().is_empty()) {
            return Err(NotificationError::config("实体 ID 不能为空"));
        }

        Ok(())
    }

    /// 获取当前配置
    pub fn get_settings(&self) -> Result<NotificationSettings> {
        self.settings
            .read()
            .map(|settings| settings.clone())
            .map_err(|_| NotificationError::internal("settings lock poisoned"))
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsProvider for ConfigManager {
    fn engine_config(&self) -> Result<EngineConfig> {
        Ok(self.get_settings()?.engine)
    }

    fn entity_settings(&self, entity_id: &str) -> Result<Option<EntitySettings>> {
        let settings = self
            .settings
            .read()
            .map_err(|_| NotificationError::internal("settings lock poisoned"))?;
        Ok(settings.entities.get(entity_id).cloned())
    }

    fn reload(&self) -> Result<()> {
        self.load().map(|_| ())
    }
}

/// 深度合并：对象逐键合并，其余类型直接覆盖
fn merge_values(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, patch) => *base = patch,
    }
}

/// 将环境变量转换为配置补丁
fn environment_patch<F>(lookup: F) -> Result<Value>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(&format!("{}_{}", ENV_PREFIX, name));
    let mut engine = Map::new();
    let mut quiet_hours = Map::new();
    let mut rate_limiting = Map::new();
    let mut logging = Map::new();

    if let Some(value) = var("ENABLED") {
        engine.insert("enabled".to_string(), json!(parse_bool("ENABLED", &value)?));
    }

    if let Some(value) = var("QUIET_HOURS_ENABLED") {
        quiet_hours.insert("enabled".to_string(), json!(parse_bool("QUIET_HOURS_ENABLED", &value)?));
    }

    if let Some(value) = var("QUIET_HOURS_START") {
        quiet_hours.insert("start".to_string(), json!(value.trim()));
    }

    if let Some(value) = var("QUIET_HOURS_END") {
        quiet_hours.insert("end".to_string(), json!(value.trim()));
    }

    if let Some(value) = var("RATE_LIMITING_ENABLED") {
        rate_limiting.insert("enabled".to_string(), json!(parse_bool("RATE_LIMITING_ENABLED", &value)?));
    }

    if let Some(value) = var("DEFAULT_CHANNELS") {
        let channels: Vec<String> = value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        engine.insert("default_channels".to_string(), json!(channels));
    }

    if let Some(value) = var("LOG_LEVEL") {
        logging.insert("level".to_string(), json!(value.trim()));
    }

    if !quiet_hours.is_empty() {
        engine.insert("quiet_hours".to_string(), Value::Object(quiet_hours));
    }
    if !rate_limiting.is_empty() {
        engine.insert("rate_limiting".to_string(), Value::Object(rate_limiting));
    }

    let mut patch = Map::new();
    if !engine.is_empty() {
        patch.insert("engine".to_string(), Value::Object(engine));
    }
    if !logging.is_empty() {
        patch.insert("logging".to_string(), Value::Object(logging));
    }

    Ok(Value::Object(patch))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(NotificationError::config(format!(
            "{}_{} 不是有效的布尔值: {}",
            ENV_PREFIX, name, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn test_default_config() {
        let settings = NotificationSettings::default();
        assert!(settings.engine.enabled);
        assert!(!settings.engine.quiet_hours.enabled);
        assert!(settings.engine.rate_limiting.enabled);
        assert_eq!(settings.engine.default_channels, vec![DeliveryChannel::Persistent]);
        assert_eq!(settings.engine.history.max_count, 100);
        assert_eq!(settings.engine.history.max_active, 100);
        assert!(ConfigManager::validate(&settings).is_ok());
    }

    #[test]
    fn test_blob_overrides_defaults() {
        let manager = ConfigManager::new().add_source(ConfigSource::Blob(json!({
            "engine": {
                "quiet_hours": { "enabled": true, "start": "22:00", "end": "08:00" },
                "default_channels": ["persistent", "webhook"]
            },
            "entities": {
                "buddy": { "allowed_types": ["feeding"], "channels": ["chat"] }
            }
        })));

        let settings = manager.load().unwrap();
        assert!(settings.engine.quiet_hours.enabled);
        assert_eq!(settings.engine.quiet_hours.start, NaiveTime::from_hms_opt(22, 0, 0).unwrap());
        assert_eq!(
            settings.engine.default_channels,
            vec![DeliveryChannel::Persistent, DeliveryChannel::Webhook]
        );
        // 未覆盖的字段保持默认
        assert_eq!(settings.engine.history.max_age_days, 30);

        let buddy = manager.entity_settings("buddy").unwrap().unwrap();
        assert!(buddy.enabled);
        assert_eq!(buddy.channels, vec![DeliveryChannel::Chat]);
        assert!(manager.entity_settings("rex").unwrap().is_none());
    }

    #[test]
    fn test_later_sources_win() {
        let manager = ConfigManager::new()
            .add_source(ConfigSource::Blob(json!({ "engine": { "enabled": false } })))
            .add_source(ConfigSource::Blob(json!({ "engine": { "enabled": true, "janitor_interval_secs": 5 } })));

        let settings = manager.load().unwrap();
        assert!(settings.engine.enabled);
        assert_eq!(settings.engine.janitor_interval_secs, 5);
    }

    #[test]
    fn test_validation_rejects_bad_timeouts() {
        let manager = ConfigManager::new().add_source(ConfigSource::Blob(json!({
            "engine": { "channel_timeout_ms": 5000, "dispatch_timeout_ms": 1000 }
        })));
        assert!(matches!(manager.load(), Err(NotificationError::Configuration { .. })));

        let manager = ConfigManager::new().add_source(ConfigSource::Blob(json!({
            "engine": { "default_channels": [] }
        })));
        assert!(manager.load().is_err());
    }

    #[test]
    fn test_unknown_channel_is_config_error() {
        let manager = ConfigManager::new().add_source(ConfigSource::Blob(json!({
            "engine": { "default_channels": ["carrier_pigeon"] }
        })));
        assert!(matches!(manager.load(), Err(NotificationError::Configuration { .. })));
    }

    #[test]
    fn test_environment_patch() {
        let vars: HashMap<String, String> = [
            ("ALERT_DISPATCH_ENABLED", "false"),
            ("ALERT_DISPATCH_QUIET_HOURS_ENABLED", "yes"),
            ("ALERT_DISPATCH_QUIET_HOURS_START", "21:30"),
            ("ALERT_DISPATCH_DEFAULT_CHANNELS", "persistent, tts"),
            ("ALERT_DISPATCH_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let patch = environment_patch(|key| vars.get(key).cloned()).unwrap();
        assert_eq!(patch["engine"]["enabled"], json!(false));
        assert_eq!(patch["engine"]["quiet_hours"]["enabled"], json!(true));
        assert_eq!(patch["engine"]["quiet_hours"]["start"], json!("21:30"));
        assert_eq!(patch["engine"]["default_channels"], json!(["persistent", "tts"]));
        assert_eq!(patch["logging"]["level"], json!("debug"));
        assert!(patch["engine"].get("rate_limiting").is_none());
    }

    #[test]
    fn test_environment_patch_rejects_bad_bool() {
        let result = environment_patch(|key| {
            (key == "ALERT_DISPATCH_RATE_LIMITING_ENABLED").then(|| "maybe".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_entity_preferences_resolution() {
        let engine = EngineConfig::default();

        let defaults = EntityPreferences::resolve(None, &engine);
        assert!(defaults.allows("anything"));
        assert_eq!(defaults.channels, engine.default_channels);

        let restricted = EntitySettings {
            enabled: true,
            allowed_types: vec!["feeding".to_string()],
            channels: vec![],
        };
        let prefs = EntityPreferences::resolve(Some(&restricted), &engine);
        assert!(prefs.allows("feeding"));
        assert!(!prefs.allows("walk"));
        assert_eq!(prefs.channels, engine.default_channels);

        let disabled = EntitySettings {
            enabled: false,
            ..Default::default()
        };
        assert!(!EntityPreferences::resolve(Some(&disabled), &engine).allows("feeding"));
    }

    #[test]
    fn test_history_cutoff() {
        let engine = EngineConfig::default();
        let now = Utc::now();
        assert_eq!(engine.history_cutoff(now).unwrap(), now - chrono::Duration::days(30));
    }
}
