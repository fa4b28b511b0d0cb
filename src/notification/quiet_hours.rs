use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::infrastructure::error::{NotificationError, Result};

/// 静默时段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    #[serde(default)]
    pub enabled: bool,
    #[serde(with = "time_of_day", default = "default_start")]
    pub start: NaiveTime,
    #[serde(with = "time_of_day", default = "default_end")]
    pub end: NaiveTime,
}

fn default_start() -> NaiveTime {
    NaiveTime::from_hms_opt(22, 0, 0).unwrap_or(NaiveTime::MIN)
}

fn default_end() -> NaiveTime {
    NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN)
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start: default_start(),
            end: default_end(),
        }
    }
}

impl QuietHours {
    pub fn new(enabled: bool, start: NaiveTime, end: NaiveTime) -> Self {
        Self { enabled, start, end }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// 从 "HH:MM" 字符串构建
    pub fn parse(enabled: bool, start: &str, end: &str) -> Result<Self> {
        Ok(Self {
            enabled,
            start: parse_time_of_day(start)?,
            end: parse_time_of_day(end)?,
        })
    }

    /// 判断给定本地时间是否处于静默时段内
    ///
    /// 区间为左闭右开；`start > end` 时窗口跨越午夜，`start == end` 视为空窗口。
    pub fn is_quiet_at(&self, now: NaiveTime) -> bool {
        if !self.enabled {
            return false;
        }

        if self.start <= self.end {
            now >= self.start && now < self.end
        } else {
            now >= self.start || now < self.end
        }
    }

    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }
}

/// 解析 "HH:MM" 或 "HH:MM:SS"
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|e| NotificationError::config(format!("invalid time of day '{}': {}", value, e)))
}

mod time_of_day {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_time_of_day(&raw).map_err(serde::de::Error::custom)
    }
}
