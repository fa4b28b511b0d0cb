use std::sync::Mutex;

use chrono::{DateTime, Local, NaiveTime, Utc};

/// 时间来源，静默时段与频率限制都通过它读取当前时间
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// 本地时间（用于静默时段判断）
    fn local_time(&self) -> NaiveTime;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_time(&self) -> NaiveTime {
        Local::now().time()
    }
}

/// 可手动推进的时钟，本地时间与 UTC 相同
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = *guard + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn local_time(&self) -> NaiveTime {
        self.now().time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_advance() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 22, 30, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::minutes(45));

        assert_eq!(clock.now(), start + chrono::Duration::minutes(45));
        assert_eq!(clock.local_time(), NaiveTime::from_hms_opt(23, 15, 0).unwrap());
    }
}
