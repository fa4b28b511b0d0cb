pub mod config;
pub mod error;
pub mod logging;

pub use config::{ConfigManager, ConfigSource, NotificationSettings, SettingsProvider};
pub use error::NotificationError;
pub use logging::{setup_logging, LoggingConfig};
