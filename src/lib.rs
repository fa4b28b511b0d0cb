pub mod cli;
pub mod infrastructure;
pub mod notification;

pub use infrastructure::error::{NotificationError, Result};
pub use notification::{NotificationEngine, NotificationPriority, NotificationRequest};
