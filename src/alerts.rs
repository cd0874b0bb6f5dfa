// Alert reporting for chatsync
// The toast/notification surface lives outside the engine; this is its seam

use log::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Success,
    Error,
}

pub trait AlertSink: Send + Sync {
    fn show_alert(&self, message: &str, level: AlertLevel);
}

/// Default sink: alerts only go to the log
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn show_alert(&self, message: &str, level: AlertLevel) {
        match level {
            AlertLevel::Success => info!("[ALERT] {}", message),
            AlertLevel::Error => error!("[ALERT] {}", message),
        }
    }
}
