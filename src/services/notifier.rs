// src/services/notifier.rs

//! Change notifications for rules with `notify_enabled`.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::MonitorRule;
use crate::utils::truncate_graphemes;

/// A user-facing change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub rule_id: String,
    pub title: String,
    pub message: String,
}

impl Notification {
    /// Build the notification for a rule whose content changed to `content`.
    pub fn content_changed(rule: &MonitorRule, content: &str, max_chars: usize) -> Self {
        let excerpt = truncate_graphemes(content, max_chars);
        let description = rule.description.trim();
        let message = if description.is_empty() {
            excerpt
        } else {
            format!("{description}\n\n{excerpt}")
        };

        Self {
            rule_id: rule.id.clone(),
            title: format!("Content changed: {}", rule.name),
            message,
        }
    }
}

/// Delivers notifications. Failures are logged by the caller and never
/// affect rule state.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        log::info!(
            "[{}] {}: {}",
            notification.rule_id,
            notification.title,
            notification.message.replace('\n', " | ")
        );
        Ok(())
    }
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _notification: &Notification) -> Result<()> {
        Ok(())
    }
}
