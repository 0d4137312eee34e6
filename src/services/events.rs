// src/services/events.rs

//! Fan-out of `MonitorEvent`s to any number of listeners.
//!
//! Backed by a tokio broadcast channel: publishing never waits on a
//! listener, a listener that falls behind by more than the channel capacity
//! loses the oldest events, and publishing with no listener is a no-op.

use chrono::Utc;
use tokio::sync::broadcast;

use crate::models::{MonitorEvent, MonitorRule, RuleStatus};
use crate::utils::content_digest;

#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<MonitorEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a new listener. It sees only events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: MonitorEvent) {
        match event.rule_id() {
            Some(id) => log::trace!("[{id}] Publishing {} event", event.kind()),
            None => log::trace!("Publishing {} event", event.kind()),
        }
        // An error only means nobody is listening.
        let _ = self.sender.send(event);
    }

    pub fn rule_updated(&self) {
        self.publish(MonitorEvent::RuleUpdated);
    }

    pub fn content_changed(&self, rule: &MonitorRule, content: &str) {
        self.publish(MonitorEvent::ContentChanged {
            rule_id: rule.id.clone(),
            rule: Box::new(rule.clone()),
            content: content.to_string(),
            digest: content_digest(content),
            timestamp: Utc::now(),
        });
    }

    pub fn status_changed(&self, rule_id: &str, status: RuleStatus) {
        self.publish(MonitorEvent::RuleStatusChanged {
            rule_id: rule_id.to_string(),
            status,
            timestamp: Utc::now(),
        });
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}
