// src/models/event.rs

//! Push events emitted to listeners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{MonitorRule, RuleId, RuleStatus};

/// State-change notification, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// Some rule was mutated; listeners re-list.
    RuleUpdated,

    /// A check extracted a value different from the stored one.
    ContentChanged {
        rule_id: RuleId,
        rule: Box<MonitorRule>,
        content: String,
        /// SHA-256 of `content`, hex encoded
        digest: String,
        timestamp: DateTime<Utc>,
    },

    /// A rule's status was written.
    RuleStatusChanged {
        rule_id: RuleId,
        status: RuleStatus,
        timestamp: DateTime<Utc>,
    },
}

impl MonitorEvent {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorEvent::RuleUpdated => "rule_updated",
            MonitorEvent::ContentChanged { .. } => "content_changed",
            MonitorEvent::RuleStatusChanged { .. } => "rule_status_changed",
        }
    }

    pub fn rule_id(&self) -> Option<&str> {
        match self {
            MonitorEvent::RuleUpdated => None,
            MonitorEvent::ContentChanged { rule_id, .. }
            | MonitorEvent::RuleStatusChanged { rule_id, .. } => Some(rule_id),
        }
    }
}
