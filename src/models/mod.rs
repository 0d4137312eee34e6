// src/models/mod.rs

//! Domain models for the monitor.
//!
//! This module contains the data structures shared by the store, the
//! scheduler and the control surface.

mod check;
mod config;
mod event;
mod rule;

// Re-export all public types
pub use check::{CheckError, CheckResult};
pub use config::{
    Config, EventsConfig, LoggingConfig, MonitorConfig, NotificationConfig, StorageConfig,
};
pub use event::MonitorEvent;
pub use rule::{DEFAULT_METHOD, ExtractorType, MAX_INTERVAL, MonitorRule, RuleId, RuleStatus};
