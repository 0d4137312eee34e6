// src/models/rule.rs

//! Monitor rule record and its enums.
//!
//! `MonitorRule` is the record that crosses every boundary: the control
//! surface, the push events and the persisted rules file. `interval` always
//! travels as an unsigned number of seconds.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};
use crate::services::extractor::Extractor;

/// Identifier of a rule, assigned by the store on creation.
pub type RuleId = String;

/// HTTP method used when a rule leaves `method` empty.
pub const DEFAULT_METHOD: &str = "GET";

/// Longest accepted check interval (one year).
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

const VALID_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// How a comparable value is pulled out of a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorType {
    /// CSS selector over an HTML document
    Css,
    /// Regular expression over the raw body text
    Regex,
    /// Path expression over a JSON document
    Json,
}

impl ExtractorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractorType::Css => "css",
            ExtractorType::Regex => "regex",
            ExtractorType::Json => "json",
        }
    }
}

impl fmt::Display for ExtractorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ExtractorType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "css" => Ok(ExtractorType::Css),
            "regex" => Ok(ExtractorType::Regex),
            "json" => Ok(ExtractorType::Json),
            other => Err(AppError::invalid_rule(format!(
                "unknown extractor type '{other}' (expected css, regex or json)"
            ))),
        }
    }
}

/// Lifecycle status of a rule.
///
/// `Running` only appears while a check is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Error,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleStatus::Idle => "idle",
            RuleStatus::Running => "running",
            RuleStatus::Paused => "paused",
            RuleStatus::Error => "error",
        }
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One monitoring task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorRule {
    /// Unique id, assigned on creation and never changed
    #[serde(default)]
    pub id: RuleId,

    /// Display name
    pub name: String,

    /// Free-form description, prepended to notifications
    #[serde(default)]
    pub description: String,

    /// Target URL (http or https)
    pub url: String,

    /// HTTP method
    #[serde(default = "default_method")]
    pub method: String,

    /// Extra request headers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Optional request body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Time between scheduled checks, in whole seconds on the wire
    #[serde(with = "interval_secs")]
    pub interval: Duration,

    pub extractor_type: ExtractorType,

    /// Selector, pattern or path, depending on `extractor_type`
    pub extractor_expr: String,

    /// Whether a content change triggers a notification
    #[serde(default)]
    pub notify_enabled: bool,

    /// Whether the scheduler holds a live timer for this rule
    #[serde(default)]
    pub enabled: bool,

    /// Last successfully extracted value
    #[serde(default)]
    pub last_content: String,

    /// Time of the last successful check
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,

    #[serde(default)]
    pub status: RuleStatus,

    /// Present only while `status` is `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

fn default_method() -> String {
    DEFAULT_METHOD.to_string()
}

impl MonitorRule {
    /// Create a GET rule with default runtime state.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        extractor_type: ExtractorType,
        extractor_expr: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            id: RuleId::new(),
            name: name.into(),
            description: String::new(),
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
            interval,
            extractor_type,
            extractor_expr: extractor_expr.into(),
            notify_enabled: false,
            enabled: false,
            last_content: String::new(),
            last_checked: None,
            status: RuleStatus::Idle,
            error_message: None,
        }
    }

    /// Fill in defaults that the caller may leave empty.
    pub fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
        self.url = self.url.trim().to_string();
        self.method = self.method.trim().to_uppercase();
        if self.method.is_empty() {
            self.method = default_method();
        }
        if self.body.as_deref().is_some_and(str::is_empty) {
            self.body = None;
        }
    }

    /// Validate the user-editable fields.
    ///
    /// Expects a normalized rule. `min_interval` is clamped to at least one
    /// second so a zero interval is always rejected.
    pub fn validate(&self, min_interval: Duration) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::invalid_rule("name must not be empty"));
        }

        if self.url.trim().is_empty() {
            return Err(AppError::invalid_rule("url must not be empty"));
        }
        let url = Url::parse(&self.url)
            .map_err(|e| AppError::invalid_rule(format!("invalid url '{}': {e}", self.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::invalid_rule(format!(
                "unsupported url scheme '{}'",
                url.scheme()
            )));
        }

        if !VALID_METHODS.contains(&self.method.as_str()) {
            return Err(AppError::invalid_rule(format!(
                "invalid HTTP method '{}'",
                self.method
            )));
        }

        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| AppError::invalid_rule(format!("invalid header name '{name}'")))?;
            HeaderValue::from_str(value).map_err(|_| {
                AppError::invalid_rule(format!("invalid value for header '{name}'"))
            })?;
        }

        let min_interval = min_interval.max(Duration::from_secs(1));
        if self.interval < min_interval {
            return Err(AppError::invalid_rule(format!(
                "interval must be at least {}s",
                min_interval.as_secs()
            )));
        }
        if self.interval > MAX_INTERVAL {
            return Err(AppError::invalid_rule(format!(
                "interval must be at most {}s",
                MAX_INTERVAL.as_secs()
            )));
        }

        if self.extractor_expr.trim().is_empty() {
            return Err(AppError::invalid_rule("extractor_expr must not be empty"));
        }
        Extractor::compile(self.extractor_type, &self.extractor_expr)
            .map_err(|e| AppError::invalid_rule(e.to_string()))?;

        Ok(())
    }

    /// Copy the user-editable fields from `edit`, keeping id and runtime state.
    pub fn apply_edit(&mut self, edit: &MonitorRule) {
        self.name = edit.name.clone();
        self.description = edit.description.clone();
        self.url = edit.url.clone();
        self.method = edit.method.clone();
        self.headers = edit.headers.clone();
        self.body = edit.body.clone();
        self.interval = edit.interval;
        self.extractor_type = edit.extractor_type;
        self.extractor_expr = edit.extractor_expr.clone();
        self.notify_enabled = edit.notify_enabled;
    }

    /// Reset runtime state to what a freshly added rule carries.
    pub fn reset_runtime(&mut self) {
        self.enabled = false;
        self.last_content.clear();
        self.last_checked = None;
        self.status = RuleStatus::Idle;
        self.error_message = None;
    }
}

/// Serde adapter encoding a `Duration` as whole seconds.
mod interval_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(interval: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(interval.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
