// src/services/checker.rs

//! One fetch, extract and compare cycle for one rule.
//!
//! Status writes made by a check:
//!
//! ```text
//! (any) --start--> running --ok----> idle   (paused if stopped mid-check)
//!                          \-fail--> error
//! ```
//!
//! Every status write emits `rule_status_changed`. A check never writes
//! `enabled`, and a failed check never touches `last_content` or
//! `last_checked`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;

use crate::error::{AppError, Result};
use crate::models::{CheckError, CheckResult, MonitorRule, NotificationConfig, RuleStatus};
use crate::services::events::EventPublisher;
use crate::services::extractor;
use crate::services::fetcher::{FetchRequest, Fetcher};
use crate::services::notifier::{Notification, Notifier};
use crate::storage::{RuleSlot, RuleStore};

/// Fetch the rule's URL and extract its value. No state is touched.
pub async fn run_pipeline(
    fetcher: &dyn Fetcher,
    rule: &MonitorRule,
    timeout: Duration,
) -> std::result::Result<String, CheckError> {
    let response = fetcher
        .fetch(&FetchRequest::from_rule(rule, timeout))
        .await?;
    let extracted = extractor::extract(&response.body, rule.extractor_type, &rule.extractor_expr)?;
    Ok(extracted)
}

/// Whether `extracted` counts as a change against the stored rule.
///
/// The first successful check always counts as a change.
pub fn is_change(rule: &MonitorRule, extracted: &str) -> bool {
    rule.last_checked.is_none() || rule.last_content != extracted
}

/// Runs checks against the rule store and reports their effects.
pub struct Checker {
    store: Arc<RuleStore>,
    fetcher: Arc<dyn Fetcher>,
    notifier: Arc<dyn Notifier>,
    events: EventPublisher,
    timeout: Duration,
    notification: NotificationConfig,
}

impl Checker {
    pub fn new(
        store: Arc<RuleStore>,
        fetcher: Arc<dyn Fetcher>,
        notifier: Arc<dyn Notifier>,
        events: EventPublisher,
        timeout: Duration,
        notification: NotificationConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            notifier,
            events,
            timeout,
            notification,
        }
    }

    /// Check one rule and record the outcome on it.
    ///
    /// Waits if another check of the same rule is in flight. Pipeline
    /// failures are recorded on the rule and returned as
    /// `CheckResult::Failed`; the only `Err` is `NotFound`. If the rule is
    /// deleted while the check runs, the result is dropped without writes
    /// or events.
    pub async fn check(&self, id: &str) -> Result<CheckResult> {
        let slot = self.store.slot(id)?;
        let _guard = slot.lock_check().await;

        let rule = slot
            .modify(|r| {
                if slot.is_retired() {
                    return None;
                }
                r.status = RuleStatus::Running;
                Some(r.clone())
            })
            .ok_or_else(|| AppError::not_found(id))?;
        Ok(self.run_started(id, &slot, rule).await)
    }

    /// Like [`Checker::check`], for a timer tick.
    ///
    /// Returns `Ok(None)` without fetching or writing anything if
    /// `cancelled` is set by the time the check would begin, e.g. because
    /// the rule was stopped while the tick waited behind another check.
    pub async fn check_unless_cancelled(
        &self,
        id: &str,
        cancelled: &AtomicBool,
    ) -> Result<Option<CheckResult>> {
        let slot = self.store.slot(id)?;
        let _guard = slot.lock_check().await;

        let begun = slot.modify(|r| {
            if slot.is_retired() {
                return Err(AppError::not_found(id));
            }
            if cancelled.load(Ordering::SeqCst) {
                return Ok(None);
            }
            r.status = RuleStatus::Running;
            Ok(Some(r.clone()))
        })?;
        let Some(rule) = begun else {
            log::debug!("[{id}] Timer cancelled before check began");
            return Ok(None);
        };
        Ok(Some(self.run_started(id, &slot, rule).await))
    }

    /// Announce `running`, run the pipeline and record the outcome.
    async fn run_started(&self, id: &str, slot: &RuleSlot, rule: MonitorRule) -> CheckResult {
        self.events.status_changed(id, RuleStatus::Running);
        log::debug!("[{id}] Checking {} {}", rule.method, rule.url);

        match run_pipeline(self.fetcher.as_ref(), &rule, self.timeout).await {
            Err(error) => self.record_failure(id, slot, error),
            Ok(extracted) => self.record_success(id, slot, extracted).await,
        }
    }

    fn record_failure(
        &self,
        id: &str,
        slot: &RuleSlot,
        error: CheckError,
    ) -> CheckResult {
        let result = CheckResult::failed(error);
        let message = result.error_message().unwrap_or_default().to_string();

        let written = slot.modify(|r| {
            if slot.is_retired() {
                return false;
            }
            r.status = RuleStatus::Error;
            r.error_message = Some(message.clone());
            true
        });
        if !written {
            log::debug!("[{id}] Rule deleted during check; dropping failure");
            return result;
        }

        log::warn!("[{id}] Check failed: {message}");
        self.events.status_changed(id, RuleStatus::Error);
        result
    }

    async fn record_success(
        &self,
        id: &str,
        slot: &RuleSlot,
        extracted: String,
    ) -> CheckResult {
        let written = slot.modify(|r| {
            if slot.is_retired() {
                return None;
            }
            let changed = is_change(r, &extracted);
            if changed {
                r.last_content = extracted.clone();
            }
            r.last_checked = Some(Utc::now());
            r.error_message = None;
            // A stop during the check already wrote `paused`.
            if r.status != RuleStatus::Paused {
                r.status = RuleStatus::Idle;
            }
            Some((r.clone(), changed))
        });

        let Some((snapshot, changed)) = written else {
            log::debug!("[{id}] Rule deleted during check; dropping result");
            return CheckResult::Extracted {
                extracted,
                changed: false,
            };
        };

        self.events.status_changed(id, snapshot.status);
        if changed {
            log::info!("[{id}] Content changed for '{}'", snapshot.name);
            self.events.content_changed(&snapshot, &extracted);
        } else {
            log::debug!("[{id}] Content unchanged");
        }
        self.events.rule_updated();

        if changed && snapshot.notify_enabled && self.notification.enabled {
            let notification = Notification::content_changed(
                &snapshot,
                &extracted,
                self.notification.max_message_chars,
            );
            if let Err(e) = self.notifier.notify(&notification).await {
                log::warn!("[{id}] Notification failed: {e}");
            }
        }

        CheckResult::Extracted { extracted, changed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::models::{ExtractorType, MonitorEvent};
    use crate::services::test_support::{RecordingNotifier, ScriptedFetcher, html};
    use tokio::sync::broadcast;

    struct Harness {
        store: Arc<RuleStore>,
        fetcher: Arc<ScriptedFetcher>,
        notifier: Arc<RecordingNotifier>,
        checker: Checker,
        events: broadcast::Receiver<MonitorEvent>,
    }

    fn harness() -> Harness {
        let store = Arc::new(RuleStore::new());
        let fetcher = Arc::new(ScriptedFetcher::new(html("<h1>Hello</h1>")));
        let notifier = Arc::new(RecordingNotifier::default());
        let publisher = EventPublisher::new(64);
        let events = publisher.subscribe();
        let checker = Checker::new(
            Arc::clone(&store),
            fetcher.clone(),
            notifier.clone(),
            publisher,
            Duration::from_secs(5),
            NotificationConfig::default(),
        );
        Harness {
            store,
            fetcher,
            notifier,
            checker,
            events,
        }
    }

    fn add_rule(store: &RuleStore, notify: bool) -> String {
        let mut rule = MonitorRule::new(
            "Example",
            "https://example.com",
            ExtractorType::Css,
            "h1",
            Duration::from_secs(60),
        );
        rule.notify_enabled = notify;
        store.insert(rule).id
    }

    fn drain(events: &mut broadcast::Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn kinds(events: &[MonitorEvent]) -> Vec<&'static str> {
        events.iter().map(MonitorEvent::kind).collect()
    }

    #[tokio::test]
    async fn test_first_success_is_a_change() {
        let mut h = harness();
        let id = add_rule(&h.store, false);

        let result = h.checker.check(&id).await.unwrap();
        assert_eq!(
            result,
            CheckResult::Extracted {
                extracted: "Hello".into(),
                changed: true
            }
        );

        let rule = h.store.get(&id).unwrap();
        assert_eq!(rule.last_content, "Hello");
        assert!(rule.last_checked.is_some());
        assert_eq!(rule.status, RuleStatus::Idle);
        assert!(!rule.enabled);

        let events = drain(&mut h.events);
        assert_eq!(
            kinds(&events),
            [
                "rule_status_changed",
                "rule_status_changed",
                "content_changed",
                "rule_updated"
            ]
        );
        match &events[2] {
            MonitorEvent::ContentChanged { rule, content, .. } => {
                assert_eq!(content, "Hello");
                assert_eq!(rule.last_content, "Hello");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unchanged_content_emits_no_content_changed() {
        let mut h = harness();
        let id = add_rule(&h.store, true);
        h.checker.check(&id).await.unwrap();
        let first_checked = h.store.get(&id).unwrap().last_checked;
        drain(&mut h.events);

        let result = h.checker.check(&id).await.unwrap();
        assert!(result.is_success());
        assert!(!result.changed());

        let rule = h.store.get(&id).unwrap();
        assert_eq!(rule.last_content, "Hello");
        assert!(rule.last_checked >= first_checked);
        assert_eq!(
            kinds(&drain(&mut h.events)),
            ["rule_status_changed", "rule_status_changed", "rule_updated"]
        );
        assert_eq!(h.notifier.count(), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_last_good_content() {
        let mut h = harness();
        let id = add_rule(&h.store, false);
        h.checker.check(&id).await.unwrap();
        let before = h.store.get(&id).unwrap();
        drain(&mut h.events);

        h.fetcher
            .push(Err(FetchError::Timeout("operation timed out".into())));
        let result = h.checker.check(&id).await.unwrap();
        assert!(!result.is_success());

        let rule = h.store.get(&id).unwrap();
        assert_eq!(rule.status, RuleStatus::Error);
        assert_eq!(rule.last_content, "Hello");
        assert_eq!(rule.last_checked, before.last_checked);
        let message = rule.error_message.unwrap();
        assert!(message.contains("timed out"), "{message}");

        let events = drain(&mut h.events);
        assert_eq!(kinds(&events), ["rule_status_changed", "rule_status_changed"]);
        assert!(matches!(
            events[1],
            MonitorEvent::RuleStatusChanged {
                status: RuleStatus::Error,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_extraction_failure_is_recorded() {
        let h = harness();
        let id = add_rule(&h.store, false);
        h.fetcher.set_fallback(html("<p>no heading</p>"));

        let result = h.checker.check(&id).await.unwrap();
        assert_eq!(
            result.error_message(),
            Some("extraction failed: no match for 'h1'")
        );
        let rule = h.store.get(&id).unwrap();
        assert_eq!(rule.status, RuleStatus::Error);
        assert!(rule.last_content.is_empty());
        assert!(rule.last_checked.is_none());
    }

    #[tokio::test]
    async fn test_recovery_clears_error() {
        let h = harness();
        let id = add_rule(&h.store, false);
        h.fetcher.push(Err(FetchError::HttpError(503)));
        h.checker.check(&id).await.unwrap();
        assert_eq!(h.store.get(&id).unwrap().status, RuleStatus::Error);

        h.checker.check(&id).await.unwrap();
        let rule = h.store.get(&id).unwrap();
        assert_eq!(rule.status, RuleStatus::Idle);
        assert!(rule.error_message.is_none());
    }

    #[tokio::test]
    async fn test_notification_policy() {
        let h = harness();
        let quiet = add_rule(&h.store, false);
        let loud = add_rule(&h.store, true);

        h.checker.check(&quiet).await.unwrap();
        h.checker.check(&loud).await.unwrap();
        h.checker.check(&loud).await.unwrap();

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].rule_id, loud);
        assert_eq!(sent[0].title, "Content changed: Example");
        assert_eq!(sent[0].message, "Hello");
    }

    #[tokio::test]
    async fn test_stop_during_check_keeps_paused() {
        let h = harness();
        let id = add_rule(&h.store, false);
        h.fetcher.set_delay(Duration::from_millis(50));

        let checker = &h.checker;
        let store = Arc::clone(&h.store);
        let stop = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            store.modify(&id, |r| r.status = RuleStatus::Paused).unwrap();
        };
        let (result, ()) = tokio::join!(checker.check(&id), stop);

        assert!(result.unwrap().is_success());
        let rule = h.store.get(&id).unwrap();
        assert_eq!(rule.status, RuleStatus::Paused);
        assert_eq!(rule.last_content, "Hello");
        assert!(!rule.enabled);
    }

    #[tokio::test]
    async fn test_delete_during_check_drops_result() {
        let mut h = harness();
        let id = add_rule(&h.store, true);
        h.fetcher.set_delay(Duration::from_millis(50));

        let store = Arc::clone(&h.store);
        let delete = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            store.remove(&id).unwrap();
        };
        let (result, ()) = tokio::join!(h.checker.check(&id), delete);

        assert!(result.is_ok());
        assert!(!h.store.contains(&id));
        // Only the `running` write happened before the delete.
        assert_eq!(kinds(&drain(&mut h.events)), ["rule_status_changed"]);
        assert_eq!(h.notifier.count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_rule_is_not_found() {
        let mut h = harness();
        let err = h.checker.check("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(drain(&mut h.events).is_empty());
        assert_eq!(h.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_checks_serialize() {
        let h = harness();
        let id = add_rule(&h.store, false);
        h.fetcher.set_delay(Duration::from_millis(20));

        let (a, b) = tokio::join!(h.checker.check(&id), h.checker.check(&id));

        assert!(a.unwrap().changed());
        assert!(!b.unwrap().changed());
        assert_eq!(h.fetcher.calls(), 2);
        assert_eq!(h.fetcher.max_concurrent(), 1);
    }
}
