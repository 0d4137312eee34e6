// src/services/scheduler.rs

//! Per-rule timers.
//!
//! Each running rule owns one tokio task that ticks at the rule's interval
//! and spawns each check as its own task, so a slow or failing check never
//! delays another rule's timer. A timer keeps at most one check in flight;
//! ticks that arrive while it runs are skipped. The timers map is the only
//! place a timer is armed or cancelled, and `enabled` is written under the
//! same lock, which keeps `enabled == true` exactly when a live timer exists.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::Result;
use crate::models::{CheckResult, MAX_INTERVAL, MonitorRule, RuleId, RuleStatus};
use crate::services::checker::Checker;
use crate::services::events::EventPublisher;
use crate::storage::RuleStore;

/// A live timer for one rule.
struct TimerHandle {
    handle: JoinHandle<()>,
    shutdown: Option<oneshot::Sender<()>>,
    /// Set on cancel. A tick's check that has not begun yet sees it and
    /// does nothing.
    cancelled: Arc<AtomicBool>,
    interval: Duration,
}

impl TimerHandle {
    fn cancel(mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.handle.abort();
    }
}

pub struct Scheduler {
    store: Arc<RuleStore>,
    checker: Arc<Checker>,
    events: EventPublisher,
    timers: Mutex<HashMap<RuleId, TimerHandle>>,
    check_on_start: bool,
}

impl Scheduler {
    pub fn new(
        store: Arc<RuleStore>,
        checker: Arc<Checker>,
        events: EventPublisher,
        check_on_start: bool,
    ) -> Self {
        Self {
            store,
            checker,
            events,
            timers: Mutex::new(HashMap::new()),
            check_on_start,
        }
    }

    /// Arm the rule's timer and set `enabled`.
    ///
    /// Returns `false` if the rule was already running.
    pub fn start(&self, id: &str) -> Result<bool> {
        let mut timers = self.lock_timers();
        let slot = self.store.slot(id)?;
        if timers.contains_key(id) {
            return Ok(false);
        }

        let (interval, status) = slot.modify(|r| {
            r.enabled = true;
            if r.status == RuleStatus::Paused {
                r.status = RuleStatus::Idle;
            }
            (r.interval, r.status)
        });
        timers.insert(
            id.to_string(),
            self.spawn_timer(id, interval, self.check_on_start),
        );
        drop(timers);

        log::info!("[{id}] Monitoring started (every {}s)", interval.as_secs());
        self.events.status_changed(id, status);
        Ok(true)
    }

    /// Cancel the rule's timer, clear `enabled` and mark it `paused`.
    ///
    /// Returns `false` if the rule was not running. A check that already
    /// began may still finish and record its result; one still waiting to
    /// begin is dropped.
    pub fn stop(&self, id: &str) -> Result<bool> {
        let mut timers = self.lock_timers();
        let slot = self.store.slot(id)?;
        let Some(timer) = timers.remove(id) else {
            return Ok(false);
        };

        timer.cancel();
        slot.modify(|r| {
            r.enabled = false;
            r.status = RuleStatus::Paused;
        });
        drop(timers);

        log::info!("[{id}] Monitoring stopped");
        self.events.status_changed(id, RuleStatus::Paused);
        Ok(true)
    }

    /// Stop every running rule. Returns the ids that were stopped.
    pub fn stop_all(&self) -> Vec<RuleId> {
        let mut stopped = Vec::new();
        for id in self.running_ids() {
            match self.stop(&id) {
                Ok(true) => stopped.push(id),
                Ok(false) => {}
                Err(e) => log::warn!("[{id}] Failed to stop: {e}"),
            }
        }
        stopped
    }

    /// Re-arm a running rule whose interval changed.
    ///
    /// The new timer waits one full interval before its first tick. Returns
    /// `true` if a timer was replaced.
    pub fn rearm(&self, id: &str) -> Result<bool> {
        let mut timers = self.lock_timers();
        let interval = self.store.get(id)?.interval;
        let Some(timer) = timers.get_mut(id) else {
            return Ok(false);
        };
        if timer.interval == interval {
            return Ok(false);
        }

        let old = std::mem::replace(timer, self.spawn_timer(id, interval, false));
        old.cancel();
        log::info!("[{id}] Timer re-armed (every {}s)", interval.as_secs());
        Ok(true)
    }

    /// Cancel the rule's timer and remove the rule from the store as one
    /// step, so no timer can outlive its rule.
    pub fn retire(&self, id: &str) -> Result<MonitorRule> {
        let mut timers = self.lock_timers();
        if let Some(timer) = timers.remove(id) {
            timer.cancel();
            log::debug!("[{id}] Timer cancelled for deletion");
        }
        self.store.remove(id)
    }

    /// Run one check now, regardless of the timer. The timer's phase is
    /// left alone.
    pub async fn check_now(&self, id: &str) -> Result<CheckResult> {
        self.checker.check(id).await
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.lock_timers().contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.lock_timers().len()
    }

    pub fn running_ids(&self) -> Vec<RuleId> {
        self.lock_timers().keys().cloned().collect()
    }

    /// Cancel every timer and clear `enabled` without emitting events.
    pub fn shutdown(&self) {
        let mut timers = self.lock_timers();
        let count = timers.len();
        for (id, timer) in timers.drain() {
            timer.cancel();
            let _ = self.store.modify(&id, |r| r.enabled = false);
        }
        if count > 0 {
            log::info!("Cancelled {count} timers");
        }
    }

    fn spawn_timer(&self, id: &str, interval: Duration, immediate: bool) -> TimerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let checker = Arc::clone(&self.checker);
        let flag = Arc::clone(&cancelled);
        let id = id.to_string();
        // Rules restored from disk skip validation, so bound the period here
        // too; tokio adds it to `Instant`s when computing deadlines.
        let period = interval.clamp(Duration::from_secs(1), MAX_INTERVAL);

        let handle = tokio::spawn(async move {
            let now = Instant::now();
            let first = if immediate {
                now
            } else {
                now.checked_add(period).unwrap_or(now)
            };
            let mut ticker = tokio::time::interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut in_flight: Option<JoinHandle<()>> = None;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if in_flight.as_ref().is_some_and(|check| !check.is_finished()) {
                            log::debug!("[{id}] Previous check still running; tick skipped");
                            continue;
                        }
                        let checker = Arc::clone(&checker);
                        let flag = Arc::clone(&flag);
                        let id = id.clone();
                        in_flight = Some(tokio::spawn(async move {
                            match checker.check_unless_cancelled(&id, &flag).await {
                                Ok(_) => {}
                                Err(e) if e.is_not_found() => {
                                    log::debug!("[{id}] Tick for deleted rule ignored");
                                }
                                Err(e) => log::error!("[{id}] Scheduled check failed: {e}"),
                            }
                        }));
                    }
                }
            }
            log::debug!("[{id}] Timer stopped");
        });

        TimerHandle {
            handle,
            shutdown: Some(shutdown_tx),
            cancelled,
            interval,
        }
    }

    fn lock_timers(&self) -> MutexGuard<'_, HashMap<RuleId, TimerHandle>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let timers = self.timers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, timer) in timers.drain() {
            timer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::models::{ExtractorType, MonitorEvent, NotificationConfig};
    use crate::services::notifier::NoopNotifier;
    use crate::services::test_support::{ScriptedFetcher, html};
    use tokio::sync::broadcast;

    struct Harness {
        store: Arc<RuleStore>,
        fetcher: Arc<ScriptedFetcher>,
        scheduler: Scheduler,
        events: broadcast::Receiver<MonitorEvent>,
    }

    fn harness(check_on_start: bool) -> Harness {
        let store = Arc::new(RuleStore::new());
        let fetcher = Arc::new(ScriptedFetcher::new(html("<h1>Hello</h1>")));
        let publisher = EventPublisher::new(256);
        let events = publisher.subscribe();
        let checker = Arc::new(Checker::new(
            Arc::clone(&store),
            fetcher.clone(),
            Arc::new(NoopNotifier),
            publisher.clone(),
            Duration::from_secs(5),
            NotificationConfig::default(),
        ));
        let scheduler = Scheduler::new(Arc::clone(&store), checker, publisher, check_on_start);
        Harness {
            store,
            fetcher,
            scheduler,
            events,
        }
    }

    fn add_rule(store: &RuleStore, secs: u64) -> String {
        store
            .insert(MonitorRule::new(
                "Example",
                "https://example.com",
                ExtractorType::Css,
                "h1",
                Duration::from_secs(secs),
            ))
            .id
    }

    /// Let spawned timer and check tasks run.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn status_events(events: &mut broadcast::Receiver<MonitorEvent>) -> Vec<RuleStatus> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let MonitorEvent::RuleStatusChanged { status, .. } = event {
                out.push(status);
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let mut h = harness(false);
        let id = add_rule(&h.store, 60);

        assert!(h.scheduler.start(&id).unwrap());
        assert!(!h.scheduler.start(&id).unwrap());

        assert_eq!(h.scheduler.active_count(), 1);
        assert!(h.scheduler.is_running(&id));
        assert!(h.store.get(&id).unwrap().enabled);
        assert_eq!(status_events(&mut h.events), [RuleStatus::Idle]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let mut h = harness(false);
        let id = add_rule(&h.store, 60);

        assert!(!h.scheduler.stop(&id).unwrap());
        h.scheduler.start(&id).unwrap();
        assert!(h.scheduler.stop(&id).unwrap());
        assert!(!h.scheduler.stop(&id).unwrap());

        let rule = h.store.get(&id).unwrap();
        assert!(!rule.enabled);
        assert_eq!(rule.status, RuleStatus::Paused);
        assert_eq!(h.scheduler.active_count(), 0);
        assert_eq!(
            status_events(&mut h.events),
            [RuleStatus::Idle, RuleStatus::Paused]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_id_is_not_found() {
        let h = harness(false);
        assert!(h.scheduler.start("missing").unwrap_err().is_not_found());
        assert!(h.scheduler.stop("missing").unwrap_err().is_not_found());
        assert!(h.scheduler.retire("missing").unwrap_err().is_not_found());
        assert!(h.scheduler.check_now("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_follow_interval() {
        let h = harness(true);
        let id = add_rule(&h.store, 60);

        h.scheduler.start(&id).unwrap();
        settle().await;
        assert_eq!(h.fetcher.calls(), 1);

        tokio::time::sleep(Duration::from_secs(59)).await;
        settle().await;
        assert_eq!(h.fetcher.calls(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(h.fetcher.calls(), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(h.fetcher.calls(), 3);
        assert_eq!(h.store.get(&id).unwrap().last_content, "Hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_check_on_start_first_tick_waits() {
        let h = harness(false);
        let id = add_rule(&h.store, 30);

        h.scheduler.start(&id).unwrap();
        settle().await;
        assert_eq!(h.fetcher.calls(), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        settle().await;
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_future_ticks() {
        let h = harness(true);
        let id = add_rule(&h.store, 10);

        h.scheduler.start(&id).unwrap();
        settle().await;
        h.scheduler.stop(&id).unwrap();

        tokio::time::sleep(Duration::from_secs(100)).await;
        settle().await;
        assert_eq!(h.fetcher.calls(), 1);
        assert_eq!(h.store.get(&id).unwrap().status, RuleStatus::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_checks_do_not_pile_up() {
        let h = harness(true);
        h.fetcher.set_delay(Duration::from_secs(30));
        let id = add_rule(&h.store, 1);

        h.scheduler.start(&id).unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        let during = h.fetcher.calls();
        assert!((2..=3).contains(&during), "fetches while running: {during}");
        assert_eq!(h.fetcher.max_concurrent(), 1);

        h.scheduler.stop(&id).unwrap();
        tokio::time::sleep(Duration::from_secs(20 * 60)).await;
        settle().await;

        assert_eq!(h.fetcher.calls(), during);
        let rule = h.store.get(&id).unwrap();
        assert!(!rule.enabled);
        assert_eq!(rule.status, RuleStatus::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_waiting_behind_manual_check_is_dropped_on_stop() {
        let h = harness(false);
        h.fetcher.set_delay(Duration::from_secs(30));
        let id = add_rule(&h.store, 10);
        h.scheduler.start(&id).unwrap();

        // The tick at 10s queues behind the manual check and the rule is
        // stopped before that check completes.
        let stop = async {
            tokio::time::sleep(Duration::from_secs(15)).await;
            settle().await;
            h.scheduler.stop(&id).unwrap();
        };
        let (manual, ()) = tokio::join!(h.scheduler.check_now(&id), stop);
        assert!(manual.unwrap().is_success());

        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(h.fetcher.calls(), 1);
        assert_eq!(h.store.get(&id).unwrap().status, RuleStatus::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_interval_keeps_timer_alive() {
        let h = harness(false);
        let id = add_rule(&h.store, 60);
        h.scheduler.start(&id).unwrap();

        h.store
            .modify(&id, |r| r.interval = Duration::from_secs(u64::MAX))
            .unwrap();
        assert!(h.scheduler.rearm(&id).unwrap());
        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;

        let timers = h.scheduler.lock_timers();
        assert!(!timers[&id].handle.is_finished());
        drop(timers);
        assert!(h.scheduler.is_running(&id));
        assert_eq!(h.fetcher.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_after_stop_resumes() {
        let h = harness(false);
        let id = add_rule(&h.store, 10);

        h.scheduler.start(&id).unwrap();
        h.scheduler.stop(&id).unwrap();
        h.scheduler.start(&id).unwrap();

        let rule = h.store.get(&id).unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.status, RuleStatus::Idle);

        tokio::time::sleep(Duration::from_secs(11)).await;
        settle().await;
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retire_leaves_no_timer() {
        let h = harness(true);
        let id = add_rule(&h.store, 10);

        h.scheduler.start(&id).unwrap();
        settle().await;
        let removed = h.scheduler.retire(&id).unwrap();
        assert_eq!(removed.id, id);

        tokio::time::sleep(Duration::from_secs(100)).await;
        settle().await;
        assert_eq!(h.fetcher.calls(), 1);
        assert_eq!(h.scheduler.active_count(), 0);
        assert!(!h.store.contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_changes_cadence() {
        let h = harness(false);
        let id = add_rule(&h.store, 100);
        h.scheduler.start(&id).unwrap();

        h.store
            .modify(&id, |r| r.interval = Duration::from_secs(10))
            .unwrap();
        assert!(h.scheduler.rearm(&id).unwrap());
        assert!(!h.scheduler.rearm(&id).unwrap());

        tokio::time::sleep(Duration::from_secs(35)).await;
        settle().await;
        assert_eq!(h.fetcher.calls(), 3);
        assert!(h.store.get(&id).unwrap().enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_of_stopped_rule_is_noop() {
        let h = harness(false);
        let id = add_rule(&h.store, 100);
        h.store
            .modify(&id, |r| r.interval = Duration::from_secs(10))
            .unwrap();
        assert!(!h.scheduler.rearm(&id).unwrap());
        assert_eq!(h.scheduler.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_rule_keeps_ticking_and_others_are_unaffected() {
        let h = harness(true);
        let failing = add_rule(&h.store, 10);
        let healthy = add_rule(&h.store, 10);
        h.fetcher.set_fallback(Err(FetchError::ConnectionFailed("refused".into())));

        h.scheduler.start(&failing).unwrap();
        settle().await;
        assert_eq!(h.store.get(&failing).unwrap().status, RuleStatus::Error);

        h.fetcher.set_fallback(html("<h1>Hello</h1>"));
        h.scheduler.start(&healthy).unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        settle().await;

        assert!(h.scheduler.is_running(&failing));
        assert_eq!(h.store.get(&healthy).unwrap().last_content, "Hello");
        assert_eq!(h.store.get(&failing).unwrap().status, RuleStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_now_keeps_timer_phase() {
        let h = harness(false);
        let id = add_rule(&h.store, 60);
        h.scheduler.start(&id).unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        let result = h.scheduler.check_now(&id).await.unwrap();
        assert!(result.changed());
        assert_eq!(h.fetcher.calls(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        settle().await;
        assert_eq!(h.fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_and_shutdown() {
        let h = harness(false);
        let a = add_rule(&h.store, 60);
        let b = add_rule(&h.store, 60);
        let c = add_rule(&h.store, 60);
        h.scheduler.start(&a).unwrap();
        h.scheduler.start(&b).unwrap();

        let mut stopped = h.scheduler.stop_all();
        stopped.sort();
        let mut expected = vec![a.clone(), b.clone()];
        expected.sort();
        assert_eq!(stopped, expected);
        assert_eq!(h.store.get(&c).unwrap().status, RuleStatus::Idle);

        h.scheduler.start(&c).unwrap();
        h.scheduler.shutdown();
        assert_eq!(h.scheduler.active_count(), 0);
        assert!(!h.store.get(&c).unwrap().enabled);
    }
}
