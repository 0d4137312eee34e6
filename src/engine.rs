// src/engine.rs

//! The monitor's operation surface.
//!
//! `MonitorEngine` wires the rule store, scheduler, checker, persistence and
//! event fan-out together and exposes the request/response operations a
//! transport layer would call. Control errors (`NotFound`, `InvalidRule`)
//! are returned to the caller; check failures are recorded on the rule.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, broadcast};

use crate::error::{AppError, Result};
use crate::models::{CheckResult, Config, MonitorEvent, MonitorRule, RuleId, RuleStatus};
use crate::services::{
    Checker, EventPublisher, Fetcher, HttpFetcher, LogNotifier, Notifier, Scheduler,
};
use crate::storage::{RuleRepository, RuleStore};

pub struct MonitorEngine {
    config: Config,
    store: Arc<RuleStore>,
    scheduler: Scheduler,
    events: EventPublisher,
    repository: Arc<dyn RuleRepository>,
    save_lock: Mutex<()>,
    initialized: AtomicBool,
}

impl MonitorEngine {
    /// Engine with the HTTP fetcher and log notifier.
    pub fn new(config: Config, repository: Arc<dyn RuleRepository>) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(&config.monitor)?);
        Ok(Self::with_components(
            config,
            repository,
            fetcher,
            Arc::new(LogNotifier),
        ))
    }

    pub fn with_components(
        config: Config,
        repository: Arc<dyn RuleRepository>,
        fetcher: Arc<dyn Fetcher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let store = Arc::new(RuleStore::new());
        let events = EventPublisher::new(config.events.capacity);
        let checker = Arc::new(Checker::new(
            Arc::clone(&store),
            fetcher,
            notifier,
            events.clone(),
            config.monitor.timeout(),
            config.notification.clone(),
        ));
        let scheduler = Scheduler::new(
            Arc::clone(&store),
            checker,
            events.clone(),
            config.monitor.check_on_start,
        );

        Self {
            config,
            store,
            scheduler,
            events,
            repository,
            save_lock: Mutex::new(()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Load persisted rules and resume the ones saved as enabled.
    ///
    /// Returns the number of rules loaded. A rule that fails to resume is
    /// logged and left stopped.
    pub async fn initialize(&self) -> Result<usize> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(AppError::config("engine already initialized"));
        }

        let persisted = self.repository.load_rules().await?;
        let mut resume = Vec::new();
        let mut loaded = 0;

        for mut rule in persisted {
            let wanted = rule.enabled;
            rule.enabled = false;
            if rule.status == RuleStatus::Running {
                rule.status = RuleStatus::Idle;
            }
            match self.store.restore(rule) {
                Ok(rule) => {
                    loaded += 1;
                    if wanted {
                        resume.push(rule.id);
                    }
                }
                Err(e) => log::warn!("Skipping persisted rule: {e}"),
            }
        }

        for id in &resume {
            if let Err(e) = self.scheduler.start(id) {
                log::warn!("[{id}] Failed to resume monitoring: {e}");
            }
        }

        log::info!(
            "Engine initialized: {loaded} rules loaded, {} resumed",
            self.scheduler.active_count()
        );
        if loaded > 0 {
            self.events.rule_updated();
        }
        Ok(loaded)
    }

    /// Save, then cancel every timer.
    ///
    /// The saved snapshot still carries the live `enabled` flags so the
    /// next `initialize` resumes the same rules.
    pub async fn shutdown(&self) -> Result<()> {
        let saved = self.persist().await;
        self.scheduler.shutdown();
        log::info!("Engine shut down");
        saved
    }

    pub fn get_rules(&self) -> Vec<MonitorRule> {
        self.store.snapshot()
    }

    pub fn get_rule(&self, id: &str) -> Result<MonitorRule> {
        self.store.get(id)
    }

    /// Validate and insert a rule under a fresh id, stopped and idle.
    pub async fn add_rule(&self, mut rule: MonitorRule) -> Result<MonitorRule> {
        rule.normalize();
        rule.validate(self.config.monitor.min_interval())?;

        let rule = self.store.insert(rule);
        log::info!("[{}] Rule '{}' added", rule.id, rule.name);
        self.events.rule_updated();
        self.save().await;
        Ok(rule)
    }

    /// Replace the user-editable fields of an existing rule.
    ///
    /// `enabled` cannot be changed here; a running rule whose interval
    /// changed is re-armed.
    pub async fn update_rule(&self, mut edit: MonitorRule) -> Result<MonitorRule> {
        let current = self.store.get(&edit.id)?;
        if edit.enabled != current.enabled {
            return Err(AppError::invalid_rule(
                "enabled can only be changed by starting or stopping the rule",
            ));
        }
        edit.normalize();
        edit.validate(self.config.monitor.min_interval())?;

        let id = edit.id.clone();
        let updated = self.store.modify(&id, |r| {
            r.apply_edit(&edit);
            r.clone()
        })?;
        self.scheduler.rearm(&id)?;

        log::info!("[{id}] Rule '{}' updated", updated.name);
        self.events.rule_updated();
        self.save().await;
        Ok(updated)
    }

    /// Cancel the rule's timer and remove it.
    pub async fn delete_rule(&self, id: &str) -> Result<()> {
        let removed = self.scheduler.retire(id)?;
        log::info!("[{id}] Rule '{}' deleted", removed.name);
        self.events.rule_updated();
        self.save().await;
        Ok(())
    }

    pub async fn start_monitoring(&self, id: &str) -> Result<()> {
        if self.scheduler.start(id)? {
            self.events.rule_updated();
            self.save().await;
        }
        Ok(())
    }

    pub async fn stop_monitoring(&self, id: &str) -> Result<()> {
        if self.scheduler.stop(id)? {
            self.events.rule_updated();
            self.save().await;
        }
        Ok(())
    }

    /// Stop every running rule. Returns the ids that were stopped.
    pub async fn stop_all_monitoring(&self) -> Vec<RuleId> {
        let stopped = self.scheduler.stop_all();
        if !stopped.is_empty() {
            self.events.rule_updated();
            self.save().await;
        }
        stopped
    }

    /// Start every stopped rule. Returns the ids that were started.
    pub async fn start_all_monitoring(&self) -> Vec<RuleId> {
        let mut started = Vec::new();
        for id in self.store.ids() {
            match self.scheduler.start(&id) {
                Ok(true) => started.push(id),
                Ok(false) => {}
                Err(e) => log::warn!("[{id}] Failed to start: {e}"),
            }
        }
        if !started.is_empty() {
            self.events.rule_updated();
            self.save().await;
        }
        started
    }

    /// Run one check now and wait for it. Pipeline failures are recorded on
    /// the rule and reported in the returned `CheckResult`.
    pub async fn check_now(&self, id: &str) -> Result<CheckResult> {
        let result = self.scheduler.check_now(id).await?;
        self.save().await;
        Ok(result)
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.scheduler.is_running(id)
    }

    pub fn active_count(&self) -> usize {
        self.scheduler.active_count()
    }

    /// Listen for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Write the current rule table to the repository.
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let snapshot = self.store.snapshot();
        self.repository.save_rules(&snapshot).await
    }

    /// Persist after a mutation. The in-memory change stands even when the
    /// write fails.
    async fn save(&self) {
        if let Err(e) = self.persist().await {
            log::error!("Failed to persist rules: {e}");
        }
    }
}
