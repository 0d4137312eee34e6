// src/storage/mod.rs

//! Rule storage.
//!
//! `RuleStore` is the authoritative in-memory table of rules. Each rule
//! lives in its own `RuleSlot` with a record lock for field writes and an
//! async check guard that serializes checks of that rule. The table lock is
//! held only to look up, insert or remove a slot, so work on one rule never
//! blocks another.
//!
//! `RuleRepository` persists snapshots of the table; `LocalStorage` is the
//! JSON file backend.

pub mod local;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{MonitorRule, RuleId};

pub use local::LocalStorage;

/// One rule and its per-rule locks.
#[derive(Debug)]
pub struct RuleSlot {
    seq: u64,
    record: Mutex<MonitorRule>,
    check_lock: tokio::sync::Mutex<()>,
    retired: AtomicBool,
}

impl RuleSlot {
    fn new(seq: u64, rule: MonitorRule) -> Self {
        Self {
            seq,
            record: Mutex::new(rule),
            check_lock: tokio::sync::Mutex::new(()),
            retired: AtomicBool::new(false),
        }
    }

    /// Copy of the current record.
    pub fn read(&self) -> MonitorRule {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `f` to the record under its lock. Never hold this across an await.
    pub fn modify<R>(&self, f: impl FnOnce(&mut MonitorRule) -> R) -> R {
        let mut record = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut record)
    }

    /// Wait for exclusive right to run a check of this rule.
    pub async fn lock_check(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.check_lock.lock().await
    }

    /// Whether the rule has been removed from the store.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }
}

/// In-memory rule table keyed by id.
#[derive(Debug, Default)]
pub struct RuleStore {
    slots: RwLock<HashMap<RuleId, Arc<RuleSlot>>>,
    next_seq: AtomicU64,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new rule under a fresh id with initial runtime state.
    pub fn insert(&self, mut rule: MonitorRule) -> MonitorRule {
        rule.id = Uuid::new_v4().to_string();
        rule.reset_runtime();

        let stored = rule.clone();
        let slot = Arc::new(RuleSlot::new(self.next_seq(), rule));
        self.write_slots().insert(stored.id.clone(), slot);
        stored
    }

    /// Insert a previously persisted rule, keeping its id.
    ///
    /// Rules without an id get a fresh one.
    pub fn restore(&self, mut rule: MonitorRule) -> Result<MonitorRule> {
        if rule.id.trim().is_empty() {
            rule.id = Uuid::new_v4().to_string();
        }

        let mut slots = self.write_slots();
        if slots.contains_key(&rule.id) {
            return Err(AppError::validation(format!(
                "duplicate rule id '{}'",
                rule.id
            )));
        }
        let stored = rule.clone();
        slots.insert(
            rule.id.clone(),
            Arc::new(RuleSlot::new(self.next_seq(), rule)),
        );
        Ok(stored)
    }

    pub fn slot(&self, id: &str) -> Result<Arc<RuleSlot>> {
        self.read_slots()
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::not_found(id))
    }

    pub fn get(&self, id: &str) -> Result<MonitorRule> {
        Ok(self.slot(id)?.read())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read_slots().contains_key(id)
    }

    /// Apply `f` to one rule's record under its lock.
    pub fn modify<R>(&self, id: &str, f: impl FnOnce(&mut MonitorRule) -> R) -> Result<R> {
        Ok(self.slot(id)?.modify(f))
    }

    /// Remove a rule. Its slot is marked retired so in-flight checks drop
    /// their results.
    pub fn remove(&self, id: &str) -> Result<MonitorRule> {
        let slot = self
            .write_slots()
            .remove(id)
            .ok_or_else(|| AppError::not_found(id))?;
        // Retire under the record lock so a check either finishes its write
        // first or sees the flag.
        Ok(slot.modify(|r| {
            slot.retire();
            r.clone()
        }))
    }

    /// All rules in creation order.
    pub fn snapshot(&self) -> Vec<MonitorRule> {
        let mut slots: Vec<Arc<RuleSlot>> = self.read_slots().values().cloned().collect();
        slots.sort_by_key(|slot| slot.seq);
        slots.iter().map(|slot| slot.read()).collect()
    }

    pub fn ids(&self) -> Vec<RuleId> {
        self.snapshot().into_iter().map(|rule| rule.id).collect()
    }

    pub fn len(&self) -> usize {
        self.read_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn read_slots(&self) -> std::sync::RwLockReadGuard<'_, HashMap<RuleId, Arc<RuleSlot>>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slots(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<RuleId, Arc<RuleSlot>>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// On-disk shape of the rules file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesFile {
    pub version: String,
    pub rules: Vec<MonitorRule>,
}

impl RulesFile {
    pub const VERSION: &'static str = "1";

    pub fn new(rules: Vec<MonitorRule>) -> Self {
        Self {
            version: Self::VERSION.to_string(),
            rules,
        }
    }
}

/// Trait for rule persistence backends.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Load every persisted rule. A missing store loads as empty.
    async fn load_rules(&self) -> Result<Vec<MonitorRule>>;

    /// Replace the persisted rules with `rules`.
    async fn save_rules(&self, rules: &[MonitorRule]) -> Result<()>;
}
