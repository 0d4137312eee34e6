//! Shared doubles for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pagewatch::MonitorEngine;
use pagewatch::error::{FetchError, Result};
use pagewatch::models::{Config, ExtractorType, MonitorEvent, MonitorRule};
use pagewatch::services::{FetchRequest, FetchResponse, Fetcher, Notification, Notifier};
use pagewatch::storage::RuleRepository;
use tokio::sync::broadcast;

pub type Reply = std::result::Result<FetchResponse, FetchError>;

pub fn html(body: &str) -> Reply {
    Ok(FetchResponse {
        status: 200,
        content_type: Some("text/html".into()),
        body: body.as_bytes().to_vec(),
    })
}

/// Replies from a queue, then repeats the fallback.
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Reply>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn push(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, _request: &FetchRequest) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Repository that keeps the last saved snapshot in memory.
#[derive(Default)]
pub struct MemoryRepository {
    rules: Mutex<Vec<MonitorRule>>,
    saves: AtomicUsize,
}

impl MemoryRepository {
    pub fn with_rules(rules: Vec<MonitorRule>) -> Arc<Self> {
        Arc::new(Self {
            rules: Mutex::new(rules),
            saves: AtomicUsize::new(0),
        })
    }

    pub fn saved(&self) -> Vec<MonitorRule> {
        self.rules.lock().unwrap().clone()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuleRepository for MemoryRepository {
    async fn load_rules(&self) -> Result<Vec<MonitorRule>> {
        Ok(self.saved())
    }

    async fn save_rules(&self, rules: &[MonitorRule]) -> Result<()> {
        *self.rules.lock().unwrap() = rules.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Harness {
    pub engine: MonitorEngine,
    pub fetcher: Arc<ScriptedFetcher>,
    pub notifier: Arc<RecordingNotifier>,
    pub repository: Arc<MemoryRepository>,
}

pub fn harness(config: Config, repository: Arc<MemoryRepository>) -> Harness {
    let fetcher = ScriptedFetcher::new(html("<h1>Hello</h1>"));
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = MonitorEngine::with_components(
        config,
        repository.clone(),
        fetcher.clone(),
        notifier.clone(),
    );
    Harness {
        engine,
        fetcher,
        notifier,
        repository,
    }
}

pub fn example_rule(interval_secs: u64) -> MonitorRule {
    MonitorRule::new(
        "Example",
        "https://example.com",
        ExtractorType::Css,
        "h1",
        Duration::from_secs(interval_secs),
    )
}

/// Let spawned timer and check tasks run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub fn drain(events: &mut broadcast::Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

pub fn count_kind(events: &[MonitorEvent], kind: &str) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}
