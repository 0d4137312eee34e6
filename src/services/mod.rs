//! Service layer for the monitor.
//!
//! This module contains the business logic for:
//! - Value extraction (`Extractor`)
//! - HTTP fetching (`HttpFetcher`)
//! - Running one check against the store (`Checker`)
//! - Per-rule timers (`Scheduler`)
//! - Push events (`EventPublisher`) and change notifications (`Notifier`)

pub mod checker;
pub mod events;
pub mod extractor;
pub mod fetcher;
pub mod notifier;
pub mod scheduler;

pub use checker::Checker;
pub use events::EventPublisher;
pub use extractor::{Extractor, extract};
pub use fetcher::{FetchRequest, FetchResponse, Fetcher, HttpFetcher};
pub use notifier::{LogNotifier, NoopNotifier, Notification, Notifier};
pub use scheduler::Scheduler;
