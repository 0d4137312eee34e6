// src/lib.rs

//! pagewatch: website change monitor library

pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use engine::MonitorEngine;
