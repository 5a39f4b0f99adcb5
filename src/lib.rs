//! # Kasca Governor
//!
//! Training-run governance for a keystroke-from-audio model: stable
//! train/test assignment of recordings and the checkpoint lifecycle of a
//! fine-tuning run.
//!
//! ## Modules
//!
//! - [`split`]: Deterministic partition key, cohort assignment, split store
//! - [`manifest`]: Recording discovery, manifest build, dataset stats, feature caches
//! - [`checkpoint`]: `latest` / `best` pointers, retention, early stopping
//! - [`training`]: Event/directive protocol and evaluation metrics
//! - [`store`]: Atomic JSON and JSONL persistence
//! - [`config`]: TOML configuration loading and validation
//! - [`error`]: Structured error types

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod manifest;
pub mod split;
pub mod store;
pub mod training;
