//! Staged load generation and threshold gating for the anagram HTTP API.
//!
//! Provides typed TOML configuration, the upload/poll/group workflow,
//! a concurrency-safe metric sink, k6-style threshold evaluation, and the
//! engine that ties them together under a ramping VU scheduler.

pub mod check;
pub mod client;
pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod report;
pub mod scheduler;
pub mod summary;
pub mod threshold;
pub mod vu;
pub mod workflow;
