//! anagram-loadtest: staged load generation and SLO gating for the
//! anagram-grouping HTTP API.
//!
//! The binary (`anagram-loadtest run`) is a thin CLI over [`loadtest`];
//! everything it does is available as a library for embedding in other
//! test harnesses.

pub mod loadtest;
