//! Concurrent transactional load generator.
//!
//! Drives a pool of workers against a transactional key-value store and
//! records every operation as a Jepsen-style history: one invoke and one
//! completion per operation, tagged with a logical process id. Completions
//! are classified as `ok`, `fail`, `info` (indeterminate) or `error`; a
//! process that ends in `info` is retired and its worker continues under a
//! fresh id.

pub mod clock;
pub mod config;
pub mod history;
pub mod outcome;
pub mod process;
pub mod runner;
pub mod store;
pub mod workload;
