//! Causeway - causal path reconstruction and expectation checking
//!
//! This library reconciles per-thread trace logs into end-to-end execution
//! paths that follow messages across threads, processes and hosts, then
//! checks each path against declarative expectations of its structure,
//! timing and resource use.

pub mod aggregate;
pub mod batch;
pub mod cli;
pub mod config;
pub mod event;
pub mod expectation_dsl;
pub mod expectation_types;
pub mod limit;
pub mod path;
pub mod recognizer;
pub mod reconcile;
pub mod report;
pub mod shape;
pub mod stats;
pub mod synthesis;
pub mod trace_log;
