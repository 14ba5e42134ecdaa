//! Review Loop - an orchestration engine for autonomous PR review-and-fix cycles.
//!
//! The core loop per PR: wait for CI checks and bot reviews to resolve, run a
//! review engine that applies fixes, and repeat up to a bounded iteration
//! budget, persisting state after every step so a crashed process can resume.

pub mod config;
pub mod github;
pub mod orchestrator;
pub mod persistence;
pub mod reviewer;
pub mod server;
pub mod types;
pub mod waiter;

#[cfg(test)]
pub mod test_utils;
