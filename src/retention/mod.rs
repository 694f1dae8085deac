//! Generalized grandfather-son (GFS) retention.
//!
//! This module provides the pure decision logic that partitions a set of
//! available instants into keep and prune sets, driven by a list of
//! independently configured retention rules.
//!
//! ## Architecture
//!
//! - `policy`: time-bucketed keep/prune selection (`select_relevant`,
//!   `grandfatherson`)
//!
//! The functions here are deterministic and free of I/O; the orchestration
//! layers in `snapshot` and `archive` apply their decisions to real pools.

pub mod policy;

// Re-export commonly used types
pub use policy::{RetentionDecision, RetentionRule, grandfatherson, select_relevant};
