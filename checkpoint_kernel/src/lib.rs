#![forbid(unsafe_code)]

//! Checkpoint kernel — validation and merge for incremental event-log
//! checkpoints.
//!
//! Pure and deterministic: no I/O, no clocks, no global state. Given the
//! same prior snapshot and the same multiset of raw records, the kernel
//! always produces the same snapshot content.

/// Snapshot encoding version. Bumped on any change to canonical form.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

pub mod events;
pub mod domain;
pub mod schema;
pub mod validator;
pub mod invariants;
pub mod hashing;
pub mod merge;
pub mod query;
