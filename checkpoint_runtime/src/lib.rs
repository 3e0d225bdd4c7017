#![forbid(unsafe_code)]

//! Checkpoint runtime.
//!
//! Wraps the pure checkpoint kernel with storage, the run orchestrator,
//! the run journal, configuration, replay and drift detection.
//!
//! No merge or validation logic lives here; all of it is delegated to
//! the kernel.

pub mod proto_types;
pub mod proto_bridge;
pub mod summary;
pub mod journal;
pub mod store;
pub mod snapshot_codec;
pub mod file_store;
pub mod orchestrator;
pub mod config;
pub mod replay;
pub mod drift;
