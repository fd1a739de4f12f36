//! Worker Runtime (C7): a process dedicated to one job type, spawned and
//! supervised by the Dispatch Coordinator's `Supervisor` (§4.4). It never
//! touches the primary database directly — job and worker state only move
//! through the coordinator's HTTP API, and wake-up notifications only move
//! through the queue transport's pub/sub (§9).
//!
//! Exposed as a library so the `jobforge-cli` `worker` subcommand can drive
//! a runtime in-process instead of shelling out to this crate's own binary.

pub mod runtime;

pub use runtime::{WorkerConfig, WorkerRuntime};
