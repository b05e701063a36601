// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! claw-brain
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Append-only decision log.
pub mod events;
/// Durable job queue with audit trails.
pub mod jobs;
/// On-chain memory writer seam.
pub mod memory;
/// Policy loading, deep-merging, and persistence.
pub mod policy;
/// Goal generation and sweep execution.
pub mod router;

pub use events::{Event, EventLog};
pub use jobs::{AuditEntry, BrainJob, JobInput, JobStatus, JobStore, JobStrategy, MemoryStatus};
pub use memory::{FileMemoryWriter, MemoryEntry, MemoryError, MemoryWriter};
pub use policy::{
    BrainPolicy, DecisionsPolicy, GoalTemplate, GoalsPolicy, GrowthPolicy, PolicyStore,
    TimersPolicy, deep_merge,
};
pub use router::{SweepOptions, SweepReport, TaskRouter};
