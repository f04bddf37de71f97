//! Domain models for Keel.
//!
//! # Core Concepts
//!
//! ## Versioned Entities
//!
//! These live in the project's tree in the repository store; every change is
//! a commit:
//!
//! - [`Project`]: Top-level container, created once and never deleted.
//! - [`WorkflowRecord`]: The project's current [`WorkflowState`].
//! - [`RaidItem`]: A risk, assumption, issue or dependency, one file per item.
//!
//! ## Records About Change
//!
//! - [`AuditEvent`]: Append-only log of completed mutating actions.
//! - [`Proposal`]: Pending file changes plus diff, applied or rejected once.

mod audit;
mod project;
mod proposal;
mod raid;
mod workflow;

pub use audit::*;
pub use project::*;
pub use proposal::*;
pub use raid::*;
pub use workflow::*;

pub(crate) use raid::parse_sequence;
