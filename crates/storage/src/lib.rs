//! Versioned backing stores for refs
//!
//! A ref's value history lives in a [`StateContainer`]: an ordered chain of
//! `(transaction id → encoded value)` entries with bounded retention. The
//! trait has two implementations:
//!
//! - [`CoordinatorContainer`] keeps the chain in the coordinator, one
//!   sequential child per version. This is the distributed default.
//! - [`LocalContainer`] keeps the chain in a process-wide registry. It is
//!   shared across refs on the same host only: useful for benchmarking and
//!   same-process tests, not for distribution.
//!
//! Containers know nothing about transaction *states*; classifying a version
//! tag as committed or orphaned is the concurrency layer's job.

pub mod container;
pub mod coordinator_container;
pub mod local;

pub use container::StateContainer;
pub use coordinator_container::{CoordinatorContainer, VersionRecord};
pub use local::LocalContainer;
