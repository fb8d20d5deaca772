#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Interpretation coordinator (spec §4.8): the single transactional
//! entrypoint composing event ingestion, period validation, reference
//! snapshotting, policy selection, meaning extraction, journal writing and
//! outcome recording into one call; plus the read-model selectors (§10.5)
//! built on top of the journal writer's posted state.

pub mod coordinator;
pub mod selectors;

pub use coordinator::Coordinator;
pub use coordinator::CoordinatorError;
pub use coordinator::CoordinatorResponse;
pub use coordinator::CoordinatorResult;
pub use selectors::Selectors;
