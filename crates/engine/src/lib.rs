//! The Docket case execution engine.
//!
//! One external trigger runs one unit of work: the case is loaded into an
//! in-memory working set, a command-scoped FIFO agenda is seeded with a
//! single root operation and drained to a fixpoint, and the resulting
//! mutations commit atomically through the storage port. Sentry evaluation,
//! the plan item state machine, and scope completion all run inside that
//! drain; nothing partial ever reaches storage.
//!
//! Definitions come from immutable deployments resolved through the
//! [`deploy::DeploymentManager`] cache, and multi-worker setups coordinate
//! through the lease-based [`lock::LockManager`].

pub mod agenda;
pub mod deploy;
pub mod engine;
pub mod error;
pub mod lock;
pub mod state;

mod criteria;
mod instance;
mod operations;

pub use agenda::{LifecycleEvent, Operation};
pub use deploy::{CachedDefinition, DeploymentBuilder, DeploymentManager};
pub use engine::{CaseEngine, TriggerOutcome};
pub use error::EngineError;
pub use lock::LockManager;
