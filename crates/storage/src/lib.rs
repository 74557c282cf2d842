//! Storage port for Docket execution backends.
//!
//! [`CaseStorage`] is the narrow interface the engine consumes: CRUD and
//! query access to runtime case state, deployments, resources, and
//! definition records, plus the pessimistic case-lock contract used to
//! coordinate concurrent workers.
//!
//! Runtime mutations within one unit of work are committed as a single
//! atomic [`ChangeSet`]: the engine builds up inserts and updates in memory
//! while draining its agenda and applies them in one call, so a failed
//! cascade leaves the stored state untouched.
//!
//! [`InMemoryStorage`] is a complete reference backend used throughout the
//! engine's tests. A durable backend maps the same contract onto real
//! transactions.

mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::InMemoryStorage;
pub use record::{
    CaseInstanceRecord, CaseState, ChangeSet, DefinitionKind, DefinitionRecord, DeploymentRecord,
    PlanItemInstanceRecord, PlanItemState, ResourceRecord,
};
pub use traits::CaseStorage;
