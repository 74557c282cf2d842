//! Docket definition models -- parsed case, decision, and form definitions,
//! plus the condition mini-language evaluated over case variables.
//!
//! Definitions are authored as JSON resources inside a deployment. This crate
//! owns the typed in-memory representation and the deserialization from raw
//! resource bytes; it knows nothing about storage or runtime state.
//!
//! The main entry points are [`case_from_json`], [`decisions_from_json`], and
//! [`form_from_json`], plus the byte-level wrappers in [`deserialize`].

pub mod condition;
pub mod decision;
pub mod deserialize;
pub mod form;
pub mod types;

pub use condition::{eval_condition, Condition, ConditionError};
pub use decision::{DecisionDefinition, DecisionRule, DecisionServiceDefinition, ParsedDecisions};
pub use deserialize::{
    case_from_json, case_from_resource, decisions_from_json, decisions_from_resource,
    form_from_json, form_from_resource, ModelError,
};
pub use form::{FieldType, FormDefinition, FormField};
pub use types::{
    CaseDefinition, Combinator, OnPart, PlanItemEvent, PlanItemModel, PlanItemType,
    RepetitionRule, Sentry,
};
