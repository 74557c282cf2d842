//! Condition expression evaluator.
//!
//! Conditions are boolean expression trees evaluated against the case
//! variable map. They appear as the free part of sentries and as repetition
//! rule guards.
//!
//! A condition that references an undefined variable fails evaluation
//! rather than defaulting to false: callers treat this as an evaluation
//! failure that aborts the whole unit of work.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A boolean expression over case variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Condition {
    /// Constant.
    Literal(bool),
    /// True when the named variable is present (never fails).
    Defined(String),
    /// True when the named variable equals the given JSON value.
    Equals { variable: String, value: Value },
    Not(Box<Condition>),
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

/// Errors during condition evaluation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    /// A comparison referenced a variable that is not set on the case.
    #[error("undefined variable: '{name}'")]
    UndefinedVariable { name: String },
}

/// Evaluate a condition against the case variable map.
pub fn eval_condition(
    condition: &Condition,
    variables: &Map<String, Value>,
) -> Result<bool, ConditionError> {
    match condition {
        Condition::Literal(value) => Ok(*value),
        Condition::Defined(name) => Ok(variables.contains_key(name)),
        Condition::Equals { variable, value } => {
            let actual =
                variables
                    .get(variable)
                    .ok_or_else(|| ConditionError::UndefinedVariable {
                        name: variable.clone(),
                    })?;
            Ok(actual == value)
        }
        Condition::Not(inner) => Ok(!eval_condition(inner, variables)?),
        Condition::All(parts) => {
            for part in parts {
                if !eval_condition(part, variables)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Condition::Any(parts) => {
            for part in parts {
                if eval_condition(part, variables)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}
