//! Decision table model and first-hit evaluation.
//!
//! A decision resource carries one or more decision tables and optionally a
//! decision service grouping them. Evaluation is first-hit: rules are tried
//! in order and the first rule whose guard holds produces the outputs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::condition::{eval_condition, Condition, ConditionError};

/// A single decision table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionDefinition {
    pub key: String,
    pub name: String,
    /// Input names the caller is expected to provide. Rules may reference
    /// them through their guard conditions.
    pub required_inputs: Vec<String>,
    pub rules: Vec<DecisionRule>,
}

/// One row of a decision table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRule {
    /// Guard over the input map.
    pub when: Condition,
    /// Outputs produced when the guard holds.
    pub then: Map<String, Value>,
}

/// A decision service groups decision tables deployed together. Cached
/// alongside each member table so a composite lookup needs one cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionServiceDefinition {
    pub key: String,
    pub name: String,
    /// Keys of the member decision tables.
    pub decisions: Vec<String>,
}

/// The parsed content of one decision resource.
#[derive(Debug, Clone)]
pub struct ParsedDecisions {
    pub decisions: Vec<DecisionDefinition>,
    pub service: Option<DecisionServiceDefinition>,
}

impl DecisionDefinition {
    /// Evaluate the table against an input map, first-hit policy.
    ///
    /// Returns `Ok(None)` when no rule matches. A guard referencing an
    /// input the caller did not provide is an evaluation error, not a miss.
    pub fn evaluate(
        &self,
        inputs: &Map<String, Value>,
    ) -> Result<Option<Map<String, Value>>, ConditionError> {
        for rule in &self.rules {
            if eval_condition(&rule.when, inputs)? {
                return Ok(Some(rule.then.clone()));
            }
        }
        Ok(None)
    }
}
