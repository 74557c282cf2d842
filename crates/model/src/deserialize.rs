//! Deserialization from raw definition resources into typed models.
//!
//! Resources are JSON documents. Parsing is hand-walked over
//! `serde_json::Value` so that error messages can name the offending field
//! and unknown fields are ignored for forward compatibility.

use serde_json::Value;

use crate::condition::Condition;
use crate::decision::{
    DecisionDefinition, DecisionRule, DecisionServiceDefinition, ParsedDecisions,
};
use crate::form::{FieldType, FormDefinition, FormField};
use crate::types::{
    CaseDefinition, Combinator, OnPart, PlanItemEvent, PlanItemModel, PlanItemType,
    RepetitionRule, Sentry,
};

/// Errors while deserializing a definition resource.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// A required field is absent.
    #[error("resource missing required field: '{field}'")]
    MissingField { field: String },
    /// A field is present but malformed.
    #[error("invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },
    /// The resource is not valid JSON or has the wrong top-level shape.
    #[error("invalid resource: {0}")]
    InvalidResource(String),
}

// ──────────────────────────────────────────────
// Entry points
// ──────────────────────────────────────────────

/// Parse raw resource bytes into a case definition.
pub fn case_from_resource(bytes: &[u8]) -> Result<CaseDefinition, ModelError> {
    case_from_json(&json_root(bytes)?)
}

/// Parse raw resource bytes into decision tables plus optional service.
pub fn decisions_from_resource(bytes: &[u8]) -> Result<ParsedDecisions, ModelError> {
    decisions_from_json(&json_root(bytes)?)
}

/// Parse raw resource bytes into a form definition.
pub fn form_from_resource(bytes: &[u8]) -> Result<FormDefinition, ModelError> {
    form_from_json(&json_root(bytes)?)
}

fn json_root(bytes: &[u8]) -> Result<Value, ModelError> {
    serde_json::from_slice(bytes).map_err(|e| ModelError::InvalidResource(e.to_string()))
}

/// Parse a case definition from its JSON document.
pub fn case_from_json(doc: &Value) -> Result<CaseDefinition, ModelError> {
    let key = required_str(doc, "key")?;
    let name = optional_str(doc, "name").unwrap_or_else(|| key.clone());
    let items_arr = doc
        .get("planItems")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ModelError::MissingField {
            field: "planItems".to_string(),
        })?;

    let mut plan_items = Vec::with_capacity(items_arr.len());
    for obj in items_arr {
        plan_items.push(parse_plan_item(obj)?);
    }

    Ok(CaseDefinition {
        key,
        name,
        plan_items,
    })
}

/// Parse a decision resource: one or more tables plus an optional service.
pub fn decisions_from_json(doc: &Value) -> Result<ParsedDecisions, ModelError> {
    let tables = doc
        .get("decisions")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ModelError::MissingField {
            field: "decisions".to_string(),
        })?;

    let mut decisions = Vec::with_capacity(tables.len());
    for obj in tables {
        decisions.push(parse_decision(obj)?);
    }

    let service = match doc.get("service") {
        Some(obj) => Some(DecisionServiceDefinition {
            key: required_str(obj, "key")?,
            name: optional_str(obj, "name").unwrap_or_default(),
            decisions: str_array(obj, "decisions")?,
        }),
        None => None,
    };

    Ok(ParsedDecisions { decisions, service })
}

/// Parse a form definition from its JSON document.
pub fn form_from_json(doc: &Value) -> Result<FormDefinition, ModelError> {
    let key = required_str(doc, "key")?;
    let name = optional_str(doc, "name").unwrap_or_else(|| key.clone());
    let fields_arr = doc
        .get("fields")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ModelError::MissingField {
            field: "fields".to_string(),
        })?;

    let mut fields = Vec::with_capacity(fields_arr.len());
    for obj in fields_arr {
        let field_type = match required_str(obj, "type")?.as_str() {
            "text" => FieldType::Text,
            "number" => FieldType::Number,
            "boolean" => FieldType::Boolean,
            "date" => FieldType::Date,
            other => {
                return Err(ModelError::InvalidField {
                    field: "type".to_string(),
                    message: format!("unknown field type '{}'", other),
                })
            }
        };
        fields.push(FormField {
            id: required_str(obj, "id")?,
            label: optional_str(obj, "label").unwrap_or_default(),
            field_type,
            required: obj
                .get("required")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        });
    }

    Ok(FormDefinition { key, name, fields })
}

// ──────────────────────────────────────────────
// Plan items and sentries
// ──────────────────────────────────────────────

fn parse_plan_item(obj: &Value) -> Result<PlanItemModel, ModelError> {
    let id = required_str(obj, "id")?;
    let name = optional_str(obj, "name").unwrap_or_else(|| id.clone());

    let item_type = match required_str(obj, "type")?.as_str() {
        "task" => PlanItemType::Task,
        "milestone" => PlanItemType::Milestone,
        "eventListener" => PlanItemType::EventListener,
        "stage" => {
            let children_arr = obj
                .get("children")
                .and_then(|v| v.as_array())
                .ok_or_else(|| ModelError::MissingField {
                    field: "children".to_string(),
                })?;
            let mut children = Vec::with_capacity(children_arr.len());
            for child in children_arr {
                children.push(parse_plan_item(child)?);
            }
            PlanItemType::Stage(children)
        }
        other => {
            return Err(ModelError::InvalidField {
                field: "type".to_string(),
                message: format!("unknown plan item type '{}'", other),
            })
        }
    };

    let repetition = match obj.get("repetition") {
        Some(rep) => {
            let cond = rep.get("condition").ok_or_else(|| ModelError::MissingField {
                field: "repetition.condition".to_string(),
            })?;
            Some(RepetitionRule {
                condition: parse_condition(cond)?,
            })
        }
        None => None,
    };

    Ok(PlanItemModel {
        id,
        name,
        item_type,
        entry_criteria: parse_sentries(obj, "entryCriteria")?,
        exit_criteria: parse_sentries(obj, "exitCriteria")?,
        manual_activation: obj
            .get("manualActivation")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        repetition,
    })
}

fn parse_sentries(obj: &Value, field: &str) -> Result<Vec<Sentry>, ModelError> {
    let arr = match obj.get(field).and_then(|v| v.as_array()) {
        Some(arr) => arr,
        None => return Ok(vec![]),
    };
    let mut sentries = Vec::with_capacity(arr.len());
    for sentry_obj in arr {
        sentries.push(parse_sentry(sentry_obj)?);
    }
    Ok(sentries)
}

fn parse_sentry(obj: &Value) -> Result<Sentry, ModelError> {
    let combinator = match obj.get("combinator").and_then(|v| v.as_str()) {
        None | Some("all") => Combinator::All,
        Some("any") => Combinator::Any,
        Some(other) => {
            return Err(ModelError::InvalidField {
                field: "combinator".to_string(),
                message: format!("expected 'all' or 'any', got '{}'", other),
            })
        }
    };

    let mut on_parts = Vec::new();
    if let Some(arr) = obj.get("onParts").and_then(|v| v.as_array()) {
        for part in arr {
            let event = match required_str(part, "event")?.as_str() {
                "complete" => PlanItemEvent::Complete,
                "occur" => PlanItemEvent::Occur,
                "exit" => PlanItemEvent::Exit,
                "terminate" => PlanItemEvent::Terminate,
                other => {
                    return Err(ModelError::InvalidField {
                        field: "event".to_string(),
                        message: format!("unknown lifecycle event '{}'", other),
                    })
                }
            };
            on_parts.push(OnPart {
                source_ref: required_str(part, "source")?,
                event,
            });
        }
    }

    let condition = match obj.get("condition") {
        Some(cond) => Some(parse_condition(cond)?),
        None => None,
    };

    if on_parts.is_empty() && condition.is_none() {
        return Err(ModelError::InvalidField {
            field: "onParts".to_string(),
            message: "sentry needs at least one on-part or a condition".to_string(),
        });
    }

    Ok(Sentry {
        combinator,
        on_parts,
        condition,
    })
}

// ──────────────────────────────────────────────
// Conditions and decisions
// ──────────────────────────────────────────────

fn parse_condition(obj: &Value) -> Result<Condition, ModelError> {
    if let Some(v) = obj.get("literal").and_then(|v| v.as_bool()) {
        return Ok(Condition::Literal(v));
    }
    if let Some(name) = obj.get("defined").and_then(|v| v.as_str()) {
        return Ok(Condition::Defined(name.to_string()));
    }
    if let Some(eq) = obj.get("equals") {
        let variable = required_str(eq, "variable")?;
        let value = eq.get("value").cloned().ok_or_else(|| ModelError::MissingField {
            field: "equals.value".to_string(),
        })?;
        return Ok(Condition::Equals { variable, value });
    }
    if let Some(inner) = obj.get("not") {
        return Ok(Condition::Not(Box::new(parse_condition(inner)?)));
    }
    if let Some(arr) = obj.get("all").and_then(|v| v.as_array()) {
        let parts = arr.iter().map(parse_condition).collect::<Result<_, _>>()?;
        return Ok(Condition::All(parts));
    }
    if let Some(arr) = obj.get("any").and_then(|v| v.as_array()) {
        let parts = arr.iter().map(parse_condition).collect::<Result<_, _>>()?;
        return Ok(Condition::Any(parts));
    }
    Err(ModelError::InvalidField {
        field: "condition".to_string(),
        message: "expected one of literal/defined/equals/not/all/any".to_string(),
    })
}

fn parse_decision(obj: &Value) -> Result<DecisionDefinition, ModelError> {
    let rules_arr = obj
        .get("rules")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ModelError::MissingField {
            field: "rules".to_string(),
        })?;
    let mut rules = Vec::with_capacity(rules_arr.len());
    for rule in rules_arr {
        let when = rule.get("when").ok_or_else(|| ModelError::MissingField {
            field: "when".to_string(),
        })?;
        let then = rule
            .get("then")
            .and_then(|v| v.as_object())
            .cloned()
            .ok_or_else(|| ModelError::MissingField {
                field: "then".to_string(),
            })?;
        rules.push(DecisionRule {
            when: parse_condition(when)?,
            then,
        });
    }

    Ok(DecisionDefinition {
        key: required_str(obj, "key")?,
        name: optional_str(obj, "name").unwrap_or_default(),
        required_inputs: str_array_or_empty(obj, "requiredInputs"),
        rules,
    })
}

// ──────────────────────────────────────────────
// Field helpers
// ──────────────────────────────────────────────

fn required_str(obj: &Value, field: &str) -> Result<String, ModelError> {
    obj.get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ModelError::MissingField {
            field: field.to_string(),
        })
}

fn optional_str(obj: &Value, field: &str) -> Option<String> {
    obj.get(field).and_then(|v| v.as_str()).map(str::to_string)
}

fn str_array(obj: &Value, field: &str) -> Result<Vec<String>, ModelError> {
    let arr = obj
        .get(field)
        .and_then(|v| v.as_array())
        .ok_or_else(|| ModelError::MissingField {
            field: field.to_string(),
        })?;
    Ok(arr
        .iter()
        .filter_map(|v| v.as_str())
        .map(str::to_string)
        .collect())
}

fn str_array_or_empty(obj: &Value, field: &str) -> Vec<String> {
    obj.get(field)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
