//! Form definition model.
//!
//! Forms are flat field lists with types and required flags. The engine
//! resolves them through the shared deployment cache; validation of a
//! submission is provided here for callers that render and collect them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormDefinition {
    pub key: String,
    pub name: String,
    pub fields: Vec<FormField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    pub id: String,
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Number,
    Boolean,
    Date,
}

impl FormDefinition {
    /// Names of required fields missing from a submission, in field order.
    pub fn missing_required(&self, values: &Map<String, Value>) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.required && !values.contains_key(&f.id))
            .map(|f| f.id.as_str())
            .collect()
    }
}
