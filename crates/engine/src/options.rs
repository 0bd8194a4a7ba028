//! Declared option schema and validation of raw option values.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use actions::Options;

use crate::EngineError;

/// JSON kind an option value must have.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
    #[default]
    Any,
}

impl OptionKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        }
    }
}

/// One declared option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionField {
    pub key: String,
    #[serde(default)]
    pub kind: OptionKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl OptionField {
    pub fn new(key: impl Into<String>, kind: OptionKind) -> Self {
        Self {
            key: key.into(),
            kind,
            required: false,
            default: None,
        }
    }

    pub fn string(key: impl Into<String>) -> Self {
        Self::new(key, OptionKind::String)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// The options an action declares.
///
/// Keys not declared here pass through validation untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionSchema {
    pub fields: Vec<OptionField>,
}

impl OptionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: OptionField) -> Self {
        self.fields.push(field);
        self
    }

    /// Check the schema itself: unique keys, defaults of the declared kind.
    pub fn check(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.key.as_str()) {
                return Err(format!("option '{}' is declared twice", field.key));
            }
            if let Some(default) = &field.default {
                if !field.kind.accepts(default) {
                    return Err(format!(
                        "default of option '{}' is not a {}",
                        field.key,
                        field.kind.as_str()
                    ));
                }
            }
        }
        Ok(())
    }

    /// Fill defaults and validate raw option values.
    ///
    /// Null counts as absent. Every problem is reported at once.
    ///
    /// # Errors
    /// [`EngineError::InvalidOptions`] listing missing required options and
    /// kind mismatches.
    pub fn validate(
        &self,
        action_id: &str,
        mut raw: Map<String, Value>,
    ) -> Result<Options, EngineError> {
        let mut problems = Vec::new();

        for field in &self.fields {
            let present = raw.get(&field.key).is_some_and(|v| !v.is_null());
            if !present {
                match &field.default {
                    Some(default) => {
                        raw.insert(field.key.clone(), default.clone());
                    }
                    None if field.required => problems.push(format!("'{}' is required", field.key)),
                    None => {}
                }
                continue;
            }
            if let Some(value) = raw.get(&field.key) {
                if !field.kind.accepts(value) {
                    problems.push(format!("'{}' must be a {}", field.key, field.kind.as_str()));
                }
            }
        }

        if problems.is_empty() {
            Ok(Options::new(raw))
        } else {
            Err(EngineError::InvalidOptions {
                action_id: action_id.to_owned(),
                message: problems.join("; "),
            })
        }
    }
}
