//! Client-side executable behavior: a data payload plus a source string.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::UndefinedArgs;

/// What a client-targeted handler returns.
///
/// An argument mapped to `None` is *undefined* and will be rejected before
/// dispatch. Use `Some(Value::Null)` (or [`arg_or_null`](Self::arg_or_null))
/// for a value that is intentionally absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientCode {
    pub args: BTreeMap<String, Option<Value>>,
    /// Opaque source code; bound names are the keys of `args`.
    pub content: String,
}

impl ClientCode {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            args: BTreeMap::new(),
            content: content.into(),
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), Some(value.into()));
        self
    }

    /// Bind a possibly-undefined value as-is.
    pub fn maybe_arg(mut self, key: impl Into<String>, value: Option<Value>) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    /// Bind a possibly-undefined value, mapping undefined to `null`.
    pub fn arg_or_null(mut self, key: impl Into<String>, value: Option<Value>) -> Self {
        self.args.insert(key.into(), Some(value.unwrap_or(Value::Null)));
        self
    }

    /// Keys bound to an undefined value, in key order.
    pub fn undefined_keys(&self) -> Vec<String> {
        self.args
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.clone())
            .collect()
    }
}

/// Validated `{args, content}` pair ready for the client runtime.
///
/// Cannot represent an undefined argument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientPayload {
    pub args: BTreeMap<String, Value>,
    pub content: String,
}

impl TryFrom<ClientCode> for ClientPayload {
    type Error = UndefinedArgs;

    fn try_from(code: ClientCode) -> Result<Self, Self::Error> {
        let keys = code.undefined_keys();
        if !keys.is_empty() {
            return Err(UndefinedArgs { keys });
        }

        let args = code
            .args
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect();

        Ok(Self {
            args,
            content: code.content,
        })
    }
}
