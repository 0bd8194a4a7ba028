//! The flow's variable bag, as seen by handlers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::ActionError;

/// Host-owned key → value store scoped to one flow execution.
///
/// `get` returning `None` means the variable is undefined. Hosts must not
/// share one store across unrelated flow executions.
#[async_trait]
pub trait VariableStore: Send + Sync {
    async fn get(&self, variable_id: &str) -> Option<Value>;

    async fn set(&self, variable_id: &str, value: Value);
}

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<String, Value>,
    writes: Vec<(String, Value)>,
}

/// In-memory variable store that also records every write in order.
///
/// Suitable for single-execution use or testing.
#[derive(Debug, Default)]
pub struct InMemoryVariables {
    inner: Mutex<Inner>,
}

impl InMemoryVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the store.
    pub fn with_values<K: Into<String>>(values: impl IntoIterator<Item = (K, Value)>) -> Self {
        let values = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            inner: Mutex::new(Inner { values, writes: Vec::new() }),
        }
    }

    /// Current value of a variable without going through the async trait.
    pub fn value(&self, variable_id: &str) -> Option<Value> {
        self.lock().values.get(variable_id).cloned()
    }

    /// Every `set` call seen so far, in call order.
    pub fn writes(&self) -> Vec<(String, Value)> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl VariableStore for InMemoryVariables {
    async fn get(&self, variable_id: &str) -> Option<Value> {
        self.value(variable_id)
    }

    async fn set(&self, variable_id: &str, value: Value) {
        let mut inner = self.lock();
        inner.writes.push((variable_id.to_owned(), value.clone()));
        inner.values.insert(variable_id.to_owned(), value);
    }
}

/// Typed handle over a [`VariableStore`], handed to server-side handlers.
#[derive(Clone)]
pub struct Variables {
    store: Arc<dyn VariableStore>,
}

impl Variables {
    pub fn new(store: Arc<dyn VariableStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, variable_id: &str) -> Option<Value> {
        self.store.get(variable_id).await
    }

    /// Read a variable for binding into client code.
    ///
    /// Undefined never crosses the client boundary: it becomes `null`.
    pub async fn get_or_null(&self, variable_id: &str) -> Value {
        self.store.get(variable_id).await.unwrap_or(Value::Null)
    }

    /// Read and deserialize a variable; undefined and null both yield `None`.
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        variable_id: &str,
    ) -> Result<Option<T>, ActionError> {
        match self.store.get(variable_id).await {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                ActionError::Other(anyhow::anyhow!(
                    "variable '{variable_id}' has unexpected shape: {e}"
                ))
            }),
        }
    }

    pub async fn set(&self, variable_id: &str, value: Value) {
        self.store.set(variable_id, value).await;
    }

    pub async fn set_as<T: Serialize>(
        &self,
        variable_id: &str,
        value: &T,
    ) -> Result<(), ActionError> {
        let value = serde_json::to_value(value).map_err(anyhow::Error::from)?;
        self.store.set(variable_id, value).await;
        Ok(())
    }
}
