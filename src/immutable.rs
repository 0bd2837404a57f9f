//! JSON-backed configuration values that can be frozen.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImmutableError {
    #[error("Cannot modify '{0}': configuration is immutable")]
    Immutable(String),

    #[error("Configuration must be a JSON object")]
    NotAnObject,

    #[error("Invalid JSON for '{key}': {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A JSON object that accepts changes until `set_immutable` is called.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImmutableConfig {
    values: Map<String, Value>,
    immutable: bool,
}

impl ImmutableConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, ImmutableError> {
        let value: Value = serde_json::from_str(json).map_err(|source| ImmutableError::Json {
            key: String::new(),
            source,
        })?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ImmutableError> {
        match value {
            Value::Object(values) => Ok(Self {
                values,
                immutable: false,
            }),
            _ => Err(ImmutableError::NotAnObject),
        }
    }

    pub fn set_immutable(&mut self) {
        self.immutable = true;
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    fn check_mutable(&self, key: &str) -> Result<(), ImmutableError> {
        if self.immutable {
            return Err(ImmutableError::Immutable(key.to_string()));
        }
        Ok(())
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<(), ImmutableError> {
        self.check_mutable(key)?;
        self.values.insert(key.to_string(), value.into());
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<Option<Value>, ImmutableError> {
        self.check_mutable(key)?;
        Ok(self.values.remove(key))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Deserialize the value under `key`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ImmutableError> {
        self.get(key)
            .map(|v| {
                serde_json::from_value(v.clone()).map_err(|source| ImmutableError::Json {
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn to_json(&self) -> String {
        Value::Object(self.values.clone()).to_string()
    }
}
