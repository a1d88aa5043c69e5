//! Opaque key/value parameters handed to applications.
//!
//! The framework never interprets these keys; it only carries them from a
//! controller or a TOML file to `Application::define`.

use crate::app::AppError;
use crate::error::{Result, StepGraphError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ParameterValue>),
}

impl ParameterValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParameterValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Integers widen to floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParameterValue::Float(v) => Some(*v),
            ParameterValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParameterValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ParameterValue]> {
        match self {
            ParameterValue::List(v) => Some(v),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            ParameterValue::Bool(_) => "bool",
            ParameterValue::Int(_) => "int",
            ParameterValue::Float(_) => "float",
            ParameterValue::String(_) => "string",
            ParameterValue::List(_) => "list",
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        ParameterValue::Bool(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        ParameterValue::Int(v)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        ParameterValue::Float(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        ParameterValue::String(v.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        ParameterValue::String(v)
    }
}

/// Ordered string key -> typed value mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    values: BTreeMap<String, ParameterValue>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a flat or nested TOML table. Nested tables are flattened with
    /// dotted keys (`[fft] size = 4` becomes `fft.size`).
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(content)
            .map_err(|e| StepGraphError::Config(format!("Failed to parse parameters: {}", e)))?;
        let mut set = Self::new();
        flatten_table("", &table, &mut set)?;
        Ok(set)
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParameterValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ParameterValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(ParameterValue::as_bool)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(ParameterValue::as_int)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(ParameterValue::as_float)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ParameterValue::as_str)
    }

    pub fn require_int(&self, key: &str) -> std::result::Result<i64, AppError> {
        self.require(key, "int", ParameterValue::as_int)
    }

    pub fn require_float(&self, key: &str) -> std::result::Result<f64, AppError> {
        self.require(key, "float", ParameterValue::as_float)
    }

    pub fn require_str(&self, key: &str) -> std::result::Result<&str, AppError> {
        self.require(key, "string", ParameterValue::as_str)
    }

    fn require<'a, T>(
        &'a self,
        key: &str,
        expected: &'static str,
        extract: impl FnOnce(&'a ParameterValue) -> Option<T>,
    ) -> std::result::Result<T, AppError> {
        let value = self
            .get(key)
            .ok_or_else(|| AppError::MissingParameter(key.to_string()))?;
        extract(value).ok_or_else(|| AppError::ParameterType {
            key: key.to_string(),
            expected,
            found: value.type_name(),
        })
    }
}

fn flatten_table(prefix: &str, table: &toml::Table, out: &mut ParameterSet) -> Result<()> {
    for (key, value) in table {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            toml::Value::Table(nested) => flatten_table(&full_key, nested, out)?,
            other => {
                let converted = convert_value(&full_key, other)?;
                out.insert(full_key, converted);
            }
        }
    }
    Ok(())
}

fn convert_value(key: &str, value: &toml::Value) -> Result<ParameterValue> {
    Ok(match value {
        toml::Value::Boolean(b) => ParameterValue::Bool(*b),
        toml::Value::Integer(i) => ParameterValue::Int(*i),
        toml::Value::Float(f) => ParameterValue::Float(*f),
        toml::Value::String(s) => ParameterValue::String(s.clone()),
        toml::Value::Datetime(d) => ParameterValue::String(d.to_string()),
        toml::Value::Array(items) => ParameterValue::List(
            items
                .iter()
                .map(|item| convert_value(key, item))
                .collect::<Result<Vec<_>>>()?,
        ),
        toml::Value::Table(_) => {
            return Err(StepGraphError::Config(format!(
                "Parameter {} holds a table inside a list",
                key
            )))
        }
    })
}
