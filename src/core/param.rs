//! Run parameters.
//!
//! A graph declares the parameters it expects (name and type). A caller
//! supplies a [`ParameterSet`] which is checked against those declarations
//! and frozen into [`BoundParameters`] at the start of a run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while binding parameters to a graph.
#[derive(Debug, Error, PartialEq)]
pub enum ParamError {
    /// A declared parameter was not supplied.
    #[error("missing parameter: {0}")]
    Missing(String),

    /// A supplied parameter is not declared by the graph.
    #[error("unknown parameter: {0}")]
    Unknown(String),

    /// A supplied value has the wrong type.
    #[error("parameter '{name}' expects a {expected} value, got {actual}")]
    TypeMismatch {
        name: String,
        expected: ParamType,
        actual: ParamType,
    },

    /// A textual value could not be parsed as a number.
    #[error("parameter '{name}' is not a number: {value}")]
    InvalidNumber { name: String, value: String },

    /// A `name=value` assignment could not be split.
    #[error("malformed parameter assignment '{0}', expected name=value")]
    MalformedAssignment(String),
}

/// Type of a scalar parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::String => write!(f, "string"),
            ParamType::Number => write!(f, "number"),
        }
    }
}

/// A scalar parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    String(String),
}

impl ParamValue {
    /// The type of this value.
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::Number(_) => ParamType::Number,
            ParamValue::String(_) => ParamType::String,
        }
    }

    /// Borrow the string value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            ParamValue::Number(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::String(s) => write!(f, "{}", s),
            // Integral values render without a trailing ".0" so they can be
            // spliced into command lines as thread counts and the like.
            ParamValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            ParamValue::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}

impl From<f64> for ParamValue {
    fn from(n: f64) -> Self {
        ParamValue::Number(n)
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        ParamValue::Number(n as f64)
    }
}

/// Caller-supplied parameter values, not yet checked against a graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    values: BTreeMap<String, ParamValue>,
}

impl ParameterSet {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Insert a value, replacing any previous one.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(name.into(), value.into());
    }

    /// Get a value by name.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Build a set from textual `name=value` assignments.
    ///
    /// Values are coerced to the type the graph declares for them; names the
    /// graph does not declare are kept as strings and rejected later by
    /// [`bind`](Self::bind).
    pub fn from_assignments<I, S>(
        declared: &BTreeMap<String, ParamType>,
        assignments: I,
    ) -> Result<Self, ParamError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for assignment in assignments {
            let assignment = assignment.as_ref();
            let (name, raw) = assignment
                .split_once('=')
                .filter(|(name, _)| !name.is_empty())
                .ok_or_else(|| ParamError::MalformedAssignment(assignment.to_string()))?;

            let value = match declared.get(name) {
                Some(ParamType::Number) => {
                    let n: f64 = raw.parse().map_err(|_| ParamError::InvalidNumber {
                        name: name.to_string(),
                        value: raw.to_string(),
                    })?;
                    ParamValue::Number(n)
                }
                _ => ParamValue::String(raw.to_string()),
            };
            set.insert(name, value);
        }
        Ok(set)
    }

    /// Check the set against declared parameters and freeze it.
    pub fn bind(
        &self,
        declared: &BTreeMap<String, ParamType>,
    ) -> Result<BoundParameters, ParamError> {
        if let Some(name) = self.values.keys().find(|name| !declared.contains_key(*name)) {
            return Err(ParamError::Unknown(name.clone()));
        }

        for (name, expected) in declared {
            let value = self
                .values
                .get(name)
                .ok_or_else(|| ParamError::Missing(name.clone()))?;
            if value.param_type() != *expected {
                return Err(ParamError::TypeMismatch {
                    name: name.clone(),
                    expected: *expected,
                    actual: value.param_type(),
                });
            }
        }

        Ok(BoundParameters {
            values: Arc::new(self.values.clone()),
        })
    }
}

/// Parameters validated against a graph. Immutable and cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct BoundParameters {
    values: Arc<BTreeMap<String, ParamValue>>,
}

impl BoundParameters {
    /// Get a bound value by name.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// Iterate over all bound values.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }
}
