//! Environment variables passed into task containers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Environment variables set inside a task's container.
///
/// Variables are kept sorted so container invocations are reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add an environment variable.
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Add an environment variable.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Get an environment variable.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Create a new environment by layering `other` over this one.
    /// Variables from `other` win.
    pub fn merged_with(&self, other: &Environment) -> Self {
        let mut result = self.clone();
        for (k, v) in &other.vars {
            result.vars.insert(k.clone(), v.clone());
        }
        result
    }

    /// Iterate over the variables in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_builder() {
        let env = Environment::new()
            .with_var("TMPDIR", "/scratch")
            .with_var("LC_ALL", "C");

        assert_eq!(env.len(), 2);
        assert_eq!(env.get("TMPDIR"), Some("/scratch"));
        assert!(Environment::new().is_empty());
    }

    #[test]
    fn test_environment_merged_with() {
        let base = Environment::new().with_var("A", "1").with_var("B", "2");
        let task = Environment::new().with_var("B", "task");

        let merged = base.merged_with(&task);

        assert_eq!(base.get("B"), Some("2"));
        assert_eq!(merged.get("A"), Some("1"));
        assert_eq!(merged.get("B"), Some("task"));
    }

    #[test]
    fn test_iteration_is_sorted() {
        let env: Environment = vec![("Z", "1"), ("A", "2")].into_iter().collect();

        let keys: Vec<&String> = env.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["A", "Z"]);
    }

    #[test]
    fn test_environment_yaml_is_a_plain_map() {
        let env: Environment = serde_yaml::from_str("LC_ALL: C\nTMPDIR: /tmp\n").unwrap();
        assert_eq!(env.get("LC_ALL"), Some("C"));
    }
}
