//! resolved variables for one run
//!
//! A [VariableStore] is filled once (process environment first, then the definition files) and only read
//! afterwards. Names are kept sorted so every iteration, and thereby every rendered fan-out block, is
//! deterministic.
use std::collections::BTreeMap;

/// Markers that make a variable name sensitive for diagnostic output
const SENSITIVE_MARKERS: [&str; 3] = ["SECRET", "PASS", "KEY"];

const MASK: &str = "****";

#[derive(Default, Debug, Clone, PartialEq)]
pub struct VariableStore {
    variables: BTreeMap<String, String>,
}

impl VariableStore {
    /// Seed a store with the current process environment
    ///
    /// Variables whose name or value is not valid unicode are skipped.
    pub fn from_env() -> Self {
        std::env::vars_os()
            .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)))
            .collect()
    }

    /// Assign a variable, replacing any earlier value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        tracing::trace!(%name, "variable set");
        self.variables.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// All variables, sorted by name
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.variables
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Variables whose name starts with `prefix`, sorted by name
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.iter().filter(move |(name, _)| name.starts_with(prefix))
    }

    /// Diagnostic lines (`NAME=VALUE`) for every variable in scope
    ///
    /// Values of sensitive variables (see [is_sensitive]) are masked with [mask].
    pub fn listing(&self, scope: Option<&str>) -> Vec<String> {
        self.with_prefix(scope.unwrap_or_default())
            .map(|(name, value)| {
                if is_sensitive(name) {
                    format!("{name}={}", mask(value))
                } else {
                    format!("{name}={value}")
                }
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VariableStore {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut store = VariableStore::default();
        for (name, value) in iter {
            store.set(name, value);
        }
        store
    }
}

pub fn is_sensitive(name: &str) -> bool {
    SENSITIVE_MARKERS.iter().any(|marker| name.contains(marker))
}

/// Hide a value, revealing at most the last 3 characters
///
/// Only a quarter of the value is ever shown so short secrets stay (mostly) hidden.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let reveal = (chars.len() / 4).min(3);
    let tail: String = chars[chars.len() - reveal..].iter().collect();
    format!("{MASK}{tail}")
}
