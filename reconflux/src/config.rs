//! Per-module declarative configuration: a module declares its option
//! defaults and descriptions; the controller's user-supplied overrides are
//! merged against them at construction time.
//!
//! This is deliberately narrow — reading a scan's configuration file from
//! disk, templating environment variables into it, and watching it for
//! changes are global scan-bootstrap concerns and out of scope here.

use std::collections::HashMap;
use std::time::Duration;

use indexmap::IndexMap;
use serde_yaml::Value;

use crate::error::Error;

/// Parses a human-readable duration string (`"10s"`, `"5m"`, `"1h"`) as used
/// for options like a module's `batch_wait`. Merged configuration values
/// keep their declared shape (strings, numbers, ...); callers pull a
/// duration-typed option through this rather than the runtime assuming
/// every config value is already a [`Duration`].
pub fn parse_duration_value(value: &Value) -> Result<Duration, Error> {
    let text = value
        .as_str()
        .ok_or_else(|| Error::Configuration(format!("expected a duration string, got {value:?}")))?;
    parse_duration::parse(text)
        .map_err(|e| Error::Configuration(format!("invalid duration '{text}': {e}")))
}

/// A module's declared configuration surface: default values plus a
/// one-line description for each key. Declaring an option always supplies
/// both, so the two never drift out of sync. Backed by an [`IndexMap`] so
/// [`Self::keys`] preserves declaration order — useful for rendering a
/// module's options in the order its author thought to declare them, rather
/// than hash order.
#[derive(Debug, Clone, Default)]
pub struct ModuleOptions {
    defaults: IndexMap<String, Value>,
    descriptions: IndexMap<String, String>,
}

impl ModuleOptions {
    /// An empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an option with its default value and description.
    pub fn declare(mut self, key: impl Into<String>, default: Value, description: impl Into<String>) -> Self {
        let key = key.into();
        self.defaults.insert(key.clone(), default);
        self.descriptions.insert(key, description.into());
        self
    }

    /// Merges controller-supplied `overrides` into the declared defaults.
    /// An override key this module never declared is a configuration
    /// error, surfaced before `setup()` ever runs.
    pub fn merge(&self, overrides: &HashMap<String, Value>) -> Result<IndexMap<String, Value>, Error> {
        let mut effective = self.defaults.clone();
        for (key, value) in overrides {
            if !self.defaults.contains_key(key) {
                return Err(Error::Configuration(format!(
                    "unknown configuration key '{key}'"
                )));
            }
            effective.insert(key.clone(), value.clone());
        }
        Ok(effective)
    }

    /// The description for a declared key, if any.
    pub fn description(&self, key: &str) -> Option<&str> {
        self.descriptions.get(key).map(String::as_str)
    }

    /// The declared keys.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.defaults.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;

    #[test]
    fn unknown_override_key_is_rejected() {
        let options = ModuleOptions::new().declare("threads", Value::from(4), "worker count");
        let mut overrides = HashMap::new();
        overrides.insert("thredas".to_string(), Value::from(8));
        let result = options.merge(&overrides);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn known_override_replaces_default() {
        let options = ModuleOptions::new().declare("threads", Value::from(4), "worker count");
        let mut overrides = HashMap::new();
        overrides.insert("threads".to_string(), Value::from(8));
        let merged = options.merge(&overrides).unwrap();
        assert_eq!(merged.get("threads"), Some(&Value::from(8)));
    }

    #[test]
    fn duration_value_parses_human_readable_strings() {
        assert_eq!(
            parse_duration_value(&Value::from("5s")).unwrap(),
            Duration::from_secs(5)
        );
        assert_eq!(
            parse_duration_value(&Value::from("2m")).unwrap(),
            Duration::from_secs(120)
        );
        assert!(parse_duration_value(&Value::from("not a duration")).is_err());
        assert!(parse_duration_value(&Value::from(5)).is_err());
    }

    #[test]
    fn absent_overrides_keep_defaults() {
        let options = ModuleOptions::new().declare("threads", Value::from(4), "worker count");
        let merged = options.merge(&HashMap::new()).unwrap();
        assert_eq!(merged.get("threads"), Some(&Value::from(4)));
    }
}
