//! # Configuration
//!
//! User-defined config properties of a connector. Values come from an
//! explicit setter or, failing that, from the [`EnvSource`], falling back to
//! the default of the definition. Every value is checked against the
//! property's validation rule.

pub mod env;
pub mod spec;

pub use env::{EnvSource, ENV_FILE_NAME};
pub use spec::{parse_bool, parse_duration, ConfigSpec, Validation};

use crate::error::ConfigError;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct ConfigEntry {
    name: String,
    spec: ConfigSpec,
    value: Option<String>,
    explicit: bool,
}

impl ConfigEntry {
    fn effective(&self) -> Option<&str> {
        self.value.as_deref().or(self.spec.default.as_deref())
    }
}

/// Defined config properties, keyed case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct Configs {
    entries: BTreeMap<String, ConfigEntry>,
}

impl Configs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: &str, spec: ConfigSpec) -> Result<(), ConfigError> {
        let valid_name = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            && name.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid_name {
            return Err(ConfigError::InvalidName(name.to_string()));
        }
        let key = name.to_ascii_lowercase();
        if self.entries.contains_key(&key) {
            return Err(ConfigError::AlreadyDefined(name.to_string()));
        }
        if let Some(default) = &spec.default {
            if !spec.validation.check(default) {
                return Err(ConfigError::InvalidValue {
                    name: name.to_string(),
                    rule: spec.validation.to_string(),
                });
            }
        }
        self.entries.insert(
            key,
            ConfigEntry {
                name: name.to_string(),
                spec,
                value: None,
                explicit: false,
            },
        );
        Ok(())
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Current value, or the default when never resolved.
    pub fn get(&self, name: &str) -> Option<String> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .and_then(|e| e.effective().map(str::to_string))
    }

    pub fn spec(&self, name: &str) -> Option<&ConfigSpec> {
        self.entries.get(&name.to_ascii_lowercase()).map(|e| &e.spec)
    }

    /// Set a value explicitly. Returns whether the value changed.
    pub fn set(&mut self, name: &str, value: &str) -> Result<bool, ConfigError> {
        let entry = self
            .entries
            .get_mut(&name.to_ascii_lowercase())
            .ok_or_else(|| ConfigError::Undefined(name.to_string()))?;
        if !entry.spec.validation.check(value) {
            return Err(ConfigError::InvalidValue {
                name: entry.name.clone(),
                rule: entry.spec.validation.to_string(),
            });
        }
        let changed = entry.effective() != Some(value);
        entry.value = Some(value.to_string());
        entry.explicit = true;
        Ok(changed)
    }

    /// Re-resolve every property that was not set explicitly.
    ///
    /// Nothing is changed when any resolved value fails validation. Returns
    /// the names of the properties whose value changed.
    pub fn resolve(&mut self, host: &str, env: &EnvSource) -> Result<Vec<String>, ConfigError> {
        let mut updates = Vec::new();
        for (key, entry) in &self.entries {
            if entry.explicit {
                continue;
            }
            let resolved = env.lookup(host, &entry.name);
            if let Some(value) = &resolved {
                if !entry.spec.validation.check(value) {
                    return Err(ConfigError::InvalidValue {
                        name: entry.name.clone(),
                        rule: entry.spec.validation.to_string(),
                    });
                }
            }
            if resolved.as_deref() != entry.value.as_deref() {
                updates.push((key.clone(), resolved));
            }
        }

        let mut changed = Vec::new();
        for (key, resolved) in updates {
            if let Some(entry) = self.entries.get_mut(&key) {
                let before = entry.effective().map(str::to_string);
                entry.value = resolved;
                if entry.effective().map(str::to_string) != before {
                    changed.push(entry.name.clone());
                }
            }
        }
        Ok(changed)
    }

    /// `name=value` pairs for logging, with secrets masked.
    pub fn describe(&self) -> Vec<String> {
        self.entries
            .values()
            .map(|e| {
                let value = if e.spec.secret {
                    "*****"
                } else {
                    e.effective().unwrap_or("")
                };
                format!("{}={}", e.name, value)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configs() -> Configs {
        let mut configs = Configs::new();
        configs
            .define("Port", ConfigSpec::new().default_value("8080").validation("int").unwrap())
            .unwrap();
        configs
            .define("Password", ConfigSpec::new().secret())
            .unwrap();
        configs
    }

    #[test]
    fn test_define_rules() {
        let mut configs = configs();
        assert!(matches!(
            configs.define("port", ConfigSpec::new()),
            Err(ConfigError::AlreadyDefined(_))
        ));
        assert!(matches!(
            configs.define("9lives", ConfigSpec::new()),
            Err(ConfigError::InvalidName(_))
        ));
        assert!(matches!(
            configs.define("Bad", ConfigSpec::new().default_value("x").validation("int").unwrap()),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_default_then_env_then_setter() {
        let mut configs = configs();
        assert_eq!(configs.get("PORT").as_deref(), Some("8080"));

        let env = EnvSource::from_vars([("MICROBUS_ALL_PORT", "9090")]);
        let changed = configs.resolve("www.example.com", &env).unwrap();
        assert_eq!(changed, vec!["Port".to_string()]);
        assert_eq!(configs.get("port").as_deref(), Some("9090"));

        assert!(configs.set("port", "7070").unwrap());
        assert!(configs.resolve("www.example.com", &env).unwrap().is_empty());
        assert_eq!(configs.get("port").as_deref(), Some("7070"));
    }

    #[test]
    fn test_invalid_env_value_is_rejected() {
        let mut configs = configs();
        let env = EnvSource::from_vars([("MICROBUS_ALL_PORT", "eighty")]);
        assert!(configs.resolve("h", &env).is_err());
        assert_eq!(configs.get("port").as_deref(), Some("8080"));
        assert!(configs.set("port", "eighty").is_err());
    }

    #[test]
    fn test_describe_masks_secrets() {
        let mut configs = configs();
        configs.set("password", "hunter2").unwrap();
        let described = configs.describe();
        assert!(described.contains(&"Password=*****".to_string()));
        assert!(described.contains(&"Port=8080".to_string()));
    }
}
