//! # Environment Source
//!
//! Resolves a named property for a host. Lookup order:
//!
//! 1. Process environment `MICROBUS_<HOSTSEGMENTS>_<NAME>`, trying the full
//!    host first and then each shorter suffix, e.g. for `www.example.com`:
//!    `MICROBUS_WWWEXAMPLECOM_X`, `MICROBUS_EXAMPLECOM_X`, `MICROBUS_COM_X`
//! 2. `MICROBUS_ALL_<NAME>`
//! 3. `env.yaml` files from the working directory upward, nearest first,
//!    with the same suffix rule:
//!
//! ```yaml
//! www.example.com:
//!   Foo: bar
//! all:
//!   Foo: baz
//! ```
//!
//! Names are case-insensitive.

use crate::error::ConfigError;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name looked up in the working directory and its ancestors.
pub const ENV_FILE_NAME: &str = "env.yaml";

type EnvFile = HashMap<String, HashMap<String, String>>;

/// Environment variables plus `env.yaml` layers.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    vars: HashMap<String, String>,
    /// Nearest first. Keys are lowercased.
    files: Vec<(PathBuf, EnvFile)>,
    /// Whether `vars` mirror the process environment.
    process: bool,
}

impl EnvSource {
    /// Empty source that resolves nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process environment plus every `env.yaml` from the working
    /// directory upward.
    pub fn from_process() -> Result<Self, ConfigError> {
        let mut source = Self::from_vars(env::vars());
        source.process = true;
        match env::current_dir() {
            Ok(dir) => source.discover(&dir),
            Err(_) => Ok(source),
        }
    }

    /// A source over explicit variables, without env files.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into().to_ascii_uppercase(), v.into()))
                .collect(),
            files: Vec::new(),
            process: false,
        }
    }

    /// A fresh copy of this source: the process environment is read again
    /// if that is where the variables came from, and every env file is
    /// parsed again.
    pub fn reloaded(&self) -> Result<Self, ConfigError> {
        let mut source = if self.process {
            Self::from_vars(env::vars())
        } else {
            Self::from_vars(self.vars.clone())
        };
        source.process = self.process;
        for (path, _) in &self.files {
            source = source.with_env_file(path)?;
        }
        Ok(source)
    }

    /// Add every `env.yaml` found in `start` and its ancestors, nearest
    /// first, behind the files already added.
    pub fn discover(mut self, start: &Path) -> Result<Self, ConfigError> {
        for dir in start.ancestors() {
            let path = dir.join(ENV_FILE_NAME);
            if path.is_file() {
                self = self.with_env_file(&path)?;
            }
        }
        Ok(self)
    }

    /// Add one env file behind the files already added.
    pub fn with_env_file(mut self, path: &Path) -> Result<Self, ConfigError> {
        let env_file_error = |reason: String| ConfigError::EnvFile {
            path: path.display().to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| env_file_error(e.to_string()))?;
        let parsed = parse_env_file(&text).map_err(env_file_error)?;
        debug!(path = %path.display(), hosts = parsed.len(), "Loaded env file");
        self.files.push((path.to_path_buf(), parsed));
        Ok(self)
    }

    /// Resolve `name` for `host`.
    pub fn lookup(&self, host: &str, name: &str) -> Option<String> {
        let name_key = env_key(name);
        let suffixes = host_suffixes(host);

        for suffix in &suffixes {
            let key = format!("MICROBUS_{}_{}", env_key(&suffix.replace('.', "")), name_key);
            if let Some(value) = self.vars.get(&key) {
                return Some(value.clone());
            }
        }
        if let Some(value) = self.vars.get(&format!("MICROBUS_ALL_{name_key}")) {
            return Some(value.clone());
        }

        let name_lower = name.to_ascii_lowercase();
        for (_, file) in &self.files {
            let scoped = suffixes
                .iter()
                .map(String::as_str)
                .chain(std::iter::once("all"));
            for scope in scoped {
                if let Some(value) = file.get(scope).and_then(|props| props.get(&name_lower)) {
                    return Some(value.clone());
                }
            }
        }
        None
    }

    /// Paths of the env files in lookup order.
    pub fn env_files(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|(p, _)| p.as_path())
    }
}

/// `www.example.com` → `["www.example.com", "example.com", "com"]`
fn host_suffixes(host: &str) -> Vec<String> {
    let host = host.to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    (0..labels.len()).map(|i| labels[i..].join(".")).collect()
}

fn env_key(s: &str) -> String {
    s.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn parse_env_file(text: &str) -> Result<EnvFile, String> {
    let root: serde_yaml::Value = serde_yaml::from_str(text).map_err(|e| e.to_string())?;
    let mut out = EnvFile::new();
    let serde_yaml::Value::Mapping(hosts) = root else {
        return if root.is_null() {
            Ok(out)
        } else {
            Err("expected a mapping of hosts".to_string())
        };
    };
    for (host, props) in hosts {
        let Some(host) = scalar(&host) else {
            continue;
        };
        let serde_yaml::Value::Mapping(props) = props else {
            continue;
        };
        let entry = out.entry(host.to_ascii_lowercase()).or_default();
        for (name, value) in props {
            if let (Some(name), Some(value)) = (scalar(&name), scalar(&value)) {
                entry.insert(name.to_ascii_lowercase(), value);
            }
        }
    }
    Ok(out)
}

fn scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Null => Some(String::new()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_most_specific_suffix_wins() {
        let env = EnvSource::from_vars([
            ("MICROBUS_WWWEXAMPLECOM_AAA", "111"),
            ("MICROBUS_EXAMPLECOM_AAA", "XXX"),
            ("MICROBUS_COM_BBB", "222"),
            ("MICROBUS_ALL_CCC", "333"),
        ]);
        assert_eq!(env.lookup("www.example.com", "aaa").as_deref(), Some("111"));
        assert_eq!(env.lookup("www.example.com", "Bbb").as_deref(), Some("222"));
        assert_eq!(env.lookup("www.example.com", "CCC").as_deref(), Some("333"));
        assert_eq!(env.lookup("other.example.com", "aaa").as_deref(), Some("XXX"));
        assert!(env.lookup("www.example.com", "ddd").is_none());
    }

    #[test]
    fn test_env_yaml_nearest_wins() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("svc");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            root.path().join(ENV_FILE_NAME),
            "all:\n  Foo: far\n  Bar: far\nexample.com:\n  Baz: 7\n",
        )
        .unwrap();
        std::fs::write(nested.join(ENV_FILE_NAME), "all:\n  foo: near\n").unwrap();

        let env = EnvSource::new().discover(&nested).unwrap();
        assert_eq!(env.lookup("www.example.com", "Foo").as_deref(), Some("near"));
        assert_eq!(env.lookup("www.example.com", "bar").as_deref(), Some("far"));
        assert_eq!(env.lookup("www.example.com", "baz").as_deref(), Some("7"));
        assert_eq!(env.env_files().count(), 2);
    }

    #[test]
    fn test_process_vars_beat_env_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ENV_FILE_NAME);
        std::fs::write(&path, "www.example.com:\n  Foo: yaml\n").unwrap();
        let env = EnvSource::from_vars([("MICROBUS_ALL_FOO", "var")])
            .with_env_file(&path)
            .unwrap();
        assert_eq!(env.lookup("www.example.com", "foo").as_deref(), Some("var"));
    }

    #[test]
    fn test_bad_env_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ENV_FILE_NAME);
        std::fs::write(&path, "- just\n- a list\n").unwrap();
        assert!(matches!(
            EnvSource::new().with_env_file(&path),
            Err(ConfigError::EnvFile { .. })
        ));
    }

    #[test]
    fn test_reloaded_rereads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ENV_FILE_NAME);
        std::fs::write(&path, "all:\n  Level: 1\n").unwrap();
        let env = EnvSource::from_vars([("MICROBUS_ALL_OTHER", "x")])
            .with_env_file(&path)
            .unwrap();
        assert_eq!(env.lookup("h", "level").as_deref(), Some("1"));

        std::fs::write(&path, "all:\n  Level: 2\n").unwrap();
        let reloaded = env.reloaded().unwrap();
        assert_eq!(reloaded.lookup("h", "level").as_deref(), Some("2"));
        assert_eq!(reloaded.lookup("h", "other").as_deref(), Some("x"));
    }
}
