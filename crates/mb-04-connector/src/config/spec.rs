//! Definitions and validation rules of configuration properties.

use crate::error::ConfigError;
use shared_types::ParsedUrl;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Validation rule of a config value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Validation {
    #[default]
    Str,
    Bool,
    Int,
    Float,
    /// Durations such as `250ms`, `1m30s`.
    Dur,
    Url,
    Email,
    /// One of a fixed set of values.
    Set(Vec<String>),
}

impl Validation {
    pub fn check(&self, value: &str) -> bool {
        match self {
            Self::Str => true,
            Self::Bool => parse_bool(value).is_some(),
            Self::Int => value.trim().parse::<i64>().is_ok(),
            Self::Float => value.trim().parse::<f64>().is_ok_and(f64::is_finite),
            Self::Dur => parse_duration(value).is_some(),
            Self::Url => ParsedUrl::parse(value.trim()).is_ok(),
            Self::Email => is_email(value.trim()),
            Self::Set(options) => options.iter().any(|o| o == value),
        }
    }
}

impl FromStr for Validation {
    type Err = ConfigError;

    /// Parse `str`, `bool`, `int`, `float`, `dur`, `url`, `email` or
    /// `set a|b|c`. The empty rule is `str`.
    fn from_str(rule: &str) -> Result<Self, Self::Err> {
        let rule = rule.trim();
        let (kind, arg) = rule.split_once(' ').unwrap_or((rule, ""));
        let parsed = match kind.to_ascii_lowercase().as_str() {
            "" | "str" => Self::Str,
            "bool" => Self::Bool,
            "int" => Self::Int,
            "float" => Self::Float,
            "dur" => Self::Dur,
            "url" => Self::Url,
            "email" => Self::Email,
            "set" => {
                let options: Vec<String> = arg
                    .split('|')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect();
                if options.is_empty() {
                    return Err(ConfigError::InvalidRule(rule.to_string()));
                }
                Self::Set(options)
            }
            _ => return Err(ConfigError::InvalidRule(rule.to_string())),
        };
        Ok(parsed)
    }
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str => f.write_str("str"),
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::Float => f.write_str("float"),
            Self::Dur => f.write_str("dur"),
            Self::Url => f.write_str("url"),
            Self::Email => f.write_str("email"),
            Self::Set(options) => write!(f, "set {}", options.join("|")),
        }
    }
}

/// Definition of a config property.
#[derive(Debug, Clone, Default)]
pub struct ConfigSpec {
    pub(crate) default: Option<String>,
    pub(crate) validation: Validation,
    pub(crate) secret: bool,
    pub(crate) description: String,
}

impl ConfigSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Set the validation rule from its textual form.
    pub fn validation(mut self, rule: &str) -> Result<Self, ConfigError> {
        self.validation = rule.parse()?;
        Ok(self)
    }

    #[must_use]
    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }

    /// Values of secret configs are never logged.
    #[must_use]
    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    #[must_use]
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    pub fn is_secret(&self) -> bool {
        self.secret
    }

    pub fn rule(&self) -> &Validation {
        &self.validation
    }
}

/// Parse `true`/`false` in the usual spellings.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" => Some(true),
        "false" | "f" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Parse a duration made of `<number><unit>` terms, e.g. `1h30m`, `250ms`,
/// `1.5s`. Units: `ns`, `us`, `µs`, `ms`, `s`, `m`, `h`. A bare `0` is zero.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let s = value.trim();
    if s == "0" {
        return Some(Duration::ZERO);
    }
    if s.is_empty() {
        return None;
    }
    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return None;
        }
        let number: f64 = rest[..num_len].parse().ok()?;
        rest = &rest[num_len..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total += number * nanos_per_unit;
    }
    if !total.is_finite() || total > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(total.round() as u64))
}

fn is_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !value.chars().any(char::is_whitespace)
}
