//! Deployment environments.

use crate::error::ConnectorError;
use std::fmt;
use std::str::FromStr;

/// Environment a connector is deployed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Deployment {
    /// Production: selective tracing, configs locked after startup.
    Prod,
    /// Shared lab environment.
    Lab,
    /// Developer machine.
    #[default]
    Local,
    /// Unit and integration tests; tickers do not run.
    Testing,
}

impl Deployment {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prod => "PROD",
            Self::Lab => "LAB",
            Self::Local => "LOCAL",
            Self::Testing => "TESTING",
        }
    }

    /// Whether configs may be changed with a setter after startup.
    #[must_use]
    pub fn allows_config_setters(self) -> bool {
        matches!(self, Self::Local | Self::Testing)
    }
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Deployment {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PROD" => Ok(Self::Prod),
            "LAB" => Ok(Self::Lab),
            "LOCAL" => Ok(Self::Local),
            "TESTING" => Ok(Self::Testing),
            _ => Err(ConnectorError::InvalidDeployment(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("prod".parse::<Deployment>().unwrap(), Deployment::Prod);
        assert_eq!(" Testing ".parse::<Deployment>().unwrap(), Deployment::Testing);
        assert!("staging".parse::<Deployment>().is_err());
        assert_eq!(Deployment::Lab.to_string(), "LAB");
    }
}
