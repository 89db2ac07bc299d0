//! Telemetry configuration from environment variables.

use std::collections::HashMap;
use std::env;

/// Configuration for logs, traces and metrics.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for traces and logs
    pub service_name: String,

    /// Service version reported as a resource attribute
    pub service_version: String,

    /// OTLP collector endpoint. Tracing export is disabled when `None`.
    pub otlp_endpoint: Option<String>,

    /// Log level filter (trace, debug, info, warn, error)
    pub log_level: String,

    /// Whether to write logs to stdout
    pub console_output: bool,

    /// Whether to format logs as JSON
    pub json_logs: bool,

    /// Deployment environment (PROD, LAB, LOCAL, TESTING)
    pub deployment: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "microbus".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: None,
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            deployment: "LOCAL".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `OTEL_SERVICE_NAME`: Service name (default: microbus)
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`: Collector endpoint (default: unset)
    /// - `MB_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `MB_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `MB_JSON_LOGS`: Enable JSON logs (default: true in containers)
    /// - `MICROBUS_DEPLOYMENT`: Deployment environment (default: LOCAL)
    pub fn from_env() -> Self {
        Self::from_vars(env::vars())
    }

    /// Create configuration from an explicit set of variables.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |name: &str| vars.get(name).filter(|v| !v.is_empty()).cloned();
        let is_container =
            get("KUBERNETES_SERVICE_HOST").is_some() || get("DOCKER_CONTAINER").is_some();
        let defaults = Self::default();

        Self {
            service_name: get("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
            service_version: defaults.service_version,
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT"),
            log_level: get("MB_LOG_LEVEL")
                .or_else(|| get("RUST_LOG"))
                .unwrap_or(defaults.log_level),
            console_output: get("MB_CONSOLE_OUTPUT")
                .map(|v| !v.eq_ignore_ascii_case("false") && v != "0")
                .unwrap_or(true),
            json_logs: get("MB_JSON_LOGS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(is_container),
            deployment: get("MICROBUS_DEPLOYMENT")
                .map(|v| v.to_ascii_uppercase())
                .unwrap_or(defaults.deployment),
        }
    }

    /// Configuration for the service with the given host name.
    pub fn for_service(host: &str) -> Self {
        let mut config = Self::from_env();
        config.service_name = host.to_string();
        config
    }

    /// Whether spans go through the selective processor.
    pub fn selective_tracing(&self) -> bool {
        self.deployment == "PROD"
    }
}
