//! Configuration (SPEC_FULL.md §6 "Configuration options", "ADDED —
//! configuration loading"). `MonitorConfig` is the single thing a caller
//! builds before calling [`crate::monitor::Monitor::start_service`].

use std::sync::Arc;
use std::time::Duration;

use serde_derive::Deserialize;

use crate::error::{MonitorError, NodeContext};
use crate::extractor::Extractor;

const DEFAULT_TIMEOUT_MSEC: u64 = 5000;
const DEFAULT_RETRY_DELAY_MSEC: u64 = 1000;
const DEFAULT_FALLBACK_INTERVAL_MSEC: u64 = 1000;
const DEFAULT_WAIT_SECS: u64 = 60;

/// The deserializable subset of configuration: everything except the
/// extractor set, which is assembled in code (`Extractor` is a trait
/// object and has no serde impl, per SPEC_FULL.md §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RawConfig {
    service_name: String,
    status_check_name: String,
    timeout_msec: u64,
    strict_status_consistency: bool,
    retry_delay_msec: u64,
    fallback_interval_msec: u64,
    wait_secs: u64,
}

impl Default for RawConfig {
    fn default() -> Self {
        RawConfig {
            service_name: String::new(),
            status_check_name: String::new(),
            timeout_msec: DEFAULT_TIMEOUT_MSEC,
            strict_status_consistency: false,
            retry_delay_msec: DEFAULT_RETRY_DELAY_MSEC,
            fallback_interval_msec: DEFAULT_FALLBACK_INTERVAL_MSEC,
            wait_secs: DEFAULT_WAIT_SECS,
        }
    }
}

/// Monitor configuration (SPEC_FULL.md §6). `extractors` is always
/// assembled in code; everything else can be loaded from a TOML or YAML
/// document via [`MonitorConfig::from_toml_str`] / [`MonitorConfig::from_yaml_str`].
#[derive(Clone)]
pub struct MonitorConfig {
    pub service_name: String,
    pub status_check_name: String,
    pub timeout_msec: u64,
    pub extractors: Vec<Arc<dyn Extractor>>,
    pub strict_status_consistency: bool,
    pub retry_delay_msec: u64,
    pub fallback_interval_msec: u64,
    pub wait_secs: u64,
}

impl MonitorConfig {
    pub fn new(service_name: impl Into<String>, status_check_name: impl Into<String>) -> Self {
        MonitorConfig {
            service_name: service_name.into(),
            status_check_name: status_check_name.into(),
            timeout_msec: DEFAULT_TIMEOUT_MSEC,
            extractors: Vec::new(),
            strict_status_consistency: false,
            retry_delay_msec: DEFAULT_RETRY_DELAY_MSEC,
            fallback_interval_msec: DEFAULT_FALLBACK_INTERVAL_MSEC,
            wait_secs: DEFAULT_WAIT_SECS,
        }
    }

    pub fn with_extractors(mut self, extractors: Vec<Arc<dyn Extractor>>) -> Self {
        self.extractors = extractors;
        self
    }

    pub fn with_strict_status_consistency(mut self, strict: bool) -> Self {
        self.strict_status_consistency = strict;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_msec)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_msec)
    }

    pub fn fallback_interval(&self) -> Duration {
        Duration::from_millis(self.fallback_interval_msec)
    }

    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    fn from_raw(raw: RawConfig, extractors: Vec<Arc<dyn Extractor>>) -> Result<Self, MonitorError> {
        if raw.service_name.is_empty() {
            return Err(MonitorError::invalid_data(
                "serviceName is required and must be non-empty",
                NodeContext::new(),
            ));
        }
        if raw.status_check_name.is_empty() {
            return Err(MonitorError::invalid_data(
                "statusCheckName is required and must be non-empty",
                NodeContext::new(),
            ));
        }

        Ok(MonitorConfig {
            service_name: raw.service_name,
            status_check_name: raw.status_check_name,
            timeout_msec: if raw.timeout_msec > 0 {
                raw.timeout_msec
            } else {
                DEFAULT_TIMEOUT_MSEC
            },
            extractors,
            strict_status_consistency: raw.strict_status_consistency,
            retry_delay_msec: if raw.retry_delay_msec > 0 {
                raw.retry_delay_msec
            } else {
                DEFAULT_RETRY_DELAY_MSEC
            },
            fallback_interval_msec: if raw.fallback_interval_msec > 0 {
                raw.fallback_interval_msec
            } else {
                DEFAULT_FALLBACK_INTERVAL_MSEC
            },
            wait_secs: if raw.wait_secs > 0 {
                raw.wait_secs
            } else {
                DEFAULT_WAIT_SECS
            },
        })
    }

    /// Parses a TOML document into a `MonitorConfig`, given the extractor
    /// set to attach (assembled by the caller in code).
    pub fn from_toml_str(
        document: &str,
        extractors: Vec<Arc<dyn Extractor>>,
    ) -> Result<Self, MonitorError> {
        let raw: RawConfig = toml::from_str(document).map_err(|err| {
            MonitorError::invalid_data(format!("invalid config document: {err}"), NodeContext::new())
        })?;
        Self::from_raw(raw, extractors)
    }

    /// Parses a YAML document into a `MonitorConfig`.
    pub fn from_yaml_str(
        document: &str,
        extractors: Vec<Arc<dyn Extractor>>,
    ) -> Result<Self, MonitorError> {
        let raw: RawConfig = serde_yaml::from_str(document).map_err(|err| {
            MonitorError::invalid_data(format!("invalid config document: {err}"), NodeContext::new())
        })?;
        Self::from_raw(raw, extractors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::StatusExtractor;

    #[test]
    fn builder_applies_spec_defaults() {
        let config = MonitorConfig::new("web", "app:status");
        assert_eq!(config.timeout_msec, DEFAULT_TIMEOUT_MSEC);
        assert_eq!(config.retry_delay_msec, DEFAULT_RETRY_DELAY_MSEC);
        assert_eq!(config.fallback_interval_msec, DEFAULT_FALLBACK_INTERVAL_MSEC);
        assert_eq!(config.wait_secs, DEFAULT_WAIT_SECS);
        assert!(config.extractors.is_empty());
        assert!(!config.strict_status_consistency);
    }

    #[test]
    fn from_toml_str_parses_a_full_document() {
        let document = r#"
            service_name = "web"
            status_check_name = "app:status"
            timeout_msec = 3000
            strict_status_consistency = true
        "#;
        let extractors: Vec<Arc<dyn Extractor>> = vec![Arc::new(StatusExtractor)];
        let config = MonitorConfig::from_toml_str(document, extractors).unwrap();
        assert_eq!(config.service_name, "web");
        assert_eq!(config.timeout_msec, 3000);
        assert!(config.strict_status_consistency);
        assert_eq!(config.extractors.len(), 1);
    }

    #[test]
    fn from_yaml_str_rejects_missing_service_name() {
        let document = "status_check_name: app:status\n";
        let result = MonitorConfig::from_yaml_str(document, vec![]);
        assert!(result.is_err());
    }
}
