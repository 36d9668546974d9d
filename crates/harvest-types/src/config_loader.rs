/// Config file loader with validation.
///
/// Reads the run configuration from a YAML file and validates it before any
/// session is launched. Credentials are not part of the file; see
/// [`Credentials::from_env`](crate::config::Credentials::from_env).
use std::path::{Path, PathBuf};

use crate::columns::column_index;
use crate::config::*;
use crate::errors::HarvestError;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "harvest.yaml";

/// Loads and validates the run configuration.
pub struct ConfigLoader {
    path: PathBuf,
}

impl ConfigLoader {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Read, parse and validate the config file.
    pub fn load(&self) -> Result<HarvestConfig, HarvestError> {
        let config = Self::load_file(&self.path)?;
        Self::validate(&config).map_err(|e| match e {
            HarvestError::Config(msg) => {
                HarvestError::Config(format!("{}: {msg}", self.path.display()))
            }
            other => other,
        })?;
        tracing::debug!(path = %self.path.display(), "loaded config");
        Ok(config)
    }

    /// Parse a config file without validating it.
    pub fn load_file(path: &Path) -> Result<HarvestConfig, HarvestError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HarvestError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::parse(&content)
            .map_err(|e| HarvestError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Parse YAML content. An empty document yields the defaults.
    pub fn parse(content: &str) -> Result<HarvestConfig, HarvestError> {
        if content.trim().is_empty() {
            return Ok(HarvestConfig::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validate the config for internal consistency.
    ///
    /// Checks:
    /// - At least one worker
    /// - Every timeout is positive
    /// - Column letters parse and rows are ordered
    /// - Relevance filter and payload field are non-empty
    /// - Service and bridge URLs are http(s)
    pub fn validate(config: &HarvestConfig) -> Result<(), HarvestError> {
        if config.worker_count == 0 {
            return Err(HarvestError::Config(
                "worker_count must be positive (got 0)".to_string(),
            ));
        }

        for (key, value) in [
            ("submit_timeout_ms", config.submit_timeout_ms),
            ("correlation_timeout_ms", config.correlation_timeout_ms),
            ("reload_timeout_ms", config.reload_timeout_ms),
            ("action_timeout_ms", config.action_timeout_ms),
            ("bridge.connect_timeout_ms", config.bridge.connect_timeout_ms),
        ] {
            if value == 0 {
                return Err(HarvestError::Config(format!("{key} must be positive")));
            }
        }

        validate_url("service_base_url", &config.service_base_url)?;
        validate_url("bridge.base_url", &config.bridge.base_url)?;

        if config.bridge.event_buffer == 0 {
            return Err(HarvestError::Config(
                "bridge.event_buffer must be positive".to_string(),
            ));
        }

        Self::validate_correlation(&config.correlation)?;
        Self::validate_workbook(&config.workbook)?;
        Ok(())
    }

    fn validate_correlation(config: &CorrelationConfig) -> Result<(), HarvestError> {
        if config.relevant_hosts.iter().all(|h| h.trim().is_empty()) {
            return Err(HarvestError::Config(
                "correlation.relevant_hosts must name at least one host".to_string(),
            ));
        }
        if config.payload_field.is_empty() {
            return Err(HarvestError::Config(
                "correlation.payload_field must not be empty".to_string(),
            ));
        }
        if config.session_marker.is_empty() {
            return Err(HarvestError::Config(
                "correlation.session_marker must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_workbook(config: &WorkbookConfig) -> Result<(), HarvestError> {
        for (key, letters) in [
            ("workbook.prompt_column", &config.prompt_column),
            ("workbook.result_start_column", &config.result_start_column),
        ] {
            if column_index(letters).is_none() {
                return Err(HarvestError::Config(format!(
                    "{key}: invalid column '{letters}' (expected letters like 'B' or 'AA')"
                )));
            }
        }

        if config.header_row == 0 {
            return Err(HarvestError::Config(
                "workbook.header_row must be positive (rows are 1-based)".to_string(),
            ));
        }
        if config.start_row <= config.header_row {
            return Err(HarvestError::Config(format!(
                "workbook.start_row ({}) must come after workbook.header_row ({})",
                config.start_row, config.header_row
            )));
        }
        if config.date_format.trim().is_empty() {
            return Err(HarvestError::Config(
                "workbook.date_format must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_url(key: &str, url: &str) -> Result<(), HarvestError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(HarvestError::Config(format!(
            "{key}: '{url}' is not an http(s) URL"
        )))
    }
}
