/// Configuration types for the harvest workspace.
///
/// Parsed from a single YAML file (see [`crate::config_loader::ConfigLoader`]).
/// Every field has a default so a partial file is enough to get started.
///
/// ```yaml
/// worker_count: 10
/// correlation_timeout_ms: 5000
/// max_reload_attempts: 3
/// correlation:
///   relevant_hosts: [chatgpt.com, openai.com]
/// workbook:
///   path: Data/Contents_Seeding.json
///   prompt_column: B
/// ```
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Number of concurrent sessions (one Worker Loop each).
    pub worker_count: usize,
    /// Upper bound on a prompt submission, including navigation to the new conversation.
    pub submit_timeout_ms: u64,
    /// How long the first event window waits for an answer after submission.
    pub correlation_timeout_ms: u64,
    /// How long each reload event window waits for an answer.
    pub reload_timeout_ms: u64,
    /// Upper bound on open and reset actions.
    pub action_timeout_ms: u64,
    /// Reload-and-re-listen attempts after the first window expires.
    pub max_reload_attempts: u32,
    /// Pause between two jobs of the same worker.
    pub inter_job_delay_ms: u64,
    /// Landing page every session opens before its first job.
    pub service_base_url: String,
    /// Event relevance and payload extraction rules.
    pub correlation: CorrelationConfig,
    /// Workbook location and layout.
    pub workbook: WorkbookConfig,
    /// Automation bridge connection.
    pub bridge: BridgeConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            submit_timeout_ms: 15_000,
            correlation_timeout_ms: 5_000,
            reload_timeout_ms: 10_000,
            action_timeout_ms: 15_000,
            max_reload_attempts: 3,
            inter_job_delay_ms: 1_000,
            service_base_url: "https://chatgpt.com/".to_string(),
            correlation: CorrelationConfig::default(),
            workbook: WorkbookConfig::default(),
            bridge: BridgeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl HarvestConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn correlation_timeout(&self) -> Duration {
        Duration::from_millis(self.correlation_timeout_ms)
    }

    pub fn reload_timeout(&self) -> Duration {
        Duration::from_millis(self.reload_timeout_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn inter_job_delay(&self) -> Duration {
        Duration::from_millis(self.inter_job_delay_ms)
    }
}

/// Rules for recognizing answer-bearing events in the network stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// An event is relevant only if its URL contains one of these hosts.
    pub relevant_hosts: Vec<String>,
    /// An event is relevant only if its content type contains this string.
    pub content_type: String,
    /// Field searched for at any depth of the event body.
    pub payload_field: String,
    /// Path marker preceding the session identifier in a conversation URL.
    pub session_marker: String,
    /// Backend resource path that, followed by the session identifier, scopes an event to a session.
    pub conversation_resource: String,
    /// Body field that may carry the conversation URL when navigation did not reveal it.
    pub discovery_field: String,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            relevant_hosts: vec!["chatgpt.com".to_string(), "openai.com".to_string()],
            content_type: "application/json".to_string(),
            payload_field: "queries".to_string(),
            session_marker: "/c/".to_string(),
            conversation_resource: "/backend-api/conversation/".to_string(),
            discovery_field: "location_href".to_string(),
        }
    }
}

/// Where jobs are read from and results written to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbookConfig {
    /// Workbook file.
    pub path: PathBuf,
    /// Column holding the prompts (A1 letters).
    pub prompt_column: String,
    /// Row holding the column headers.
    pub header_row: u32,
    /// First row holding a job.
    pub start_row: u32,
    /// First column considered when choosing where to write results.
    pub result_start_column: String,
    /// `chrono` format of the run date written into the result header.
    pub date_format: String,
}

impl Default for WorkbookConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("Data/Contents_Seeding.json"),
            prompt_column: "B".to_string(),
            header_row: 1,
            start_row: 2,
            result_start_column: "C".to_string(),
            date_format: "%Y/%m/%d".to_string(),
        }
    }
}

/// HTTP automation bridge settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Base URL of the bridge process.
    pub base_url: String,
    /// Timeout for establishing a connection to the bridge.
    pub connect_timeout_ms: u64,
    /// Unread events retained per event-window subscription.
    pub event_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9333".to_string(),
            connect_timeout_ms: 10_000,
            event_buffer: 1024,
        }
    }
}

/// Log file placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            file: "harvest.log".to_string(),
        }
    }
}

/// Environment variable holding the login identity.
pub const IDENTITY_ENV: &str = "HARVEST_IDENTITY";
/// Environment variable holding the login secret.
pub const SECRET_ENV: &str = "HARVEST_SECRET";

/// Login identity and secret for the credential flow.
///
/// Never read from the config file. The secret is redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub identity: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }

    /// Read credentials from [`IDENTITY_ENV`] and [`SECRET_ENV`].
    ///
    /// Returns `None` unless both are set and non-empty.
    pub fn from_env() -> Option<Self> {
        let identity = std::env::var(IDENTITY_ENV).ok()?;
        let secret = std::env::var(SECRET_ENV).ok()?;
        if identity.trim().is_empty() || secret.is_empty() {
            return None;
        }
        Some(Self::new(identity, secret))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
