/// Unified error type for the harvest workspace.
///
/// All crates use this error type for propagation across crate boundaries.
/// Subsystem-specific failures should be converted into the matching variant.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// The interactive driver failed to perform a UI action (open, submit, reload, reset).
    #[error("driver error: {0}")]
    Driver(String),

    /// The automation bridge could not be reached or returned an unusable reply.
    #[error("bridge error: {0}")]
    Bridge(String),

    /// Error from the tabular store (unknown sheet, unreadable workbook, failed write).
    #[error("store error: {0}")]
    Store(String),

    /// Authentication against the target service failed.
    #[error("credential error: {0}")]
    Credential(String),

    /// Error from configuration loading or validation.
    #[error("config error: {0}")]
    Config(String),

    /// A bounded wait on a collaborator elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for HarvestError {
    fn from(err: serde_json::Error) -> Self {
        HarvestError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for HarvestError {
    fn from(err: serde_yaml::Error) -> Self {
        HarvestError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for HarvestError {
    fn from(err: std::io::Error) -> Self {
        HarvestError::Io(err.to_string())
    }
}
