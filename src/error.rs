//! Error types for Stackforge

use thiserror::Error;

/// Result type for Stackforge operations
pub type Result<T> = std::result::Result<T, ForgeError>;

/// Stackforge error types
#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("Stack error: {0}")]
    Stack(String),

    #[error("Stack not found: {0}")]
    StackNotFound(String),

    #[error("Invalid stack transition: {0} -> {1}")]
    InvalidTransition(String, String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Unknown personality: {0}")]
    UnknownPersonality(String),

    #[error("Personality incompatibility: {0}")]
    Incompatible(String),

    #[error("Image not available: {0}")]
    ImageUnavailable(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Fabric error: {0}")]
    Fabric(String),

    #[error("Substrate rejected request: {0}")]
    SubstrateRejected(String),

    #[error("Remote command failed on {host}: {message}")]
    Remote { host: String, message: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_yaml::Error> for ForgeError {
    fn from(e: serde_yaml::Error) -> Self {
        ForgeError::Yaml(e.to_string())
    }
}

impl From<reqwest::Error> for ForgeError {
    fn from(e: reqwest::Error) -> Self {
        ForgeError::Http(e.to_string())
    }
}

impl ForgeError {
    /// Whether this error is a substrate rejection eligible for the
    /// single automatic whole-workflow retry.
    pub fn is_substrate_rejection(&self) -> bool {
        matches!(self, ForgeError::SubstrateRejected(_))
    }
}
