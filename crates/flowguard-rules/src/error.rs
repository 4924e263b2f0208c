//! Error types for the rule store and configuration service

use flowguard_cache::CacheError;
use flowguard_common::error::{
    CACHE_ERROR, CONFIG_CONTENT_ERROR, CONFIG_SERVICE_ERROR, ErrorCode, ID_GENERATION_ERROR,
    LOCK_TIMEOUT, PARAMETER_VALIDATE_ERROR, RESOURCE_CONFLICT,
};
use flowguard_common::IdError;

/// Failure talking to the configuration service
#[derive(Debug, thiserror::Error)]
pub enum ConfigServiceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("configuration service request timed out")]
    Timeout,

    #[error("all configuration servers failed")]
    AllServersFailed,

    #[error("auth failed: {0}")]
    Auth(String),

    #[error("invalid configuration service settings: {0}")]
    InvalidSettings(String),
}

impl ConfigServiceError {
    /// Classify a transport error, separating timeouts
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ConfigServiceError::Timeout
        } else {
            ConfigServiceError::Http(err)
        }
    }
}

/// Failure of a rule store operation
#[derive(Debug, thiserror::Error)]
pub enum RuleStoreError {
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("configuration service error: {0}")]
    ConfigService(#[from] ConfigServiceError),

    #[error("rule serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("rule lock error: {0}")]
    Lock(#[from] CacheError),

    #[error("publish of '{data_id}' rejected: content changed since it was read")]
    PublishRejected { data_id: String },

    #[error("rule id {id} already exists in '{data_id}'")]
    DuplicateId { data_id: String, id: u64 },

    #[error("id generation failed: {0}")]
    IdGeneration(#[from] IdError),
}

impl RuleStoreError {
    /// Error code the rule-management boundary reports for this failure
    pub fn error_code(&self) -> ErrorCode<'static> {
        match self {
            RuleStoreError::InvalidRule(_) => PARAMETER_VALIDATE_ERROR,
            RuleStoreError::ConfigService(_) => CONFIG_SERVICE_ERROR,
            RuleStoreError::Serialization(_) => CONFIG_CONTENT_ERROR,
            RuleStoreError::Lock(CacheError::LockTimeout { .. }) => LOCK_TIMEOUT,
            RuleStoreError::Lock(_) => CACHE_ERROR,
            RuleStoreError::PublishRejected { .. } => RESOURCE_CONFLICT,
            RuleStoreError::DuplicateId { .. } => RESOURCE_CONFLICT,
            RuleStoreError::IdGeneration(_) => ID_GENERATION_ERROR,
        }
    }

    pub fn http_status(&self) -> u16 {
        self.error_code().http_status
    }

    /// Whether the failure should surface as a server-side (5xx) error
    pub fn is_fatal(&self) -> bool {
        self.error_code().is_server_error()
    }
}

pub type Result<T> = std::result::Result<T, RuleStoreError>;
