//! Flowguard Common - Shared types, identifiers, and utilities
//!
//! This crate provides the foundational pieces used across all Flowguard components:
//! - Error codes for the rule-management boundary
//! - Snowflake identifier generation
//! - Utility functions
//! - Common constants

pub mod error;
pub mod id;
pub mod utils;

// Re-exports for convenience
pub use error::ErrorCode;
pub use id::{IdError, IdGenerator, IdParts};
pub use utils::{is_valid, local_ip};

/// Configuration group every rule blob is published under
pub const DEFAULT_GROUP: &str = "SENTINEL_GROUP";

/// Read timeout for configuration-service lookups, in milliseconds
pub const CONFIG_READ_TIMEOUT_MS: u64 = 3000;

/// Write timeout for configuration-service publishes, in milliseconds
pub const CONFIG_WRITE_TIMEOUT_MS: u64 = 3000;

/// Data-id suffixes, one per rule variant
pub const FLOW_DATA_ID_SUFFIX: &str = "-flow-rules";
pub const DEGRADE_DATA_ID_SUFFIX: &str = "-degrade-rules";
pub const GATEWAY_API_DATA_ID_SUFFIX: &str = "-gateway-api-rules";

/// Build the configuration key holding the rule list of one application.
pub fn rule_data_id(app: &str, suffix: &str) -> String {
    format!("{}{}", app, suffix)
}
