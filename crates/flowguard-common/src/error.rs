//! Error codes for the rule-management boundary
//!
//! Controllers outside this workspace translate store failures into
//! responses. `ErrorCode` pairs a stable numeric code with a message and
//! the HTTP status class the failure should surface as.

use serde::{Deserialize, Serialize};

/// Error code structure for API responses
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
    #[serde(skip)]
    pub http_status: u16,
}

impl ErrorCode<'_> {
    /// Whether callers should see this as a server-side failure
    pub fn is_server_error(&self) -> bool {
        self.http_status >= 500
    }
}

pub const PARAMETER_VALIDATE_ERROR: ErrorCode<'static> = ErrorCode {
    code: 20002,
    message: "parameter validate error",
    http_status: 400,
};

pub const RESOURCE_CONFLICT: ErrorCode<'static> = ErrorCode {
    code: 20005,
    message: "resource conflict",
    http_status: 409,
};

pub const CONFIG_SERVICE_ERROR: ErrorCode<'static> = ErrorCode {
    code: 30001,
    message: "configuration service error",
    http_status: 500,
};

pub const CONFIG_CONTENT_ERROR: ErrorCode<'static> = ErrorCode {
    code: 30002,
    message: "malformed rule content",
    http_status: 500,
};

pub const LOCK_TIMEOUT: ErrorCode<'static> = ErrorCode {
    code: 30003,
    message: "rule lock acquisition timed out",
    http_status: 503,
};

pub const CACHE_ERROR: ErrorCode<'static> = ErrorCode {
    code: 30004,
    message: "cache backend error",
    http_status: 500,
};

pub const ID_GENERATION_ERROR: ErrorCode<'static> = ErrorCode {
    code: 30005,
    message: "identifier generation failed",
    http_status: 500,
};
