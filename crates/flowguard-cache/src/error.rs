//! Error types for cache-backed primitives

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache misconfigured: {0}")]
    Misconfigured(String),

    #[error("timed out waiting for lock '{key}'")]
    LockTimeout { key: String },

    #[error("value '{0}' is not numeric")]
    NotNumeric(String),
}

impl CacheError {
    /// Startup-time errors that no retry can fix
    pub fn is_configuration(&self) -> bool {
        matches!(self, CacheError::Misconfigured(_))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::LockTimeout {
            key: "rule-lock:orderService".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "timed out waiting for lock 'rule-lock:orderService'"
        );

        let err = CacheError::NotNumeric("abc".to_string());
        assert_eq!(err.to_string(), "value 'abc' is not numeric");

        let err = CacheError::Misconfigured("no topology".to_string());
        assert!(err.is_configuration());
    }
}
