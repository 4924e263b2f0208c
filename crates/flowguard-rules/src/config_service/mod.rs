//! Configuration service access
//!
//! Rule lists live in a configuration service as one JSON blob per
//! application and rule type. [`ConfigService`] is the seam the store
//! talks through; [`NacosConfigClient`] is the production implementation
//! and [`MemoryConfigService`] backs tests and standalone runs.

mod memory;
mod nacos;

use std::time::Duration;

use async_trait::async_trait;
use md5::{Digest, Md5};

use crate::error::ConfigServiceError;

pub use memory::MemoryConfigService;
pub use nacos::{NacosConfigClient, NacosSettings};

#[async_trait]
pub trait ConfigService: Send + Sync {
    /// Fetch the content stored at `data_id` in `group`; `None` when no
    /// such config exists.
    async fn get_config(
        &self,
        data_id: &str,
        group: &str,
        timeout: Duration,
    ) -> Result<Option<String>, ConfigServiceError>;

    /// Create or overwrite the content at `data_id` in `group`. With
    /// `cas_md5` the write only happens if the stored content still has
    /// that MD5. Returns whether the content was written.
    async fn publish_config(
        &self,
        data_id: &str,
        group: &str,
        content: &str,
        cas_md5: Option<&str>,
    ) -> Result<bool, ConfigServiceError>;
}

/// Compute the MD5 of config content as a lowercase hex digest.
pub fn compute_md5(content: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(content.as_bytes());
    const_hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_md5() {
        assert_eq!(compute_md5("hello world"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(compute_md5(""), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
