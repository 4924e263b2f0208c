//! In-process configuration service

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{ConfigService, compute_md5};
use crate::error::ConfigServiceError;

#[derive(Default)]
pub struct MemoryConfigService {
    configs: DashMap<String, String>,
}

impl MemoryConfigService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store content directly, bypassing compare-and-swap
    pub fn put(&self, data_id: &str, group: &str, content: &str) {
        self.configs
            .insert(build_key(data_id, group), content.to_string());
    }

    /// Stored content, if any
    pub fn content(&self, data_id: &str, group: &str) -> Option<String> {
        self.configs
            .get(&build_key(data_id, group))
            .map(|c| c.value().clone())
    }
}

fn build_key(data_id: &str, group: &str) -> String {
    format!("{}+{}", data_id, group)
}

#[async_trait]
impl ConfigService for MemoryConfigService {
    async fn get_config(
        &self,
        data_id: &str,
        group: &str,
        _timeout: Duration,
    ) -> Result<Option<String>, ConfigServiceError> {
        Ok(self.content(data_id, group))
    }

    async fn publish_config(
        &self,
        data_id: &str,
        group: &str,
        content: &str,
        cas_md5: Option<&str>,
    ) -> Result<bool, ConfigServiceError> {
        let key = build_key(data_id, group);

        let Some(expected) = cas_md5 else {
            self.configs.insert(key, content.to_string());
            return Ok(true);
        };

        match self.configs.entry(key) {
            Entry::Occupied(mut entry) if compute_md5(entry.get()) == expected => {
                entry.insert(content.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
