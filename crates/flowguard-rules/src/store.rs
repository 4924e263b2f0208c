//! Config-backed rule store
//!
//! All rules of one variant for one application are a single JSON array in
//! the configuration service. Every write reads the whole array, edits it
//! and publishes it back. Writers for the same application are serialized
//! by a distributed lock, and the publish carries the MD5 of what was read
//! so a writer that bypasses the lock cannot silently overwrite.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use flowguard_cache::{CacheError, DistributedLocker, LockHandle, LockRequest};
use flowguard_common::{CONFIG_READ_TIMEOUT_MS, DEFAULT_GROUP, IdGenerator, is_valid, rule_data_id};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config_service::{ConfigService, compute_md5};
use crate::entity::{
    ApiDefinitionEntity, DegradeRuleEntity, FlowRuleEntity, RuleEntity, now_millis,
};
use crate::error::{Result, RuleStoreError};

pub const DEFAULT_LOCK_PREFIX: &str = "flowguard:rule-lock";
pub const DEFAULT_LOCK_WAIT_MS: u64 = 10000;

/// Locking behavior of rule stores
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Prefix of the per-application lock keys
    pub lock_prefix: String,
    /// How long a write waits for the application lock, in milliseconds
    pub lock_wait_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            lock_prefix: DEFAULT_LOCK_PREFIX.to_string(),
            lock_wait_ms: DEFAULT_LOCK_WAIT_MS,
        }
    }
}

impl StoreSettings {
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }
}

/// Rules as read, with the MD5 of the content they were parsed from
struct Snapshot<T> {
    rules: Vec<T>,
    md5: Option<String>,
}

/// Store for one rule variant, fixed by the type parameter
#[derive(Clone)]
pub struct DynamicRuleStore<T: RuleEntity> {
    config_service: Arc<dyn ConfigService>,
    id_generator: Arc<IdGenerator>,
    locker: DistributedLocker,
    settings: StoreSettings,
    group: String,
    read_timeout: Duration,
    _entity: PhantomData<fn() -> T>,
}

pub type FlowRuleStore = DynamicRuleStore<FlowRuleEntity>;
pub type DegradeRuleStore = DynamicRuleStore<DegradeRuleEntity>;
pub type ApiDefinitionStore = DynamicRuleStore<ApiDefinitionEntity>;

impl<T: RuleEntity> DynamicRuleStore<T> {
    pub fn new(
        config_service: Arc<dyn ConfigService>,
        id_generator: Arc<IdGenerator>,
        locker: DistributedLocker,
    ) -> Self {
        Self {
            config_service,
            id_generator,
            locker,
            settings: StoreSettings::default(),
            group: DEFAULT_GROUP.to_string(),
            read_timeout: Duration::from_millis(CONFIG_READ_TIMEOUT_MS),
            _entity: PhantomData,
        }
    }

    pub fn with_settings(mut self, settings: StoreSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Configuration group rules are published under
    pub fn with_group(mut self, group: &str) -> Self {
        self.group = group.to_string();
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Configuration key of the rule list of `app`
    pub fn data_id(&self, app: &str) -> String {
        rule_data_id(app, T::DATA_ID_SUFFIX)
    }

    /// Lock key serializing writes to the rule list of `app`
    pub fn lock_key(&self, app: &str) -> String {
        format!("{}:{}", self.settings.lock_prefix, self.data_id(app))
    }

    /// All rules of `app`, highest id first. A missing or blank config is
    /// an empty list.
    pub async fn list(&self, app: &str) -> Result<Vec<T>> {
        Ok(self.read(app).await?.rules)
    }

    /// Rules of `app` in the form handed to flow-control clients
    pub async fn list_rules(&self, app: &str) -> Result<Vec<T::Rule>> {
        Ok(self
            .list(app)
            .await?
            .iter()
            .map(RuleEntity::to_rule)
            .collect())
    }

    pub async fn find_by_id(&self, app: &str, id: u64) -> Result<Option<T>> {
        Ok(self
            .list(app)
            .await?
            .into_iter()
            .find(|rule| rule.id() == Some(id)))
    }

    /// Append a new rule, assigning an id if it has none. An explicit id
    /// already present in the list is rejected with
    /// [`RuleStoreError::DuplicateId`]. Returns the rule as persisted.
    pub async fn save(&self, mut rule: T) -> Result<T> {
        let app = validated_app(rule.app())?;

        if rule.id().is_none() {
            rule.set_id(self.id_generator.next_id()?);
        }
        rule.pre_save();

        let now = now_millis();
        if rule.gmt_create().is_none() {
            rule.set_gmt_create(now);
        }
        rule.set_gmt_modified(now);

        self.with_app_lock(&app, async {
            let Snapshot { mut rules, md5 } = self.read(&app).await?;
            if let Some(id) = rule.id()
                && rules.iter().any(|existing| existing.id() == Some(id))
            {
                return Err(RuleStoreError::DuplicateId {
                    data_id: self.data_id(&app),
                    id,
                });
            }
            rules.push(rule.clone());
            self.publish(&app, &rules, md5).await
        })
        .await?;

        info!(app = %app, id = ?rule.id(), data_id = %self.data_id(&app), "Rule saved");
        Ok(rule)
    }

    /// Replace the rule with the same id. A rule whose id is not present
    /// is appended.
    pub async fn update(&self, mut rule: T) -> Result<T> {
        let app = validated_app(rule.app())?;
        let id = rule
            .id()
            .ok_or_else(|| RuleStoreError::InvalidRule("rule id is required".to_string()))?;

        rule.set_gmt_modified(now_millis());

        self.with_app_lock(&app, async {
            let Snapshot { mut rules, md5 } = self.read(&app).await?;
            rules.retain(|existing| existing.id() != Some(id));
            rules.push(rule.clone());
            self.publish(&app, &rules, md5).await
        })
        .await?;

        info!(app = %app, id, data_id = %self.data_id(&app), "Rule updated");
        Ok(rule)
    }

    /// Remove the rule with `id`. The remaining list is published even
    /// when empty. Returns whether a rule was removed.
    pub async fn delete(&self, app: &str, id: u64) -> Result<bool> {
        let app = validated_app(app)?;

        let removed = self
            .with_app_lock(&app, async {
                let Snapshot { mut rules, md5 } = self.read(&app).await?;
                let before = rules.len();
                rules.retain(|existing| existing.id() != Some(id));
                let removed = rules.len() < before;
                self.publish(&app, &rules, md5).await?;
                Ok(removed)
            })
            .await?;

        info!(app = %app, id, removed, data_id = %self.data_id(&app), "Rule deleted");
        Ok(removed)
    }

    async fn read(&self, app: &str) -> Result<Snapshot<T>> {
        let data_id = self.data_id(app);
        let Some(content) = self
            .config_service
            .get_config(&data_id, &self.group, self.read_timeout)
            .await?
        else {
            debug!(data_id = %data_id, "No rules published yet");
            return Ok(Snapshot {
                rules: Vec::new(),
                md5: None,
            });
        };

        let md5 = Some(compute_md5(&content));
        if content.trim().is_empty() {
            return Ok(Snapshot {
                rules: Vec::new(),
                md5,
            });
        }

        let mut rules: Vec<T> = serde_json::from_str::<Option<Vec<T>>>(&content)?.unwrap_or_default();
        rules.sort_by(|a, b| b.id().cmp(&a.id()));

        debug!(data_id = %data_id, count = rules.len(), "Rules loaded");
        Ok(Snapshot { rules, md5 })
    }

    async fn publish(&self, app: &str, rules: &[T], cas_md5: Option<String>) -> Result<()> {
        let data_id = self.data_id(app);
        let content = serde_json::to_string(rules)?;

        let published = self
            .config_service
            .publish_config(&data_id, &self.group, &content, cas_md5.as_deref())
            .await
            .inspect_err(|e| error!(data_id = %data_id, error = %e, "Rule publish failed"))?;

        if !published {
            warn!(data_id = %data_id, "Rule publish rejected by compare-and-swap");
            return Err(RuleStoreError::PublishRejected { data_id });
        }
        Ok(())
    }

    /// Run `work` holding the write lock of `app`. The lock is released on
    /// every exit path, including the caller dropping this future.
    async fn with_app_lock<R>(
        &self,
        app: &str,
        work: impl Future<Output = Result<R>>,
    ) -> Result<R> {
        let key = self.lock_key(app);
        let handle = self
            .locker
            .try_lock(LockRequest::new(&key), self.settings.lock_wait())
            .await?
            .ok_or_else(|| {
                warn!(key = %key, wait_ms = self.settings.lock_wait_ms, "Rule lock wait elapsed");
                CacheError::LockTimeout { key: key.clone() }
            })?;

        let lock = AppLock {
            locker: self.locker.clone(),
            handle: Some(handle),
        };
        let result = work.await;
        lock.release().await;
        result
    }
}

/// Held write lock of one application. If it is dropped before
/// [`release`](Self::release) completes, the unlock runs in a spawned task.
struct AppLock {
    locker: DistributedLocker,
    handle: Option<LockHandle>,
}

impl AppLock {
    async fn release(mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let key = handle.key().to_string();
        let locker = self.locker.clone();

        // Spawned so the unlock finishes even if this future is dropped
        match tokio::spawn(async move { locker.unlock(handle).await }).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(key = %key, error = %e, "Failed to release rule lock"),
            Err(e) => warn!(key = %key, error = %e, "Rule lock release task failed"),
        }
    }
}

impl Drop for AppLock {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let key = handle.key().to_string();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(key = %key, "Rule write abandoned, releasing lock");
                let locker = self.locker.clone();
                runtime.spawn(async move {
                    if let Err(e) = locker.unlock(handle).await {
                        warn!(key = %key, error = %e, "Failed to release abandoned rule lock");
                    }
                });
            }
            Err(_) => {
                warn!(key = %key, "No runtime to release abandoned rule lock, it expires with its lease");
            }
        }
    }
}

fn validated_app(app: &str) -> Result<String> {
    let app = app.trim();
    if app.is_empty() {
        return Err(RuleStoreError::InvalidRule(
            "app name cannot be empty".to_string(),
        ));
    }
    if !is_valid(app) {
        return Err(RuleStoreError::InvalidRule(format!(
            "app name '{app}' may only contain letters, digits, '_', '.', ':' and '-'"
        )));
    }
    Ok(app.to_string())
}
