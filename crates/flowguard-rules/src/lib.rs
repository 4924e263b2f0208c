//! Flowguard Rules - config-backed storage of flow-control rules
//!
//! This crate provides:
//! - The configuration service seam, with a Nacos client and an in-memory
//!   implementation
//! - Rule entities (gateway API definitions, flow rules, degrade rules)
//! - `DynamicRuleStore`, which persists the rule list of an application as
//!   one blob under a per-application distributed lock

pub mod config_service;
pub mod entity;
pub mod error;
pub mod store;

pub use config_service::{
    ConfigService, MemoryConfigService, NacosConfigClient, NacosSettings, compute_md5,
};
pub use entity::{
    ApiDefinition, ApiDefinitionEntity, ApiPathPredicateItem, ApiPredicateItemEntity,
    ControlBehavior, DegradeGrade, DegradeRule, DegradeRuleEntity, FlowGrade, FlowRule,
    FlowRuleEntity, FlowStrategy, MatchStrategy, RuleEntity,
};
pub use error::{ConfigServiceError, Result, RuleStoreError};
pub use store::{
    ApiDefinitionStore, DegradeRuleStore, DynamicRuleStore, FlowRuleStore, StoreSettings,
};
