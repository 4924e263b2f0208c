//! Flow (QPS / concurrency) rules

use chrono::{DateTime, Utc};
use flowguard_common::FLOW_DATA_ID_SUFFIX;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};

use super::{RuleEntity, int_enum, rule_metadata};

/// Origin a rule applies to when none is given
pub const DEFAULT_LIMIT_APP: &str = "default";

int_enum! {
    #[derive(Default)]
    pub enum FlowGrade {
        Thread = 0,
        #[default]
        Qps = 1,
    }
}

int_enum! {
    #[derive(Default)]
    pub enum FlowStrategy {
        #[default]
        Direct = 0,
        Relate = 1,
        Chain = 2,
    }
}

int_enum! {
    #[derive(Default)]
    pub enum ControlBehavior {
        #[default]
        Reject = 0,
        WarmUp = 1,
        RateLimiter = 2,
        WarmUpRateLimiter = 3,
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRuleEntity {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub id: Option<u64>,
    #[serde(default)]
    pub app: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub limit_app: String,
    #[serde(default)]
    pub grade: FlowGrade,
    #[serde(default)]
    pub count: f64,
    #[serde(default)]
    pub strategy: FlowStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_resource: Option<String>,
    #[serde(default)]
    pub control_behavior: ControlBehavior,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warm_up_period_sec: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queueing_time_ms: Option<u32>,
    #[serde(default)]
    pub cluster_mode: bool,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub gmt_create: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub gmt_modified: Option<DateTime<Utc>>,
}

impl FlowRuleEntity {
    /// QPS rule on `resource` with threshold `count`
    pub fn qps(app: &str, resource: &str, count: f64) -> Self {
        Self {
            app: app.to_string(),
            resource: resource.to_string(),
            grade: FlowGrade::Qps,
            count,
            ..Default::default()
        }
    }
}

/// Client-side flow rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRule {
    pub resource: String,
    pub limit_app: String,
    pub grade: FlowGrade,
    pub count: f64,
    pub strategy: FlowStrategy,
    pub ref_resource: Option<String>,
    pub control_behavior: ControlBehavior,
    pub warm_up_period_sec: Option<u32>,
    pub max_queueing_time_ms: Option<u32>,
    pub cluster_mode: bool,
}

impl RuleEntity for FlowRuleEntity {
    type Rule = FlowRule;

    const DATA_ID_SUFFIX: &'static str = FLOW_DATA_ID_SUFFIX;

    rule_metadata!();

    fn to_rule(&self) -> FlowRule {
        FlowRule {
            resource: self.resource.clone(),
            limit_app: self.limit_app.clone(),
            grade: self.grade,
            count: self.count,
            strategy: self.strategy,
            ref_resource: self.ref_resource.clone(),
            control_behavior: self.control_behavior,
            warm_up_period_sec: self.warm_up_period_sec,
            max_queueing_time_ms: self.max_queueing_time_ms,
            cluster_mode: self.cluster_mode,
        }
    }

    fn pre_save(&mut self) {
        if self.limit_app.trim().is_empty() {
            self.limit_app = DEFAULT_LIMIT_APP.to_string();
        }
    }
}
