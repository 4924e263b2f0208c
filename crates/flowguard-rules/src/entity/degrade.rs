//! Degrade (circuit breaking) rules

use chrono::{DateTime, Utc};
use flowguard_common::DEGRADE_DATA_ID_SUFFIX;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};

use super::{RuleEntity, int_enum, rule_metadata};

int_enum! {
    /// What trips the breaker
    #[derive(Default)]
    pub enum DegradeGrade {
        #[default]
        SlowRequestRatio = 0,
        ExceptionRatio = 1,
        ExceptionCount = 2,
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradeRuleEntity {
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
    pub grade: DegradeGrade,
    /// Slow-call threshold in ms, or the exception ratio/count
    #[serde(default)]
    pub count: f64,
    /// Seconds the breaker stays open
    #[serde(default)]
    pub time_window: u32,
    #[serde(default)]
    pub min_request_amount: u32,
    #[serde(default)]
    pub slow_ratio_threshold: f64,
    #[serde(default)]
    pub stat_interval_ms: u32,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub gmt_create: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub gmt_modified: Option<DateTime<Utc>>,
}

/// Client-side degrade rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradeRule {
    pub resource: String,
    pub limit_app: String,
    pub grade: DegradeGrade,
    pub count: f64,
    pub time_window: u32,
    pub min_request_amount: u32,
    pub slow_ratio_threshold: f64,
    pub stat_interval_ms: u32,
}

impl RuleEntity for DegradeRuleEntity {
    type Rule = DegradeRule;

    const DATA_ID_SUFFIX: &'static str = DEGRADE_DATA_ID_SUFFIX;

    rule_metadata!();

    fn to_rule(&self) -> DegradeRule {
        DegradeRule {
            resource: self.resource.clone(),
            limit_app: self.limit_app.clone(),
            grade: self.grade,
            count: self.count,
            time_window: self.time_window,
            min_request_amount: self.min_request_amount,
            slow_ratio_threshold: self.slow_ratio_threshold,
            stat_interval_ms: self.stat_interval_ms,
        }
    }
}
