//! Gateway API definitions

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use flowguard_common::GATEWAY_API_DATA_ID_SUFFIX;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};

use super::{RuleEntity, int_enum, rule_metadata};

int_enum! {
    /// How a predicate pattern is matched against a request path
    #[derive(Default)]
    pub enum MatchStrategy {
        #[default]
        Exact = 0,
        Prefix = 1,
        Regex = 2,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPredicateItemEntity {
    pub pattern: String,
    #[serde(default)]
    pub match_strategy: MatchStrategy,
}

impl ApiPredicateItemEntity {
    pub fn new(pattern: &str, match_strategy: MatchStrategy) -> Self {
        Self {
            pattern: pattern.to_string(),
            match_strategy,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDefinitionEntity {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub id: Option<u64>,
    #[serde(default)]
    pub app: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub gmt_create: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub gmt_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub api_name: String,
    #[serde(default)]
    pub predicate_items: Vec<ApiPredicateItemEntity>,
}

impl ApiDefinitionEntity {
    pub fn new(app: &str, api_name: &str, predicate_items: Vec<ApiPredicateItemEntity>) -> Self {
        Self {
            app: app.to_string(),
            api_name: api_name.to_string(),
            predicate_items,
            ..Default::default()
        }
    }

    /// Build an entity from a client-side definition
    pub fn from_api_definition(app: &str, ip: &str, port: u16, definition: &ApiDefinition) -> Self {
        Self {
            app: app.to_string(),
            ip: Some(ip.to_string()),
            port: Some(port),
            api_name: definition.api_name.clone(),
            predicate_items: definition
                .predicate_items
                .iter()
                .map(|item| ApiPredicateItemEntity::new(&item.pattern, item.match_strategy))
                .collect(),
            ..Default::default()
        }
    }
}

/// Client-side API definition: a named group of path predicates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDefinition {
    pub api_name: String,
    pub predicate_items: Vec<ApiPathPredicateItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPathPredicateItem {
    pub pattern: String,
    pub match_strategy: MatchStrategy,
}

impl RuleEntity for ApiDefinitionEntity {
    type Rule = ApiDefinition;

    const DATA_ID_SUFFIX: &'static str = GATEWAY_API_DATA_ID_SUFFIX;

    rule_metadata!();

    fn to_rule(&self) -> ApiDefinition {
        ApiDefinition {
            api_name: self.api_name.clone(),
            predicate_items: self
                .predicate_items
                .iter()
                .map(|item| ApiPathPredicateItem {
                    pattern: item.pattern.clone(),
                    match_strategy: item.match_strategy,
                })
                .collect(),
        }
    }

    /// Trim patterns, drop blank ones and keep the first of any duplicates.
    fn pre_save(&mut self) {
        let mut seen = HashSet::new();
        self.predicate_items = std::mem::take(&mut self.predicate_items)
            .into_iter()
            .filter_map(|mut item| {
                item.pattern = item.pattern.trim().to_string();
                if item.pattern.is_empty() || !seen.insert(item.clone()) {
                    None
                } else {
                    Some(item)
                }
            })
            .collect();
    }
}
