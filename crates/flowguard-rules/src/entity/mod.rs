//! Rule entities
//!
//! Each rule variant is stored as a JSON array under its own data-id
//! suffix. The wire format is camelCase; ids are accepted as numbers or
//! numeric strings and timestamps are epoch milliseconds.

mod degrade;
mod flow;
mod gateway;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use degrade::{DegradeGrade, DegradeRule, DegradeRuleEntity};
pub use flow::{ControlBehavior, FlowGrade, FlowRule, FlowRuleEntity, FlowStrategy};
pub use gateway::{ApiDefinition, ApiDefinitionEntity, ApiPathPredicateItem, ApiPredicateItemEntity, MatchStrategy};

/// A rule as persisted in the configuration service
pub trait RuleEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Rule model handed to flow-control clients
    type Rule;

    /// Appended to the application name to form the data id
    const DATA_ID_SUFFIX: &'static str;

    fn id(&self) -> Option<u64>;
    fn set_id(&mut self, id: u64);
    fn app(&self) -> &str;
    fn gmt_create(&self) -> Option<DateTime<Utc>>;
    fn set_gmt_create(&mut self, at: DateTime<Utc>);
    fn gmt_modified(&self) -> Option<DateTime<Utc>>;
    fn set_gmt_modified(&mut self, at: DateTime<Utc>);

    fn to_rule(&self) -> Self::Rule;

    /// Normalization applied before a new rule is saved
    fn pre_save(&mut self) {}
}

/// Current time at the millisecond precision timestamps are stored with
pub(crate) fn now_millis() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap_or_else(Utc::now)
}

/// Enum carried on the wire as its integer discriminant
macro_rules! int_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(try_from = "i32", into = "i32")]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl From<$name> for i32 {
            fn from(value: $name) -> i32 {
                value as i32
            }
        }

        impl TryFrom<i32> for $name {
            type Error = String;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(format!("invalid {} value {}", stringify!($name), other)),
                }
            }
        }
    };
}

/// Accessors shared by every entity: `id`, `app`, `gmt_create`, `gmt_modified`
macro_rules! rule_metadata {
    () => {
        fn id(&self) -> Option<u64> {
            self.id
        }

        fn set_id(&mut self, id: u64) {
            self.id = Some(id);
        }

        fn app(&self) -> &str {
            &self.app
        }

        fn gmt_create(&self) -> Option<chrono::DateTime<chrono::Utc>> {
            self.gmt_create
        }

        fn set_gmt_create(&mut self, at: chrono::DateTime<chrono::Utc>) {
            self.gmt_create = Some(at);
        }

        fn gmt_modified(&self) -> Option<chrono::DateTime<chrono::Utc>> {
            self.gmt_modified
        }

        fn set_gmt_modified(&mut self, at: chrono::DateTime<chrono::Utc>) {
            self.gmt_modified = Some(at);
        }
    };
}

pub(crate) use {int_enum, rule_metadata};
