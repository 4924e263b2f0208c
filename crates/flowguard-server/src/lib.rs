//! Flowguard server bootstrap
//!
//! Loads settings, initializes logging, and wires the rule stores, lock and
//! queue services into an [`AppContext`](context::AppContext).

pub mod context;
pub mod settings;
pub mod startup;

pub use context::AppContext;
pub use settings::{Cli, IdSettings, LoggingSettings, Settings};
