//! Core module - identity, configuration, errors, storage and logging

pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod logging;

pub use config::Config;
pub use db::{Database, RetryPolicy};
pub use error::{BomError, BomResult, ErrorKind};
pub use identity::{CostEntryId, EntityPrefix, IdParseError, LifecycleEntryId, LineId, PartId};
