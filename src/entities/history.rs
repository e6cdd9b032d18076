//! Audit records - cost changes and lifecycle changes
//!
//! Both are append-only: once written they are never updated or deleted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::identity::{CostEntryId, LifecycleEntryId, PartId};
use crate::entities::part::LifecycleStatus;

/// One standard-cost change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostHistoryEntry {
    pub id: CostEntryId,
    pub part_id: PartId,

    /// Cost before the change (`None` if the part was unpriced)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_cost: Option<Decimal>,

    pub new_cost: Decimal,

    pub change_reason: String,

    /// When the new cost takes effect
    pub effective_date: DateTime<Utc>,

    /// When the row was written
    pub recorded: DateTime<Utc>,

    pub author: String,
}

/// One lifecycle transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleChange {
    pub id: LifecycleEntryId,
    pub part_id: PartId,
    pub from: LifecycleStatus,
    pub to: LifecycleStatus,
    pub reason: String,

    /// Set when a reverse transition was forced
    #[serde(default)]
    pub overridden: bool,

    pub changed: DateTime<Utc>,

    pub author: String,
}
