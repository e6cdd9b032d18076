//! BOM line - a directed parent → child edge with quantity metadata

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::error::{BomError, BomResult};
use crate::core::identity::{LineId, PartId};

/// One hundred percent, the exclusive upper bound for scrap
const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// A stored BOM line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomLine {
    pub id: LineId,
    pub parent_part_id: PartId,
    pub child_part_id: PartId,

    /// Quantity of child per one unit of parent
    pub qty_per: Decimal,

    /// Unit the quantity is expressed in (child's usage or purchase unit)
    pub uom: String,

    /// Expected loss on top of the nominal quantity, in percent
    pub scrap_pct: Decimal,

    pub sort_order: i64,

    pub is_active: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Recorded when the line was allowed onto an OBSOLETE/DISCONTINUED child
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<String>,

    pub created: DateTime<Utc>,

    pub updated: DateTime<Utc>,
}

impl BomLine {
    /// `1 + scrap_pct / 100`
    pub fn scrap_factor(&self) -> Decimal {
        Decimal::ONE + self.scrap_pct / HUNDRED
    }
}

/// Input for adding a line
#[derive(Debug, Clone)]
pub struct NewLine {
    pub parent_id: PartId,
    pub child_id: PartId,
    pub qty_per: Decimal,
    pub scrap_pct: Decimal,
    pub uom: String,
    /// Appended after existing lines when `None`
    pub sort_order: Option<i64>,
    pub notes: Option<String>,
    /// Allows OBSOLETE/DISCONTINUED children; stored on the line
    pub override_reason: Option<String>,
}

impl NewLine {
    pub fn new(
        parent_id: PartId,
        child_id: PartId,
        qty_per: Decimal,
        scrap_pct: Decimal,
        uom: impl Into<String>,
    ) -> Self {
        Self {
            parent_id,
            child_id,
            qty_per,
            scrap_pct,
            uom: uom.into(),
            sort_order: None,
            notes: None,
            override_reason: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_sort_order(mut self, sort_order: i64) -> Self {
        self.sort_order = Some(sort_order);
        self
    }

    /// Admit an OBSOLETE/DISCONTINUED child, recording why
    pub fn allow_obsolete(mut self, reason: impl Into<String>) -> Self {
        self.override_reason = Some(reason.into());
        self
    }
}

/// Editable line fields; parent/child are changed with `move_line`
#[derive(Debug, Clone, Default)]
pub struct LinePatch {
    pub qty_per: Option<Decimal>,
    pub scrap_pct: Option<Decimal>,
    pub uom: Option<String>,
    pub sort_order: Option<i64>,
    /// `Some(None)` clears the notes
    pub notes: Option<Option<String>>,
}

impl LinePatch {
    pub fn is_empty(&self) -> bool {
        self.qty_per.is_none()
            && self.scrap_pct.is_none()
            && self.uom.is_none()
            && self.sort_order.is_none()
            && self.notes.is_none()
    }
}

/// qtyPer must be positive
pub fn validate_qty(qty: Decimal) -> BomResult<()> {
    if qty <= Decimal::ZERO {
        return Err(BomError::InvalidQuantity(qty));
    }
    Ok(())
}

/// scrap must be in `[0, 100)`
pub fn validate_scrap(scrap: Decimal) -> BomResult<()> {
    if scrap < Decimal::ZERO || scrap >= HUNDRED {
        return Err(BomError::InvalidScrap(scrap));
    }
    Ok(())
}
