//! Part registry - the authoritative store of part records and lifecycle state
//!
//! Every standard-cost mutation appends to the cost ledger on the same
//! connection, so when the caller runs inside one transaction the part row and
//! its audit row commit or roll back together.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::core::db::{datetime_col, decimal_col, opt_decimal_col, opt_decimal_param, ts};
use crate::core::error::{BomError, BomResult};
use crate::core::identity::{LifecycleEntryId, PartId};
use crate::engine::ledger::{require_reason, CostHistoryLedger};
use crate::engine::structure::{check_line_fit, StructureStore};
use crate::entities::history::{CostHistoryEntry, LifecycleChange};
use crate::entities::part::{
    validate_numeric, LifecycleStatus, NewPart, Part, PartPatch, PartType, QuantityBounds, Sku,
};

const PART_COLUMNS: &str = "id, sku, name, part_type, uom, purchase_uom, conversion_factor, \
    std_cost, baseline_cost, decimal_precision, lifecycle_status, min_quantity, max_quantity, \
    created, updated, author";

/// Filter for `list`
#[derive(Debug, Default, Clone)]
pub struct PartFilter {
    pub part_type: Option<PartType>,
    pub lifecycle: Option<LifecycleStatus>,
    /// Case-insensitive substring of SKU or name
    pub search: Option<String>,
    pub limit: Option<usize>,
}

fn part_from_row(row: &Row<'_>) -> rusqlite::Result<Part> {
    let sku: String = row.get("sku")?;
    let precision: i64 = row.get("decimal_precision")?;
    Ok(Part {
        id: row.get("id")?,
        // Stored SKUs were validated on the way in
        sku: Sku::try_from(sku).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?,
        name: row.get("name")?,
        part_type: row.get("part_type")?,
        uom: row.get("uom")?,
        purchase_uom: row.get("purchase_uom")?,
        conversion_factor: decimal_col(row, "conversion_factor")?,
        std_cost: opt_decimal_col(row, "std_cost")?,
        baseline_cost: opt_decimal_col(row, "baseline_cost")?,
        decimal_precision: precision as u32,
        lifecycle_status: row.get("lifecycle_status")?,
        bounds: QuantityBounds {
            min: opt_decimal_col(row, "min_quantity")?,
            max: opt_decimal_col(row, "max_quantity")?,
        },
        created: datetime_col(row, "created")?,
        updated: datetime_col(row, "updated")?,
        author: row.get("author")?,
    })
}

/// Look a part up by id on any connection
pub(crate) fn fetch_part(conn: &Connection, id: &PartId) -> BomResult<Option<Part>> {
    let part = conn
        .query_row(
            &format!("SELECT {} FROM parts WHERE id = ?1", PART_COLUMNS),
            params![id],
            part_from_row,
        )
        .optional()?;
    Ok(part)
}

/// Like `fetch_part`, failing with `PartNotFound`
pub(crate) fn load_part(conn: &Connection, id: &PartId) -> BomResult<Part> {
    fetch_part(conn, id)?.ok_or_else(|| BomError::part_not_found(id))
}

/// Registry view over a connection or open transaction
pub struct PartRegistry<'c> {
    conn: &'c Connection,
    author: &'c str,
}

impl<'c> PartRegistry<'c> {
    pub fn new(conn: &'c Connection, author: &'c str) -> Self {
        Self { conn, author }
    }

    fn ledger(&self) -> CostHistoryLedger<'c> {
        CostHistoryLedger::new(self.conn)
    }

    /// Create a part
    pub fn create(&self, new: NewPart) -> BomResult<Part> {
        let sku = Sku::parse(&new.sku)?;
        validate_numeric(
            new.conversion_factor,
            new.std_cost,
            new.decimal_precision,
            &new.bounds,
        )?;
        if self.find_by_sku(sku.as_str())?.is_some() {
            return Err(BomError::DuplicateSku(sku.to_string()));
        }

        let now = Utc::now();
        let author = if new.author.is_empty() {
            self.author.to_string()
        } else {
            new.author
        };
        let part = Part {
            id: PartId::new(),
            sku,
            name: new.name,
            part_type: new.part_type,
            purchase_uom: new.purchase_uom.unwrap_or_else(|| new.uom.clone()),
            uom: new.uom,
            conversion_factor: new.conversion_factor,
            std_cost: new.std_cost,
            baseline_cost: new.std_cost,
            decimal_precision: new.decimal_precision,
            lifecycle_status: LifecycleStatus::Active,
            bounds: new.bounds,
            created: now,
            updated: now,
            author,
        };

        self.conn.execute(
            &format!(
                "INSERT INTO parts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                PART_COLUMNS
            ),
            params![
                part.id,
                part.sku.as_str(),
                part.name,
                part.part_type,
                part.uom,
                part.purchase_uom,
                part.conversion_factor.to_string(),
                opt_decimal_param(part.std_cost),
                opt_decimal_param(part.baseline_cost),
                part.decimal_precision,
                part.lifecycle_status,
                opt_decimal_param(part.bounds.min),
                opt_decimal_param(part.bounds.max),
                ts(&part.created),
                ts(&part.updated),
                part.author,
            ],
        )?;
        info!(part = %part.id, sku = %part.sku, "part created");
        Ok(part)
    }

    /// Get a part or fail with `PartNotFound`
    pub fn get(&self, id: &PartId) -> BomResult<Part> {
        load_part(self.conn, id)
    }

    pub fn find(&self, id: &PartId) -> BomResult<Option<Part>> {
        fetch_part(self.conn, id)
    }

    pub fn find_by_sku(&self, sku: &str) -> BomResult<Option<Part>> {
        let part = self
            .conn
            .query_row(
                &format!("SELECT {} FROM parts WHERE sku = ?1", PART_COLUMNS),
                params![sku],
                part_from_row,
            )
            .optional()?;
        Ok(part)
    }

    /// Parts ordered by SKU
    pub fn list(&self, filter: &PartFilter) -> BomResult<Vec<Part>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM parts ORDER BY sku", PART_COLUMNS))?;
        let parts = stmt
            .query_map([], part_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let search = filter.search.as_ref().map(|s| s.to_lowercase());
        let mut out: Vec<Part> = parts
            .into_iter()
            .filter(|p| filter.part_type.map_or(true, |t| p.part_type == t))
            .filter(|p| filter.lifecycle.map_or(true, |s| p.lifecycle_status == s))
            .filter(|p| {
                search.as_ref().map_or(true, |s| {
                    p.sku.as_str().to_lowercase().contains(s) || p.name.to_lowercase().contains(s)
                })
            })
            .collect();
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    /// Whether any BOM line, active or not, references the part
    pub fn is_referenced(&self, id: &PartId) -> BomResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM bom_lines WHERE parent_part_id = ?1 OR child_part_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Apply a patch
    ///
    /// `reason` is required when the patch changes cost or lifecycle; it is
    /// recorded on the resulting audit rows. Unit, precision and bound changes
    /// must still fit every line that uses the part, retired lines included.
    pub fn update(&self, id: &PartId, patch: PartPatch, reason: &str) -> BomResult<Part> {
        let mut part = self.get(id)?;
        let old_cost = part.std_cost;

        if let Some(raw) = &patch.sku {
            let sku = Sku::parse(raw)?;
            if sku != part.sku {
                if self.is_referenced(id)? {
                    return Err(BomError::SkuLocked(*id));
                }
                if self.find_by_sku(sku.as_str())?.is_some() {
                    return Err(BomError::DuplicateSku(sku.to_string()));
                }
                part.sku = sku;
            }
        }
        if let Some(name) = patch.name {
            part.name = name;
        }
        if let Some(part_type) = patch.part_type {
            part.part_type = part_type;
        }
        if let Some(uom) = &patch.uom {
            part.uom = uom.clone();
        }
        if let Some(purchase_uom) = &patch.purchase_uom {
            part.purchase_uom = purchase_uom.clone();
        }
        if let Some(factor) = patch.conversion_factor {
            part.conversion_factor = factor;
        }
        if let Some(cost) = patch.std_cost {
            part.std_cost = Some(cost);
        }
        if let Some(precision) = patch.decimal_precision {
            part.decimal_precision = precision;
        }
        if let Some(min) = patch.min_quantity {
            part.bounds.min = min;
        }
        if let Some(max) = patch.max_quantity {
            part.bounds.max = max;
        }
        validate_numeric(
            part.conversion_factor,
            part.std_cost,
            part.decimal_precision,
            &part.bounds,
        )?;

        let usage_changed = patch.uom.is_some()
            || patch.purchase_uom.is_some()
            || patch.decimal_precision.is_some()
            || patch.min_quantity.is_some()
            || patch.max_quantity.is_some();
        if usage_changed {
            for line in StructureStore::new(self.conn).lines_using(id)? {
                check_line_fit(&part, line.qty_per, &line.uom)?;
            }
        }

        let cost_changed = patch.std_cost.is_some();
        let reason = if cost_changed || patch.lifecycle_status.is_some() {
            Some(require_reason(reason)?)
        } else {
            None
        };

        if let Some(status) = patch.lifecycle_status {
            let from = part.lifecycle_status;
            if from != status {
                if !from.is_forward_transition(status) {
                    return Err(BomError::InvalidTransition { from, to: status });
                }
                part.lifecycle_status = status;
                self.append_lifecycle(id, from, status, reason.as_deref().unwrap_or_default(), false)?;
            }
        }

        part.updated = Utc::now();
        self.write_row(&part)?;

        if let (true, Some(new_cost)) = (cost_changed, part.std_cost) {
            self.ledger().append(
                id,
                old_cost,
                new_cost,
                reason.as_deref().unwrap_or_default(),
                part.updated,
                self.author,
            )?;
        }
        debug!(part = %id, "part updated");
        Ok(part)
    }

    /// Change the standard cost and append the audit row
    pub fn set_cost(
        &self,
        id: &PartId,
        new_cost: Decimal,
        reason: &str,
        effective_date: DateTime<Utc>,
    ) -> BomResult<(Part, CostHistoryEntry)> {
        let reason = require_reason(reason)?;
        if new_cost < Decimal::ZERO {
            return Err(BomError::NegativeCost(new_cost));
        }
        let mut part = self.get(id)?;
        let old_cost = part.std_cost;
        part.std_cost = Some(new_cost);
        part.updated = Utc::now();
        self.write_row(&part)?;

        let entry = self
            .ledger()
            .append(id, old_cost, new_cost, &reason, effective_date, self.author)?;
        info!(part = %id, old = ?old_cost, new = %new_cost, "standard cost changed");
        Ok((part, entry))
    }

    /// Move a part along its lifecycle
    ///
    /// Forward moves need only a reason. Reverse moves also need
    /// `override_reason`; without one they fail with `InvalidTransition`.
    /// Setting the current status again is a no-op and writes nothing.
    pub fn set_lifecycle(
        &self,
        id: &PartId,
        to: LifecycleStatus,
        reason: &str,
        override_reason: Option<&str>,
    ) -> BomResult<Part> {
        let reason = require_reason(reason)?;
        let mut part = self.get(id)?;
        let from = part.lifecycle_status;
        if from == to {
            return Ok(part);
        }

        let (recorded_reason, overridden) = if from.is_forward_transition(to) {
            (reason, false)
        } else {
            let Some(override_reason) = override_reason else {
                return Err(BomError::InvalidTransition { from, to });
            };
            let override_reason = require_reason(override_reason)?;
            (format!("{} (override: {})", reason, override_reason), true)
        };

        part.lifecycle_status = to;
        part.updated = Utc::now();
        self.write_row(&part)?;
        self.append_lifecycle(id, from, to, &recorded_reason, overridden)?;
        info!(part = %id, %from, %to, overridden, "lifecycle changed");
        Ok(part)
    }

    /// Lifecycle changes, newest first
    pub fn lifecycle_history(
        &self,
        id: &PartId,
        limit: Option<usize>,
    ) -> BomResult<Vec<LifecycleChange>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = self.conn.prepare(
            "SELECT id, part_id, from_status, to_status, reason, overridden, changed, author
             FROM lifecycle_history
             WHERE part_id = ?1
             ORDER BY seq DESC
             LIMIT ?2",
        )?;
        let changes = stmt
            .query_map(params![id, limit], |row| {
                Ok(LifecycleChange {
                    id: row.get("id")?,
                    part_id: row.get("part_id")?,
                    from: row.get("from_status")?,
                    to: row.get("to_status")?,
                    reason: row.get("reason")?,
                    overridden: row.get("overridden")?,
                    changed: datetime_col(row, "changed")?,
                    author: row.get("author")?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(changes)
    }

    fn append_lifecycle(
        &self,
        id: &PartId,
        from: LifecycleStatus,
        to: LifecycleStatus,
        reason: &str,
        overridden: bool,
    ) -> BomResult<()> {
        self.conn.execute(
            "INSERT INTO lifecycle_history
                (id, part_id, from_status, to_status, reason, overridden, changed, author)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                LifecycleEntryId::new(),
                id,
                from,
                to,
                reason,
                overridden,
                ts(&Utc::now()),
                self.author,
            ],
        )?;
        Ok(())
    }

    fn write_row(&self, part: &Part) -> BomResult<()> {
        let changed = self.conn.execute(
            "UPDATE parts SET sku = ?2, name = ?3, part_type = ?4, uom = ?5, purchase_uom = ?6,
                conversion_factor = ?7, std_cost = ?8, decimal_precision = ?9,
                lifecycle_status = ?10, min_quantity = ?11, max_quantity = ?12, updated = ?13
             WHERE id = ?1",
            params![
                part.id,
                part.sku.as_str(),
                part.name,
                part.part_type,
                part.uom,
                part.purchase_uom,
                part.conversion_factor.to_string(),
                opt_decimal_param(part.std_cost),
                part.decimal_precision,
                part.lifecycle_status,
                opt_decimal_param(part.bounds.min),
                opt_decimal_param(part.bounds.max),
                ts(&part.updated),
            ],
        )?;
        if changed == 0 {
            return Err(BomError::part_not_found(&part.id));
        }
        Ok(())
    }
}
