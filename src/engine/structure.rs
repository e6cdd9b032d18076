//! Structure store - BOM lines as a flat edge relation
//!
//! Lines are soft-deleted: deactivation clears `is_active` and keeps the row so
//! historical roll-ups can still see it. Only active lines count as structure
//! for the cycle guard, so a retired line never blocks its reverse. Every
//! mutating call runs its checks and its write on the connection it was given;
//! callers pass an IMMEDIATE transaction so nothing is written on failure.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::core::db::{datetime_col, decimal_col, ts};
use crate::core::error::{BomError, BomResult};
use crate::core::identity::{LineId, PartId};
use crate::engine::cycle::{Ancestry, CycleGuard};
use crate::engine::ledger::require_reason;
use crate::engine::registry::load_part;
use crate::entities::line::{validate_qty, validate_scrap, BomLine, LinePatch, NewLine};
use crate::entities::part::Part;

const LINE_COLUMNS: &str = "id, parent_part_id, child_part_id, qty_per, uom, scrap_pct, \
    sort_order, is_active, notes, override_reason, created, updated";

/// Gap between consecutive default sort positions
const SORT_STEP: i64 = 10;

fn line_from_row(row: &Row<'_>) -> rusqlite::Result<BomLine> {
    Ok(BomLine {
        id: row.get("id")?,
        parent_part_id: row.get("parent_part_id")?,
        child_part_id: row.get("child_part_id")?,
        qty_per: decimal_col(row, "qty_per")?,
        uom: row.get("uom")?,
        scrap_pct: decimal_col(row, "scrap_pct")?,
        sort_order: row.get("sort_order")?,
        is_active: row.get("is_active")?,
        notes: row.get("notes")?,
        override_reason: row.get("override_reason")?,
        created: datetime_col(row, "created")?,
        updated: datetime_col(row, "updated")?,
    })
}

/// Line store over a connection or open transaction
pub struct StructureStore<'c> {
    conn: &'c Connection,
}

/// Active edges, as seen by the cycle guard
pub struct StoreAncestry<'c> {
    conn: &'c Connection,
}

impl<'c> StoreAncestry<'c> {
    fn ids(&self, sql: &str, part: &PartId) -> BomResult<Vec<PartId>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let ids = stmt
            .query_map(params![part], |row| row.get(0))?
            .collect::<Result<Vec<PartId>, _>>()?;
        Ok(ids)
    }
}

impl Ancestry for StoreAncestry<'_> {
    fn parent_ids(&self, part: &PartId) -> BomResult<Vec<PartId>> {
        self.ids(
            "SELECT DISTINCT parent_part_id FROM bom_lines WHERE child_part_id = ?1 AND is_active = 1",
            part,
        )
    }

    fn child_ids(&self, part: &PartId) -> BomResult<Vec<PartId>> {
        self.ids(
            "SELECT DISTINCT child_part_id FROM bom_lines WHERE parent_part_id = ?1 AND is_active = 1",
            part,
        )
    }
}

impl<'c> StructureStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Edge view over active lines
    pub fn ancestry(&self) -> StoreAncestry<'c> {
        StoreAncestry { conn: self.conn }
    }

    /// Add a line after validating quantities, units, bounds, lifecycle and acyclicity
    pub fn add_line(&self, new: &NewLine) -> BomResult<BomLine> {
        validate_qty(new.qty_per)?;
        validate_scrap(new.scrap_pct)?;
        if new.parent_id == new.child_id {
            return Err(BomError::SelfReference(new.parent_id));
        }

        load_part(self.conn, &new.parent_id)?;
        let child = load_part(self.conn, &new.child_id)?;
        let override_reason =
            check_usage(&child, new.qty_per, &new.uom, new.override_reason.as_deref())?;

        if self.active_line_between(&new.parent_id, &new.child_id)?.is_some() {
            return Err(BomError::DuplicateLine {
                parent: new.parent_id,
                child: new.child_id,
            });
        }
        CycleGuard::new(&self.ancestry()).check_edge(&new.parent_id, &new.child_id)?;

        let sort_order = match new.sort_order {
            Some(order) => order,
            None => self.next_sort_order(&new.parent_id)?,
        };
        let now = Utc::now();
        let line = BomLine {
            id: LineId::new(),
            parent_part_id: new.parent_id,
            child_part_id: new.child_id,
            qty_per: new.qty_per,
            uom: new.uom.clone(),
            scrap_pct: new.scrap_pct,
            sort_order,
            is_active: true,
            notes: new.notes.clone(),
            override_reason,
            created: now,
            updated: now,
        };
        self.insert(&line)?;
        if let Some(reason) = &line.override_reason {
            info!(line = %line.id, child = %line.child_part_id, %reason, "line added to retired part");
        }
        info!(line = %line.id, parent = %line.parent_part_id, child = %line.child_part_id, "line added");
        Ok(line)
    }

    pub fn get_line(&self, id: &LineId) -> BomResult<BomLine> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM bom_lines WHERE id = ?1", LINE_COLUMNS),
                params![id],
                line_from_row,
            )
            .optional()?
            .ok_or(BomError::LineNotFound(*id))
    }

    /// Change quantity, scrap, unit, position or notes of an active line
    pub fn update_line(&self, id: &LineId, patch: &LinePatch) -> BomResult<BomLine> {
        let mut line = self.active_line(id)?;

        if let Some(qty) = patch.qty_per {
            validate_qty(qty)?;
            line.qty_per = qty;
        }
        if let Some(scrap) = patch.scrap_pct {
            validate_scrap(scrap)?;
            line.scrap_pct = scrap;
        }
        if let Some(uom) = &patch.uom {
            line.uom = uom.clone();
        }
        if let Some(order) = patch.sort_order {
            line.sort_order = order;
        }
        if let Some(notes) = &patch.notes {
            line.notes = notes.clone();
        }

        if patch.qty_per.is_some() || patch.uom.is_some() {
            let child = load_part(self.conn, &line.child_part_id)?;
            check_line_fit(&child, line.qty_per, &line.uom)?;
        }

        line.updated = Utc::now();
        self.conn.execute(
            "UPDATE bom_lines SET qty_per = ?2, uom = ?3, scrap_pct = ?4, sort_order = ?5,
                notes = ?6, updated = ?7
             WHERE id = ?1",
            params![
                line.id,
                line.qty_per.to_string(),
                line.uom,
                line.scrap_pct.to_string(),
                line.sort_order,
                line.notes,
                ts(&line.updated),
            ],
        )?;
        debug!(line = %id, "line updated");
        Ok(line)
    }

    /// Re-parent an active line, keeping its child and quantities
    pub fn move_line(&self, id: &LineId, new_parent: &PartId) -> BomResult<BomLine> {
        let mut line = self.active_line(id)?;
        if line.parent_part_id == *new_parent {
            return Ok(line);
        }
        if *new_parent == line.child_part_id {
            return Err(BomError::SelfReference(*new_parent));
        }

        load_part(self.conn, new_parent)?;
        let child = load_part(self.conn, &line.child_part_id)?;
        if child.lifecycle_status.blocks_new_usage() && line.override_reason.is_none() {
            return Err(BomError::ObsoletePart {
                part: child.id,
                status: child.lifecycle_status,
            });
        }
        if self.active_line_between(new_parent, &line.child_part_id)?.is_some() {
            return Err(BomError::DuplicateLine {
                parent: *new_parent,
                child: line.child_part_id,
            });
        }
        CycleGuard::new(&self.ancestry()).check_edge(new_parent, &line.child_part_id)?;

        let from = line.parent_part_id;
        line.parent_part_id = *new_parent;
        line.sort_order = self.next_sort_order(new_parent)?;
        line.updated = Utc::now();
        self.conn.execute(
            "UPDATE bom_lines SET parent_part_id = ?2, sort_order = ?3, updated = ?4 WHERE id = ?1",
            params![line.id, line.parent_part_id, line.sort_order, ts(&line.updated)],
        )?;
        info!(line = %id, %from, to = %new_parent, "line moved");
        Ok(line)
    }

    /// Soft-delete a line
    pub fn deactivate_line(&self, id: &LineId) -> BomResult<BomLine> {
        let mut line = self.active_line(id)?;
        line.is_active = false;
        line.updated = Utc::now();
        self.conn.execute(
            "UPDATE bom_lines SET is_active = 0, updated = ?2 WHERE id = ?1",
            params![line.id, ts(&line.updated)],
        )?;
        info!(line = %id, "line deactivated");
        Ok(line)
    }

    /// Lines under `part` in display order
    pub fn children_of(&self, part: &PartId, include_inactive: bool) -> BomResult<Vec<BomLine>> {
        load_part(self.conn, part)?;
        self.lines_where("parent_part_id", part, include_inactive)
    }

    /// Active lines that use `part` as their child
    pub fn parents_of(&self, part: &PartId) -> BomResult<Vec<BomLine>> {
        load_part(self.conn, part)?;
        self.lines_where("child_part_id", part, false)
    }

    /// Every line that uses `part` as its child, inactive ones included
    pub(crate) fn lines_using(&self, part: &PartId) -> BomResult<Vec<BomLine>> {
        self.lines_where("child_part_id", part, true)
    }

    /// The active line `parent → child`, if any
    pub fn active_line_between(&self, parent: &PartId, child: &PartId) -> BomResult<Option<BomLine>> {
        let line = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM bom_lines
                     WHERE parent_part_id = ?1 AND child_part_id = ?2 AND is_active = 1",
                    LINE_COLUMNS
                ),
                params![parent, child],
                line_from_row,
            )
            .optional()?;
        Ok(line)
    }

    /// Sort position after the last line of `parent`
    pub(crate) fn next_sort_order(&self, parent: &PartId) -> BomResult<i64> {
        let max: Option<i64> = self.conn.query_row(
            "SELECT MAX(sort_order) FROM bom_lines WHERE parent_part_id = ?1",
            params![parent],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0) + SORT_STEP)
    }

    /// Write a fully validated line
    pub(crate) fn insert(&self, line: &BomLine) -> BomResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO bom_lines ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                LINE_COLUMNS
            ),
            params![
                line.id,
                line.parent_part_id,
                line.child_part_id,
                line.qty_per.to_string(),
                line.uom,
                line.scrap_pct.to_string(),
                line.sort_order,
                line.is_active,
                line.notes,
                line.override_reason,
                ts(&line.created),
                ts(&line.updated),
            ],
        )?;
        Ok(())
    }

    fn active_line(&self, id: &LineId) -> BomResult<BomLine> {
        let line = self.get_line(id)?;
        if !line.is_active {
            return Err(BomError::LineInactive(*id));
        }
        Ok(line)
    }

    fn lines_where(&self, column: &str, part: &PartId, include_inactive: bool) -> BomResult<Vec<BomLine>> {
        let filter = if include_inactive { "" } else { " AND is_active = 1" };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM bom_lines WHERE {} = ?1{} ORDER BY sort_order, id",
            LINE_COLUMNS, column, filter
        ))?;
        let lines = stmt
            .query_map(params![part], line_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines)
    }
}

/// Line unit must be the child's usage or purchase unit
pub(crate) fn check_unit(child: &Part, uom: &str) -> BomResult<()> {
    if child.accepts_uom(uom) {
        Ok(())
    } else {
        Err(BomError::UnitMismatch {
            part: child.id,
            uom: uom.to_string(),
            usage: child.uom.clone(),
            purchase: child.purchase_uom.clone(),
        })
    }
}

/// Unit, precision and bounds checks for `qty` of `child` in `uom`
///
/// A quantity that rounds to zero at the child's precision would roll up as
/// nothing, so it is refused like a zero quantity.
pub(crate) fn check_line_fit(child: &Part, qty: Decimal, uom: &str) -> BomResult<()> {
    check_unit(child, uom)?;
    if child.round_quantity(qty) <= Decimal::ZERO {
        return Err(BomError::InvalidQuantity(qty));
    }
    child.check_quantity(qty)
}

/// Line checks plus the lifecycle gate for a new use of `child`
///
/// Returns the trimmed override reason when a retired child was let through.
pub(crate) fn check_usage(
    child: &Part,
    qty: Decimal,
    uom: &str,
    override_reason: Option<&str>,
) -> BomResult<Option<String>> {
    check_line_fit(child, qty, uom)?;
    if !child.lifecycle_status.blocks_new_usage() {
        return Ok(None);
    }
    match override_reason {
        Some(reason) => Ok(Some(require_reason(reason)?)),
        None => Err(BomError::ObsoletePart {
            part: child.id,
            status: child.lifecycle_status,
        }),
    }
}
