//! Cost history ledger - append-only audit trail of standard-cost changes
//!
//! Rows are written only through `append`; the table carries triggers that abort
//! any UPDATE or DELETE, so history cannot be rewritten even by hand-written SQL.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::debug;

use crate::core::db::{datetime_col, decimal_col, opt_decimal_col, opt_decimal_param, ts};
use crate::core::error::{BomError, BomResult};
use crate::core::identity::{CostEntryId, PartId};
use crate::entities::history::CostHistoryEntry;

/// Ledger view over a connection or open transaction
pub struct CostHistoryLedger<'c> {
    conn: &'c Connection,
}

/// Trimmed, non-empty reason text
pub(crate) fn require_reason(reason: &str) -> BomResult<String> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(BomError::EmptyReason);
    }
    Ok(trimmed.to_string())
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<CostHistoryEntry> {
    Ok(CostHistoryEntry {
        id: row.get("id")?,
        part_id: row.get("part_id")?,
        old_cost: opt_decimal_col(row, "old_cost")?,
        new_cost: decimal_col(row, "new_cost")?,
        change_reason: row.get("change_reason")?,
        effective_date: datetime_col(row, "effective_date")?,
        recorded: datetime_col(row, "recorded")?,
        author: row.get("author")?,
    })
}

impl<'c> CostHistoryLedger<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Append one entry
    pub fn append(
        &self,
        part_id: &PartId,
        old_cost: Option<Decimal>,
        new_cost: Decimal,
        reason: &str,
        effective_date: DateTime<Utc>,
        author: &str,
    ) -> BomResult<CostHistoryEntry> {
        let change_reason = require_reason(reason)?;
        let entry = CostHistoryEntry {
            id: CostEntryId::new(),
            part_id: *part_id,
            old_cost,
            new_cost,
            change_reason,
            effective_date,
            recorded: Utc::now(),
            author: author.to_string(),
        };

        self.conn.execute(
            "INSERT INTO cost_history
                (id, part_id, old_cost, new_cost, change_reason, effective_date, recorded, author)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id,
                entry.part_id,
                opt_decimal_param(entry.old_cost),
                entry.new_cost.to_string(),
                entry.change_reason,
                ts(&entry.effective_date),
                ts(&entry.recorded),
                entry.author,
            ],
        )?;
        debug!(part = %part_id, new_cost = %new_cost, "cost history appended");
        Ok(entry)
    }

    /// Newest first (by effective date, then write order); `None` returns all
    pub fn history_of(
        &self,
        part_id: &PartId,
        limit: Option<usize>,
    ) -> BomResult<Vec<CostHistoryEntry>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = self.conn.prepare(
            "SELECT id, part_id, old_cost, new_cost, change_reason, effective_date, recorded, author
             FROM cost_history
             WHERE part_id = ?1
             ORDER BY effective_date DESC, seq DESC
             LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![part_id, limit], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Cost in effect at `date`: the latest entry effective on or before it,
    /// else the part's creation baseline
    pub fn cost_as_of(&self, part_id: &PartId, date: DateTime<Utc>) -> BomResult<Option<Decimal>> {
        let latest = self
            .conn
            .query_row(
                "SELECT id, part_id, old_cost, new_cost, change_reason, effective_date, recorded, author
                 FROM cost_history
                 WHERE part_id = ?1 AND effective_date <= ?2
                 ORDER BY effective_date DESC, seq DESC
                 LIMIT 1",
                params![part_id, ts(&date)],
                entry_from_row,
            )
            .optional()?;

        if let Some(entry) = latest {
            return Ok(Some(entry.new_cost));
        }

        let baseline = self
            .conn
            .query_row(
                "SELECT baseline_cost FROM parts WHERE id = ?1",
                params![part_id],
                |row| opt_decimal_col(row, "baseline_cost"),
            )
            .optional()?;
        baseline.ok_or_else(|| BomError::part_not_found(part_id))
    }
}
