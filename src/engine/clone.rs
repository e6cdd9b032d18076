//! Clone service - copy a part's structure onto another part
//!
//! Cloning is structural: the source's active lines are recreated under the
//! target pointing at the same child parts. Child parts are never duplicated,
//! so everything below them is shared by both trees and the target's subtree
//! is isomorphic to the source's. Every child is checked before the first
//! line is written; a failure leaves the target untouched.

use chrono::Utc;
use rusqlite::Connection;
use tracing::info;

use crate::core::error::{BomError, BomResult};
use crate::core::identity::{LineId, PartId};
use crate::engine::cycle::CycleGuard;
use crate::engine::registry::load_part;
use crate::engine::structure::{check_usage, StructureStore};
use crate::entities::line::BomLine;
use crate::entities::tree::CloneReport;

/// Gap between cloned lines' sort positions
const SORT_STEP: i64 = 10;

pub struct CloneService<'c> {
    conn: &'c Connection,
}

impl<'c> CloneService<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Recreate `source`'s active lines under `target`
    ///
    /// A target line that already uses the same child is kept as is and
    /// counted in `reused_lines`, so re-running a clone adds nothing.
    pub fn clone_subtree(&self, source: &PartId, target: &PartId) -> BomResult<CloneReport> {
        if source == target {
            return Err(BomError::SameSubtree(*source));
        }
        load_part(self.conn, source)?;
        load_part(self.conn, target)?;

        let store = StructureStore::new(self.conn);
        let edges = store.ancestry();
        let guard = CycleGuard::new(&edges);
        let descendants = guard.descendants_of(source)?;
        if descendants.contains(target) {
            return Err(BomError::WouldCreateCycle {
                parent: *target,
                child: *source,
            });
        }
        let subtree_parts = descendants.len();

        // Check every child before writing anything
        let mut report = CloneReport {
            subtree_parts,
            ..Default::default()
        };
        let mut planned = Vec::new();
        for line in store.children_of(source, false)? {
            if store
                .active_line_between(target, &line.child_part_id)?
                .is_some()
            {
                report.reused_lines += 1;
                continue;
            }
            let child = load_part(self.conn, &line.child_part_id)?;
            check_usage(&child, line.qty_per, &line.uom, None)?;
            guard.check_edge(target, &child.id)?;
            planned.push(line);
        }

        let mut sort_order = store.next_sort_order(target)?;
        let now = Utc::now();
        for line in planned {
            store.insert(&BomLine {
                id: LineId::new(),
                parent_part_id: *target,
                child_part_id: line.child_part_id,
                qty_per: line.qty_per,
                uom: line.uom,
                scrap_pct: line.scrap_pct,
                sort_order,
                is_active: true,
                notes: line.notes,
                override_reason: None,
                created: now,
                updated: now,
            })?;
            sort_order += SORT_STEP;
            report.cloned_lines += 1;
        }

        info!(
            %source,
            %target,
            cloned = report.cloned_lines,
            reused = report.reused_lines,
            "subtree cloned"
        );
        Ok(report)
    }
}
