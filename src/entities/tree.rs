//! Read models handed to collaborators: materialized trees and clone reports

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::identity::PartId;
use crate::entities::line::BomLine;
use crate::entities::part::{LifecycleStatus, Part, PartType, Sku};

/// The subset of a part shown in a tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartSummary {
    pub id: PartId,
    pub sku: Sku,
    pub name: String,
    #[serde(rename = "type")]
    pub part_type: PartType,
    pub uom: String,
    pub lifecycle_status: LifecycleStatus,
}

impl From<&Part> for PartSummary {
    fn from(part: &Part) -> Self {
        Self {
            id: part.id,
            sku: part.sku.clone(),
            name: part.name.clone(),
            part_type: part.part_type,
            uom: part.uom.clone(),
            lifecycle_status: part.lifecycle_status,
        }
    }
}

/// A line in a materialized tree, carrying its resolved child subtree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeLine {
    pub line: BomLine,
    pub child: PartSummary,

    /// qtyPer after precision rounding and unit conversion, in the child's usage unit
    pub usage_qty: Decimal,

    /// Rolled cost of one unit of the child (display-rounded)
    pub unit_cost: Decimal,

    /// unit_cost × usage_qty × scrap factor (display-rounded)
    pub extended_cost: Decimal,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeLine>,
}

/// A materialized BOM tree rooted at one part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomTree {
    pub root: PartSummary,

    /// Present for historical roll-ups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of: Option<DateTime<Utc>>,

    pub include_inactive: bool,

    pub children: Vec<TreeLine>,

    /// Rolled cost of one unit of the root (display-rounded)
    pub total_cost: Decimal,
}

impl BomTree {
    /// Number of lines in the unrolled tree (shared subtrees counted per use)
    pub fn line_count(&self) -> usize {
        fn count(lines: &[TreeLine]) -> usize {
            lines.iter().map(|l| 1 + count(&l.children)).sum()
        }
        count(&self.children)
    }

    /// Indented plain-text rendering
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} {} [{}] total {}",
            self.root.sku, self.root.name, self.root.part_type, self.total_cost
        );
        render_lines(&self.children, 1, &mut out);
        out
    }
}

fn render_lines(lines: &[TreeLine], depth: usize, out: &mut String) {
    for tl in lines {
        let inactive = if tl.line.is_active { "" } else { " (inactive)" };
        let _ = writeln!(
            out,
            "{}{} x{} {} scrap {}% @ {} = {}{}",
            "  ".repeat(depth),
            tl.child.sku,
            tl.line.qty_per,
            tl.line.uom,
            tl.line.scrap_pct,
            tl.unit_cost,
            tl.extended_cost,
            inactive
        );
        render_lines(&tl.children, depth + 1, out);
    }
}

/// Outcome of a subtree clone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneReport {
    /// New lines written under the target
    pub cloned_lines: usize,

    /// Source lines whose child the target already used (left as is)
    pub reused_lines: usize,

    /// Distinct parts in the source subtree, excluding the source itself
    pub subtree_parts: usize,
}
