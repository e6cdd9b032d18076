//! Roll-up engine - extended cost over the BOM DAG
//!
//! A roll-up runs in three passes:
//! 1. collect every part reachable from the root, loading each part and its
//!    lines exactly once (a historical view leaves out inactive lines that
//!    would close a loop through the current structure);
//! 2. order them children-first with Kahn's algorithm (parts left over mean the
//!    stored graph has a cycle, reported as `CorruptStructure`);
//! 3. evaluate `rolled(part) = own(part) + Σ rolled(child) × usage × (1 + scrap/100)`
//!    in that order, so a shared sub-assembly is costed once per call.
//!
//! Values stay unrounded until a `BomTree` is built for display. Unrolling a
//! DAG into a tree repeats shared sub-assemblies, so the tree is refused when
//! its line count would pass a limit; the count itself is computed on the DAG.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, error, warn};

use crate::core::error::{BomError, BomResult};
use crate::core::identity::{LineId, PartId};
use crate::core::logging::ALERT_TARGET;
use crate::engine::cycle::EdgeSet;
use crate::engine::ledger::CostHistoryLedger;
use crate::engine::registry::load_part;
use crate::engine::structure::StructureStore;
use crate::entities::line::BomLine;
use crate::entities::part::{Part, PartType};
use crate::entities::tree::{BomTree, PartSummary, TreeLine};

/// Read port for roll-ups
pub trait RollupSource {
    fn part(&self, id: &PartId) -> BomResult<Part>;

    /// Lines under `id`, in display order
    fn lines_of(&self, id: &PartId, include_inactive: bool) -> BomResult<Vec<BomLine>>;

    /// Unit cost of `part`: current standard cost, or the cost in effect at `as_of`
    fn unit_cost(&self, part: &Part, as_of: Option<DateTime<Utc>>) -> BomResult<Option<Decimal>>;
}

/// Roll-up source backed by the database
pub struct StoreSource<'c> {
    conn: &'c Connection,
}

impl<'c> StoreSource<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl RollupSource for StoreSource<'_> {
    fn part(&self, id: &PartId) -> BomResult<Part> {
        load_part(self.conn, id)
    }

    fn lines_of(&self, id: &PartId, include_inactive: bool) -> BomResult<Vec<BomLine>> {
        StructureStore::new(self.conn).children_of(id, include_inactive)
    }

    fn unit_cost(&self, part: &Part, as_of: Option<DateTime<Utc>>) -> BomResult<Option<Decimal>> {
        match as_of {
            None => Ok(part.std_cost),
            Some(date) => CostHistoryLedger::new(self.conn).cost_as_of(&part.id, date),
        }
    }
}

/// Quantity of `child` consumed by `line`, in the child's usage unit
pub fn usage_quantity(line: &BomLine, child: &Part) -> BomResult<Decimal> {
    let qty = child.round_quantity(line.qty_per);
    if line.uom == child.uom {
        Ok(qty)
    } else if line.uom == child.purchase_uom {
        Ok(qty * child.conversion_factor)
    } else {
        Err(BomError::UnitMismatch {
            part: child.id,
            uom: line.uom.clone(),
            usage: child.uom.clone(),
            purchase: child.purchase_uom.clone(),
        })
    }
}

/// Round money for display
pub fn round_money(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
}

/// Result of one roll-up call
#[derive(Debug, Clone)]
pub struct Rollup {
    pub root: PartId,
    pub as_of: Option<DateTime<Utc>>,
    pub include_inactive: bool,
    /// Unrounded rolled cost per reachable part
    rolled: HashMap<PartId, Decimal>,
    parts: HashMap<PartId, Part>,
    lines: HashMap<PartId, Vec<BomLine>>,
    /// Children-first evaluation order
    order: Vec<PartId>,
}

impl Rollup {
    pub fn total_cost(&self) -> Decimal {
        self.rolled.get(&self.root).copied().unwrap_or_default()
    }

    pub fn rolled_cost(&self, part: &PartId) -> Option<Decimal> {
        self.rolled.get(part).copied()
    }

    /// Number of distinct parts evaluated, including the root
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Lines the unrolled tree would hold, saturating at `u64::MAX`
    pub fn unrolled_line_count(&self) -> u64 {
        let mut below: HashMap<PartId, u64> = HashMap::with_capacity(self.order.len());
        for id in &self.order {
            let count = self
                .lines
                .get(id)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .fold(0u64, |acc, line| {
                    let child = below.get(&line.child_part_id).copied().unwrap_or(0);
                    acc.saturating_add(child.saturating_add(1))
                });
            below.insert(*id, count);
        }
        below.get(&self.root).copied().unwrap_or(0)
    }

    /// Unroll the DAG into a tree, rounding money to `currency_decimals`
    ///
    /// Fails with `TreeTooLarge` instead of building more than `max_lines` lines.
    pub fn to_tree(&self, currency_decimals: u32, max_lines: u64) -> BomResult<BomTree> {
        let lines = self.unrolled_line_count();
        if lines > max_lines {
            return Err(BomError::TreeTooLarge {
                root: self.root,
                lines,
                limit: max_lines,
            });
        }
        let root = self.known_part(&self.root)?;
        Ok(BomTree {
            root: PartSummary::from(root),
            as_of: self.as_of,
            include_inactive: self.include_inactive,
            children: self.tree_lines(&self.root, currency_decimals)?,
            total_cost: round_money(self.total_cost(), currency_decimals),
        })
    }

    fn tree_lines(&self, parent: &PartId, decimals: u32) -> BomResult<Vec<TreeLine>> {
        let Some(lines) = self.lines.get(parent) else {
            return Ok(Vec::new());
        };
        lines
            .iter()
            .map(|line| {
                let child = self.known_part(&line.child_part_id)?;
                let unit = self.known_cost(&child.id)?;
                let usage = usage_quantity(line, child)?;
                Ok(TreeLine {
                    line: line.clone(),
                    child: PartSummary::from(child),
                    usage_qty: usage,
                    unit_cost: round_money(unit, decimals),
                    extended_cost: round_money(unit * usage * line.scrap_factor(), decimals),
                    children: self.tree_lines(&child.id, decimals)?,
                })
            })
            .collect()
    }

    fn known_part(&self, id: &PartId) -> BomResult<&Part> {
        self.parts.get(id).ok_or_else(|| BomError::part_not_found(id))
    }

    fn known_cost(&self, id: &PartId) -> BomResult<Decimal> {
        self.rolled
            .get(id)
            .copied()
            .ok_or(BomError::CorruptStructure(*id))
    }
}

/// Bottom-up memoized cost evaluation
pub struct RollupEngine<'s, S: RollupSource + ?Sized> {
    source: &'s S,
}

impl<'s, S: RollupSource + ?Sized> RollupEngine<'s, S> {
    pub fn new(source: &'s S) -> Self {
        Self { source }
    }

    /// Roll up `root` at current costs, or at the costs in effect at `as_of`
    pub fn rollup(
        &self,
        root: &PartId,
        as_of: Option<DateTime<Utc>>,
        include_inactive: bool,
    ) -> BomResult<Rollup> {
        let (parts, lines) = self.collect(root, include_inactive)?;
        let order = topological_order(root, &parts, &lines)?;

        let mut rolled: HashMap<PartId, Decimal> = HashMap::with_capacity(order.len());
        for id in &order {
            let part = &parts[id];
            let mut cost = self.own_cost(part, as_of)?;
            for line in lines.get(id).map(Vec::as_slice).unwrap_or_default() {
                let child = &parts[&line.child_part_id];
                let child_cost = rolled
                    .get(&child.id)
                    .copied()
                    .ok_or(BomError::CorruptStructure(child.id))?;
                cost += child_cost * usage_quantity(line, child)? * line.scrap_factor();
            }
            rolled.insert(*id, cost);
        }
        debug!(root = %root, parts = order.len(), "rollup evaluated");

        Ok(Rollup {
            root: *root,
            as_of,
            include_inactive,
            rolled,
            parts,
            lines,
            order,
        })
    }

    fn own_cost(&self, part: &Part, as_of: Option<DateTime<Utc>>) -> BomResult<Decimal> {
        match part.part_type {
            PartType::Phantom => Ok(Decimal::ZERO),
            PartType::Purchased => self
                .source
                .unit_cost(part, as_of)?
                .ok_or(BomError::MissingCost(part.id)),
            PartType::Manufactured => Ok(self.source.unit_cost(part, as_of)?.unwrap_or_default()),
        }
    }

    /// Every part reachable from `root`, and the lines under each
    #[allow(clippy::type_complexity)]
    fn collect(
        &self,
        root: &PartId,
        include_inactive: bool,
    ) -> BomResult<(HashMap<PartId, Part>, HashMap<PartId, Vec<BomLine>>)> {
        let mut parts = HashMap::new();
        let mut lines = HashMap::new();
        let mut visited = Vec::new();
        let mut stack = vec![*root];

        while let Some(id) = stack.pop() {
            if parts.contains_key(&id) {
                continue;
            }
            visited.push(id);
            let part = self.source.part(&id)?;
            let children = self.source.lines_of(&id, include_inactive)?;
            for line in &children {
                if !parts.contains_key(&line.child_part_id) {
                    stack.push(line.child_part_id);
                }
            }
            parts.insert(id, part);
            if !children.is_empty() {
                lines.insert(id, children);
            }
        }

        if include_inactive {
            drop_loop_closing_lines(root, &visited, &mut parts, &mut lines)?;
        }
        Ok((parts, lines))
    }
}

/// Leave out inactive lines that close a loop with the lines kept so far
///
/// A line deactivated before its reverse edge was added is history, not
/// structure. Active lines are always kept; inactive ones are taken in
/// discovery order and dropped when they would close a loop. Parts reachable
/// only through a dropped line leave the view with it.
fn drop_loop_closing_lines(
    root: &PartId,
    visited: &[PartId],
    parts: &mut HashMap<PartId, Part>,
    lines: &mut HashMap<PartId, Vec<BomLine>>,
) -> BomResult<()> {
    let mut kept = EdgeSet::new();
    for line in lines.values().flatten().filter(|l| l.is_active) {
        kept.insert(line.parent_part_id, line.child_part_id);
    }

    let mut dropped: HashSet<LineId> = HashSet::new();
    for id in visited {
        for line in lines.get(id).map(Vec::as_slice).unwrap_or_default() {
            if line.is_active {
                continue;
            }
            match kept.try_insert(line.parent_part_id, line.child_part_id) {
                Ok(()) => {}
                Err(BomError::WouldCreateCycle { .. }) => {
                    warn!(
                        line = %line.id,
                        parent = %line.parent_part_id,
                        child = %line.child_part_id,
                        "inactive line closes a loop; left out of the tree"
                    );
                    dropped.insert(line.id);
                }
                Err(e) => return Err(e),
            }
        }
    }
    if dropped.is_empty() {
        return Ok(());
    }

    for children in lines.values_mut() {
        children.retain(|l| !dropped.contains(&l.id));
    }
    lines.retain(|_, children| !children.is_empty());

    let mut reachable = HashSet::new();
    let mut stack = vec![*root];
    while let Some(id) = stack.pop() {
        if !reachable.insert(id) {
            continue;
        }
        for line in lines.get(&id).map(Vec::as_slice).unwrap_or_default() {
            stack.push(line.child_part_id);
        }
    }
    parts.retain(|id, _| reachable.contains(id));
    lines.retain(|id, _| reachable.contains(id));
    Ok(())
}

/// Children-first ordering of the collected parts
fn topological_order(
    root: &PartId,
    parts: &HashMap<PartId, Part>,
    lines: &HashMap<PartId, Vec<BomLine>>,
) -> BomResult<Vec<PartId>> {
    // Outstanding child lines per part, and who waits on each child
    let mut pending: HashMap<PartId, usize> = parts.keys().map(|id| (*id, 0)).collect();
    let mut waiting: HashMap<PartId, Vec<PartId>> = HashMap::new();
    for (parent, children) in lines {
        for line in children {
            *pending.entry(*parent).or_default() += 1;
            waiting.entry(line.child_part_id).or_default().push(*parent);
        }
    }

    let mut ready: VecDeque<PartId> = pending
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(parts.len());

    while let Some(id) = ready.pop_front() {
        order.push(id);
        for parent in waiting.get(&id).map(Vec::as_slice).unwrap_or_default() {
            if let Some(n) = pending.get_mut(parent) {
                *n -= 1;
                if *n == 0 {
                    ready.push_back(*parent);
                }
            }
        }
    }

    if order.len() < parts.len() {
        let stuck = pending
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(id, _)| *id)
            .min()
            .unwrap_or(*root);
        error!(
            target: ALERT_TARGET,
            root = %root,
            part = %stuck,
            "cycle found while rolling up BOM"
        );
        return Err(BomError::CorruptStructure(stuck));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::entities::part::{NewPart, QuantityBounds, Sku, LifecycleStatus};

    /// In-memory source that counts cost lookups
    #[derive(Default)]
    struct FakeSource {
        parts: HashMap<PartId, Part>,
        lines: Vec<BomLine>,
        lookups: RefCell<HashMap<PartId, usize>>,
    }

    impl FakeSource {
        fn add_part(&mut self, sku: &str, part_type: PartType, cost: Option<i64>) -> PartId {
            let now = Utc::now();
            let new = NewPart::new(sku, sku, part_type);
            let part = Part {
                id: PartId::new(),
                sku: Sku::parse(sku).unwrap(),
                name: new.name,
                part_type,
                uom: new.uom.clone(),
                purchase_uom: new.uom,
                conversion_factor: Decimal::ONE,
                std_cost: cost.map(Decimal::from),
                baseline_cost: cost.map(Decimal::from),
                decimal_precision: 0,
                lifecycle_status: LifecycleStatus::Active,
                bounds: QuantityBounds::default(),
                created: now,
                updated: now,
                author: "test".to_string(),
            };
            let id = part.id;
            self.parts.insert(id, part);
            id
        }

        fn add_line(&mut self, parent: PartId, child: PartId, qty: i64, scrap: i64) {
            let now = Utc::now();
            self.lines.push(BomLine {
                id: LineId::new(),
                parent_part_id: parent,
                child_part_id: child,
                qty_per: Decimal::from(qty),
                uom: "EA".to_string(),
                scrap_pct: Decimal::from(scrap),
                sort_order: self.lines.len() as i64,
                is_active: true,
                notes: None,
                override_reason: None,
                created: now,
                updated: now,
            });
        }

        fn lookups_of(&self, id: &PartId) -> usize {
            self.lookups.borrow().get(id).copied().unwrap_or(0)
        }
    }

    impl RollupSource for FakeSource {
        fn part(&self, id: &PartId) -> BomResult<Part> {
            self.parts
                .get(id)
                .cloned()
                .ok_or_else(|| BomError::part_not_found(id))
        }

        fn lines_of(&self, id: &PartId, include_inactive: bool) -> BomResult<Vec<BomLine>> {
            Ok(self
                .lines
                .iter()
                .filter(|l| l.parent_part_id == *id && (include_inactive || l.is_active))
                .cloned()
                .collect())
        }

        fn unit_cost(&self, part: &Part, _as_of: Option<DateTime<Utc>>) -> BomResult<Option<Decimal>> {
            *self.lookups.borrow_mut().entry(part.id).or_default() += 1;
            Ok(part.std_cost)
        }
    }

    #[test]
    fn test_phantom_passes_children_through() {
        let mut src = FakeSource::default();
        let root = src.add_part("ROOT", PartType::Manufactured, None);
        let phantom = src.add_part("KIT", PartType::Phantom, Some(99));
        let leaf = src.add_part("LEAF", PartType::Manufactured, Some(10));
        src.add_line(root, phantom, 1, 0);
        src.add_line(phantom, leaf, 2, 50);

        let rollup = RollupEngine::new(&src).rollup(&root, None, false).unwrap();
        assert_eq!(rollup.rolled_cost(&phantom), Some(Decimal::from(30)));
        assert_eq!(rollup.total_cost(), Decimal::from(30));
        assert_eq!(src.lookups_of(&phantom), 0);

        let tree = rollup.to_tree(2, 100).unwrap();
        assert_eq!(tree.children[0].children[0].extended_cost, Decimal::from(30));
        assert_eq!(tree.line_count(), 2);
    }

    #[test]
    fn test_shared_subassembly_costed_once() {
        let mut src = FakeSource::default();
        let top = src.add_part("TOP", PartType::Manufactured, Some(0));
        let a = src.add_part("A", PartType::Manufactured, Some(1));
        let b = src.add_part("B", PartType::Manufactured, Some(2));
        let s = src.add_part("S", PartType::Purchased, Some(5));
        src.add_line(top, a, 1, 0);
        src.add_line(top, b, 1, 0);
        src.add_line(a, s, 2, 0);
        src.add_line(b, s, 3, 0);

        let rollup = RollupEngine::new(&src).rollup(&top, None, false).unwrap();
        assert_eq!(src.lookups_of(&s), 1);
        assert_eq!(rollup.rolled_cost(&a), Some(Decimal::from(11)));
        assert_eq!(rollup.rolled_cost(&b), Some(Decimal::from(17)));
        assert_eq!(rollup.total_cost(), Decimal::from(28));
        assert_eq!(rollup.part_count(), 4);

        // Unrolled for display: S appears under both parents
        assert_eq!(rollup.to_tree(2, 100).unwrap().line_count(), 4);
    }

    #[test]
    fn test_purchased_without_cost_fails() {
        let mut src = FakeSource::default();
        let root = src.add_part("ROOT", PartType::Manufactured, None);
        let leaf = src.add_part("LEAF", PartType::Purchased, None);
        src.add_line(root, leaf, 1, 0);

        let err = RollupEngine::new(&src).rollup(&root, None, false).unwrap_err();
        assert!(matches!(err, BomError::MissingCost(id) if id == leaf));
    }

    #[test]
    fn test_stored_cycle_is_corrupt_structure() {
        let mut src = FakeSource::default();
        let a = src.add_part("A", PartType::Manufactured, Some(1));
        let b = src.add_part("B", PartType::Manufactured, Some(1));
        src.add_line(a, b, 1, 0);
        src.add_line(b, a, 1, 0);

        let err = RollupEngine::new(&src).rollup(&a, None, false).unwrap_err();
        assert!(matches!(err, BomError::CorruptStructure(_)));
    }

    #[test]
    fn test_inactive_lines_excluded_by_default() {
        let mut src = FakeSource::default();
        let root = src.add_part("ROOT", PartType::Manufactured, Some(1));
        let leaf = src.add_part("LEAF", PartType::Purchased, Some(4));
        src.add_line(root, leaf, 1, 0);
        src.lines[0].is_active = false;

        let engine = RollupEngine::new(&src);
        assert_eq!(engine.rollup(&root, None, false).unwrap().total_cost(), Decimal::ONE);
        assert_eq!(engine.rollup(&root, None, true).unwrap().total_cost(), Decimal::from(5));
    }

    #[test]
    fn test_usage_quantity_rounding_and_conversion() {
        let mut src = FakeSource::default();
        let id = src.add_part("WIRE", PartType::Purchased, Some(1));
        let mut wire = src.parts[&id].clone();
        wire.uom = "M".to_string();
        wire.purchase_uom = "SPOOL".to_string();
        wire.conversion_factor = Decimal::from(50);
        wire.decimal_precision = 1;

        let now = Utc::now();
        let mut line = BomLine {
            id: LineId::new(),
            parent_part_id: PartId::new(),
            child_part_id: id,
            qty_per: Decimal::new(125, 2),
            uom: "M".to_string(),
            scrap_pct: Decimal::ZERO,
            sort_order: 10,
            is_active: true,
            notes: None,
            override_reason: None,
            created: now,
            updated: now,
        };
        // 1.25 rounds half away from zero to 1.3
        assert_eq!(usage_quantity(&line, &wire).unwrap(), Decimal::new(13, 1));

        line.uom = "SPOOL".to_string();
        assert_eq!(usage_quantity(&line, &wire).unwrap(), Decimal::from(65));

        line.uom = "KG".to_string();
        assert!(matches!(
            usage_quantity(&line, &wire),
            Err(BomError::UnitMismatch { .. })
        ));
    }

    #[test]
    fn test_money_rounded_only_for_display() {
        let mut src = FakeSource::default();
        let root = src.add_part("ROOT", PartType::Phantom, None);
        let leaf = src.add_part("LEAF", PartType::Purchased, None);
        src.parts.get_mut(&leaf).unwrap().std_cost = Some(Decimal::new(3335, 4));
        src.add_line(root, leaf, 3, 0);

        let rollup = RollupEngine::new(&src).rollup(&root, None, false).unwrap();
        assert_eq!(rollup.total_cost(), Decimal::new(10005, 4));
        assert_eq!(rollup.to_tree(2, 100).unwrap().total_cost, Decimal::new(100, 2));
        assert_eq!(rollup.to_tree(3, 100).unwrap().total_cost, Decimal::new(1001, 3));
    }

    #[test]
    fn test_diamond_chain_refused_before_unrolling() {
        // Each level doubles the unrolled paths: 2 + 4 + ... + 2^(2*depth)
        let mut src = FakeSource::default();
        let root = src.add_part("L0", PartType::Manufactured, Some(1));
        let mut top = root;
        for level in 0..12 {
            let left = src.add_part(&format!("A{}", level), PartType::Manufactured, Some(1));
            let right = src.add_part(&format!("B{}", level), PartType::Manufactured, Some(1));
            let join = src.add_part(&format!("J{}", level), PartType::Manufactured, Some(1));
            src.add_line(top, left, 1, 0);
            src.add_line(top, right, 1, 0);
            src.add_line(left, join, 1, 0);
            src.add_line(right, join, 1, 0);
            top = join;
        }

        let rollup = RollupEngine::new(&src).rollup(&root, None, false).unwrap();
        assert_eq!(rollup.part_count(), 37);
        assert_eq!(rollup.unrolled_line_count(), 4 * ((1u64 << 12) - 1));

        let err = rollup.to_tree(2, 10_000).unwrap_err();
        assert!(matches!(err, BomError::TreeTooLarge { lines: 16_380, limit: 10_000, .. }));
        assert!(rollup.to_tree(2, 20_000).is_ok());
    }

    #[test]
    fn test_inactive_line_closing_a_loop_left_out() {
        let mut src = FakeSource::default();
        let a = src.add_part("A", PartType::Manufactured, Some(1));
        let b = src.add_part("B", PartType::Manufactured, Some(2));
        let c = src.add_part("C", PartType::Purchased, Some(4));
        // A → B was retired, then B → A added; B → C is still live history
        src.add_line(a, b, 1, 0);
        src.lines[0].is_active = false;
        src.add_line(b, a, 1, 0);
        src.add_line(a, c, 1, 0);
        src.lines[2].is_active = false;

        let rollup = RollupEngine::new(&src).rollup(&b, None, true).unwrap();
        // B + A + C, with A → B left out
        assert_eq!(rollup.total_cost(), Decimal::from(7));
        assert_eq!(rollup.to_tree(2, 100).unwrap().line_count(), 2);

        let rollup = RollupEngine::new(&src).rollup(&a, None, true).unwrap();
        assert_eq!(rollup.total_cost(), Decimal::from(5));
        assert_eq!(rollup.part_count(), 2);
    }
}
