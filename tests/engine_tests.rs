//! Engine behaviour through the public library API

mod common;

use std::cell::RefCell;
use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use common::{link, memory_engine, part};
use tbom::core::config::Config;
use tbom::core::db::Database;
use tbom::core::error::{BomError, ErrorKind};
use tbom::core::identity::PartId;
use tbom::engine::{PartRegistry, RollupEngine, RollupSource, StoreSource, StructureStore};
use tbom::entities::{BomLine, LifecycleStatus, LinePatch, NewLine, NewPart, Part, PartPatch, PartType};

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, d, 9, 0, 0).unwrap()
}

// ============================================================================
// Structure
// ============================================================================

#[test]
fn test_cycle_rejected_without_partial_write() {
    let mut engine = memory_engine();
    let a = part(&mut engine, "A", PartType::Manufactured, None);
    let b = part(&mut engine, "B", PartType::Manufactured, None);
    let c = part(&mut engine, "C", PartType::Purchased, Some(1));
    link(&mut engine, &a, &b, 1, 0);
    link(&mut engine, &b, &c, 1, 0);

    let before = engine.children_of(&c.id, true).unwrap().len();
    let err = engine
        .add_line(NewLine::new(c.id, a.id, Decimal::ONE, Decimal::ZERO, "EA"))
        .unwrap_err();
    assert!(matches!(err, BomError::WouldCreateCycle { .. }));
    assert_eq!(err.kind(), ErrorKind::Structural);
    assert!(!err.is_retryable());
    assert_eq!(engine.children_of(&c.id, true).unwrap().len(), before);
    assert!(engine.parents_of(&a.id).unwrap().is_empty());
}

#[test]
fn test_deactivated_line_kept_for_history() {
    let mut engine = memory_engine();
    let top = part(&mut engine, "TOP", PartType::Manufactured, Some(1));
    let bolt = part(&mut engine, "BOLT", PartType::Purchased, Some(2));
    let line = link(&mut engine, &top, &bolt, 3, 0);

    engine.deactivate_line(&line.id).unwrap();
    assert!(!engine.get_line(&line.id).unwrap().is_active);
    assert!(engine.children_of(&top.id, false).unwrap().is_empty());

    let active = engine.get_tree(&top.id, false).unwrap();
    let all = engine.get_tree(&top.id, true).unwrap();
    assert_eq!(active.total_cost, Decimal::from(1));
    assert_eq!(all.total_cost, Decimal::from(7));
    assert!(!all.children[0].line.is_active);

    assert!(matches!(
        engine.deactivate_line(&line.id),
        Err(BomError::LineInactive(_))
    ));
}

#[test]
fn test_update_line_revalidates_bounds() {
    let mut engine = memory_engine();
    let top = part(&mut engine, "TOP", PartType::Manufactured, None);
    let shim = engine
        .create_part(
            NewPart::new("SHIM", "Shim", PartType::Purchased)
                .with_cost(Decimal::ONE)
                .with_bounds(None, Some(Decimal::from(4))),
        )
        .unwrap();
    let line = link(&mut engine, &top, &shim, 2, 0);

    let err = engine
        .update_line(
            &line.id,
            LinePatch {
                qty_per: Some(Decimal::from(6)),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, BomError::QuantityOutOfBounds { .. }));
    assert_eq!(engine.get_line(&line.id).unwrap().qty_per, Decimal::from(2));

    let updated = engine
        .update_line(
            &line.id,
            LinePatch {
                qty_per: Some(Decimal::from(4)),
                scrap_pct: Some(Decimal::from(10)),
                notes: Some(Some("torque 9 Nm".to_string())),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(updated.qty_per, Decimal::from(4));
    assert_eq!(updated.notes.as_deref(), Some("torque 9 Nm"));
}

#[test]
fn test_move_line_rejects_cycle_and_keeps_line() {
    let mut engine = memory_engine();
    let a = part(&mut engine, "A", PartType::Manufactured, None);
    let b = part(&mut engine, "B", PartType::Manufactured, None);
    let c = part(&mut engine, "C", PartType::Manufactured, None);
    let ab = link(&mut engine, &a, &b, 1, 0);
    link(&mut engine, &b, &c, 1, 0);

    assert!(matches!(
        engine.move_line(&ab.id, &c.id),
        Err(BomError::WouldCreateCycle { .. })
    ));
    assert_eq!(engine.get_line(&ab.id).unwrap().parent_part_id, a.id);
}

#[test]
fn test_part_unit_change_checked_against_lines() {
    let mut engine = memory_engine();
    let assy = part(&mut engine, "ASSY", PartType::Manufactured, None);
    let bolt = engine
        .create_part(
            NewPart::new("BOLT", "Bolt", PartType::Purchased)
                .with_cost(Decimal::new(5, 2))
                .with_purchase_uom("BOX", Decimal::ONE_HUNDRED),
        )
        .unwrap();
    link(&mut engine, &assy, &bolt, 3, 0);

    let err = engine
        .update_part(
            &bolt.id,
            PartPatch {
                uom: Some("KG".to_string()),
                ..Default::default()
            },
            "",
        )
        .unwrap_err();
    assert!(matches!(err, BomError::UnitMismatch { .. }));

    let err = engine
        .update_part(
            &bolt.id,
            PartPatch {
                min_quantity: Some(Some(Decimal::TEN)),
                ..Default::default()
            },
            "",
        )
        .unwrap_err();
    assert!(matches!(err, BomError::QuantityOutOfBounds { .. }));

    let stored = engine.get_part(&bolt.id).unwrap();
    assert_eq!(stored.uom, "EA");
    assert_eq!(stored.bounds.min, None);
    assert_eq!(
        engine.get_tree(&assy.id, false).unwrap().total_cost,
        Decimal::new(15, 2)
    );
}

#[test]
fn test_quantity_below_part_precision_rejected() {
    let mut engine = memory_engine();
    let assy = part(&mut engine, "ASSY", PartType::Manufactured, None);
    let bolt = part(&mut engine, "BOLT", PartType::Purchased, Some(2));

    let err = engine
        .add_line(NewLine::new(assy.id, bolt.id, Decimal::new(4, 1), Decimal::ZERO, "EA"))
        .unwrap_err();
    assert!(matches!(err, BomError::InvalidQuantity(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(engine.children_of(&assy.id, true).unwrap().is_empty());
}

#[test]
fn test_retired_line_does_not_block_reverse_edge() {
    let mut engine = memory_engine();
    let a = part(&mut engine, "A", PartType::Manufactured, Some(1));
    let b = part(&mut engine, "B", PartType::Manufactured, Some(2));
    let ab = link(&mut engine, &a, &b, 1, 0);
    engine.deactivate_line(&ab.id).unwrap();

    assert!(!engine.would_create_cycle(&b.id, &a.id).unwrap());
    link(&mut engine, &b, &a, 1, 0);

    // The retired A → B would close a loop, so history views leave it out
    assert_eq!(engine.get_tree(&b.id, true).unwrap().total_cost, Decimal::from(3));
    let tree = engine.get_tree(&a.id, true).unwrap();
    assert!(tree.children.is_empty());
    assert_eq!(tree.total_cost, Decimal::from(1));
}

// ============================================================================
// Roll-up
// ============================================================================

#[test]
fn test_phantom_rollup() {
    let mut engine = memory_engine();
    let root = part(&mut engine, "ROOT", PartType::Manufactured, None);
    let phantom = part(&mut engine, "KIT", PartType::Phantom, Some(100));
    let leaf = part(&mut engine, "LEAF", PartType::Manufactured, Some(10));
    link(&mut engine, &root, &phantom, 1, 0);
    link(&mut engine, &phantom, &leaf, 2, 50);

    let tree = engine.get_tree(&root.id, false).unwrap();
    let kit = &tree.children[0];
    assert_eq!(kit.unit_cost, Decimal::new(3000, 2));
    assert_eq!(kit.children[0].extended_cost, Decimal::new(3000, 2));
    assert_eq!(tree.total_cost, Decimal::new(3000, 2));
}

/// Store-backed source that counts cost lookups
struct CountingSource<'c> {
    inner: StoreSource<'c>,
    lookups: RefCell<HashMap<PartId, usize>>,
}

impl RollupSource for CountingSource<'_> {
    fn part(&self, id: &PartId) -> Result<Part, BomError> {
        self.inner.part(id)
    }

    fn lines_of(&self, id: &PartId, include_inactive: bool) -> Result<Vec<BomLine>, BomError> {
        self.inner.lines_of(id, include_inactive)
    }

    fn unit_cost(&self, part: &Part, as_of: Option<DateTime<Utc>>) -> Result<Option<Decimal>, BomError> {
        *self.lookups.borrow_mut().entry(part.id).or_default() += 1;
        self.inner.unit_cost(part, as_of)
    }
}

#[test]
fn test_shared_subassembly_evaluated_once() {
    let mut db = Database::open_in_memory(&Config::default()).unwrap();
    let (top, a, b, s) = db
        .write("seed", |tx| {
            let registry = PartRegistry::new(tx, "tester");
            let store = StructureStore::new(tx);
            let mk = |sku: &str, t: PartType, cost: i64| {
                registry.create(NewPart::new(sku, sku, t).with_cost(Decimal::from(cost)))
            };
            let top = mk("TOP", PartType::Manufactured, 0)?;
            let a = mk("A", PartType::Manufactured, 1)?;
            let b = mk("B", PartType::Manufactured, 2)?;
            let s = mk("S", PartType::Purchased, 4)?;
            for (p, c, q) in [(&top, &a, 1), (&top, &b, 1), (&a, &s, 2), (&b, &s, 5)] {
                store.add_line(&NewLine::new(p.id, c.id, Decimal::from(q), Decimal::ZERO, "EA"))?;
            }
            Ok((top.id, a.id, b.id, s.id))
        })
        .unwrap();

    db.read(|conn| {
        let source = CountingSource {
            inner: StoreSource::new(conn),
            lookups: RefCell::new(HashMap::new()),
        };
        let rollup = RollupEngine::new(&source).rollup(&top, None, false)?;
        assert_eq!(source.lookups.borrow().get(&s), Some(&1));
        assert_eq!(rollup.rolled_cost(&a), Some(Decimal::from(9)));
        assert_eq!(rollup.rolled_cost(&b), Some(Decimal::from(22)));
        assert_eq!(rollup.total_cost(), Decimal::from(31));
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_get_tree_is_idempotent() {
    let mut engine = memory_engine();
    let root = part(&mut engine, "ROOT", PartType::Manufactured, Some(3));
    let nut = engine
        .create_part(NewPart::new("NUT", "Nut", PartType::Purchased).with_cost(Decimal::new(3333, 4)))
        .unwrap();
    link(&mut engine, &root, &nut, 7, 3);

    let first = engine.get_tree(&root.id, false).unwrap();
    let second = engine.get_tree(&root.id, false).unwrap();
    assert_eq!(first.total_cost, second.total_cost);
    // 3 + 0.3333 × 7 × 1.03 = 5.4030...
    assert_eq!(first.total_cost, Decimal::new(540, 2));
}

#[test]
fn test_missing_cost_refuses_rollup() {
    let mut engine = memory_engine();
    let root = part(&mut engine, "ROOT", PartType::Manufactured, None);
    let unpriced = part(&mut engine, "RAW", PartType::Purchased, None);
    link(&mut engine, &root, &unpriced, 1, 0);

    let err = engine.get_tree(&root.id, false).unwrap_err();
    assert!(matches!(err, BomError::MissingCost(id) if id == unpriced.id));
    assert_eq!(err.kind(), ErrorKind::Cost);
}

#[test]
fn test_purchase_unit_conversion() {
    let mut engine = memory_engine();
    let root = part(&mut engine, "HARNESS", PartType::Manufactured, None);
    let wire = engine
        .create_part(
            NewPart::new("WIRE", "Wire", PartType::Purchased)
                .with_uom("M")
                .with_purchase_uom("SPOOL", Decimal::from(100))
                .with_cost(Decimal::new(5, 2)),
        )
        .unwrap();
    engine
        .add_line(NewLine::new(root.id, wire.id, Decimal::ONE, Decimal::ZERO, "SPOOL"))
        .unwrap();

    let tree = engine.get_tree(&root.id, false).unwrap();
    assert_eq!(tree.children[0].usage_qty, Decimal::from(100));
    assert_eq!(tree.total_cost, Decimal::new(500, 2));
}

#[test]
fn test_historical_rollup_uses_costs_in_effect() {
    let mut engine = memory_engine();
    let root = part(&mut engine, "ROOT", PartType::Phantom, None);
    let bolt = part(&mut engine, "BOLT", PartType::Purchased, Some(2));
    link(&mut engine, &root, &bolt, 10, 0);

    engine
        .set_part_cost_at(&bolt.id, Decimal::from(3), "Q2 contract", day(10))
        .unwrap();
    engine
        .set_part_cost_at(&bolt.id, Decimal::from(5), "Q3 contract", day(20))
        .unwrap();

    let at = |d| engine.get_tree_as_of(&root.id, false, day(d)).unwrap().total_cost;
    assert_eq!(at(1), Decimal::from(20));
    assert_eq!(at(15), Decimal::from(30));
    assert_eq!(at(25), Decimal::from(50));
    assert_eq!(engine.cost_as_of(&bolt.id, day(1)).unwrap(), Some(Decimal::from(2)));
}

// ============================================================================
// Clone
// ============================================================================

#[test]
fn test_clone_three_lines_isomorphic() {
    let mut engine = memory_engine();
    let source = part(&mut engine, "SRC", PartType::Manufactured, None);
    let target = part(&mut engine, "DST", PartType::Manufactured, None);
    let x = part(&mut engine, "X", PartType::Purchased, Some(1));
    let y = part(&mut engine, "Y", PartType::Purchased, Some(2));
    let z = part(&mut engine, "Z", PartType::Manufactured, Some(3));
    let w = part(&mut engine, "W", PartType::Purchased, Some(4));
    link(&mut engine, &source, &x, 1, 0);
    link(&mut engine, &source, &y, 2, 10);
    link(&mut engine, &source, &z, 3, 20);
    link(&mut engine, &z, &w, 2, 0);

    let report = engine.clone_subtree(&source.id, &target.id).unwrap();
    assert_eq!(report.cloned_lines, 3);
    assert_eq!(report.subtree_parts, 4);

    let shape = |lines: Vec<BomLine>| -> Vec<_> {
        lines
            .into_iter()
            .map(|l| (l.child_part_id, l.qty_per, l.scrap_pct, l.uom))
            .collect()
    };
    assert_eq!(
        shape(engine.children_of(&target.id, false).unwrap()),
        shape(engine.children_of(&source.id, false).unwrap())
    );
    assert_eq!(
        engine.get_tree(&target.id, false).unwrap().total_cost,
        engine.get_tree(&source.id, false).unwrap().total_cost
    );
}

#[test]
fn test_clone_into_descendant_creates_nothing() {
    let mut engine = memory_engine();
    let source = part(&mut engine, "SRC", PartType::Manufactured, None);
    let mid = part(&mut engine, "MID", PartType::Manufactured, None);
    let leaf = part(&mut engine, "LEAF", PartType::Manufactured, None);
    link(&mut engine, &source, &mid, 1, 0);
    link(&mut engine, &mid, &leaf, 1, 0);

    let err = engine.clone_subtree(&source.id, &leaf.id).unwrap_err();
    assert!(matches!(err, BomError::WouldCreateCycle { .. }));
    assert!(engine.children_of(&leaf.id, true).unwrap().is_empty());

    assert!(matches!(
        engine.clone_subtree(&source.id, &source.id),
        Err(BomError::SameSubtree(_))
    ));
}

// ============================================================================
// Cost and lifecycle audit
// ============================================================================

#[test]
fn test_every_cost_change_is_audited() {
    let mut engine = memory_engine();
    let bolt = part(&mut engine, "BOLT", PartType::Purchased, Some(2));

    let mut expected_old = Some(Decimal::from(2));
    for (i, cost) in [3, 3, 1].into_iter().enumerate() {
        let before = engine.cost_history(&bolt.id, None).unwrap().len();
        engine
            .set_part_cost(&bolt.id, Decimal::from(cost), &format!("change {}", i))
            .unwrap();
        let history = engine.cost_history(&bolt.id, None).unwrap();
        assert_eq!(history.len(), before + 1);
        assert_eq!(history[0].old_cost, expected_old);
        assert_eq!(history[0].author, "tester");
        expected_old = Some(Decimal::from(cost));
    }
    assert_eq!(engine.cost_history(&bolt.id, Some(2)).unwrap().len(), 2);
}

#[test]
fn test_lifecycle_monotonic() {
    let mut engine = memory_engine();
    let p = part(&mut engine, "P", PartType::Purchased, Some(1));
    engine
        .set_lifecycle(&p.id, LifecycleStatus::Discontinued, "supplier exit")
        .unwrap();

    let err = engine
        .set_lifecycle(&p.id, LifecycleStatus::Active, "needed again")
        .unwrap_err();
    assert!(matches!(err, BomError::InvalidTransition { .. }));
    assert_eq!(err.kind(), ErrorKind::Lifecycle);

    let revived = engine
        .set_lifecycle_with_override(&p.id, LifecycleStatus::Active, "needed again", "last-time buy")
        .unwrap();
    assert_eq!(revived.lifecycle_status, LifecycleStatus::Active);

    let history = engine.lifecycle_history(&p.id, None).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].overridden);
    assert_eq!(history[0].from, LifecycleStatus::Discontinued);
}

#[test]
fn test_obsolete_part_cannot_be_added() {
    let mut engine = memory_engine();
    let top = part(&mut engine, "TOP", PartType::Manufactured, None);
    let old = part(&mut engine, "OLD", PartType::Purchased, Some(1));
    engine
        .set_lifecycle(&old.id, LifecycleStatus::Obsolete, "replaced by NEW")
        .unwrap();

    let err = engine
        .add_line(NewLine::new(top.id, old.id, Decimal::ONE, Decimal::ZERO, "EA"))
        .unwrap_err();
    assert!(matches!(err, BomError::ObsoletePart { .. }));
    assert!(matches!(
        engine.add_line(NewLine::new(top.id, old.id, Decimal::ONE, Decimal::ZERO, "EA").allow_obsolete("")),
        Err(BomError::EmptyReason)
    ));

    let line = engine
        .add_line(
            NewLine::new(top.id, old.id, Decimal::ONE, Decimal::ZERO, "EA")
                .allow_obsolete("service spares for fielded units"),
        )
        .unwrap();
    assert_eq!(
        engine.get_line(&line.id).unwrap().override_reason.as_deref(),
        Some("service spares for fielded units")
    );
}

#[test]
fn test_currency_decimals_from_config() {
    let mut config = Config::for_database(":memory:");
    config.currency_decimals = 3;
    let mut engine = tbom::BomEngine::open_in_memory(config).unwrap();
    let root = part(&mut engine, "ROOT", PartType::Phantom, None);
    let nut = engine
        .create_part(NewPart::new("NUT", "Nut", PartType::Purchased).with_cost(Decimal::new(12345, 4)))
        .unwrap();
    link(&mut engine, &root, &nut, 1, 0);

    assert_eq!(
        engine.get_tree(&root.id, false).unwrap().total_cost,
        Decimal::new(1235, 3)
    );
}

#[test]
fn test_oversized_tree_refused_but_total_available() {
    let mut config = Config::for_database(":memory:");
    config.max_tree_lines = 10;
    let mut engine = tbom::BomEngine::open_in_memory(config).unwrap();

    // Three stacked diamonds unroll to 4 + 8 + 16 = 28 lines
    let root = part(&mut engine, "L0", PartType::Manufactured, None);
    let mut top = root.clone();
    for level in 0..3 {
        let left = part(&mut engine, &format!("A{}", level), PartType::Manufactured, None);
        let right = part(&mut engine, &format!("B{}", level), PartType::Manufactured, None);
        let join = part(&mut engine, &format!("J{}", level), PartType::Manufactured, Some(1));
        link(&mut engine, &top, &left, 1, 0);
        link(&mut engine, &top, &right, 1, 0);
        link(&mut engine, &left, &join, 1, 0);
        link(&mut engine, &right, &join, 1, 0);
        top = join;
    }

    let err = engine.get_tree(&root.id, false).unwrap_err();
    assert!(matches!(err, BomError::TreeTooLarge { lines: 28, limit: 10, .. }));
    assert_eq!(engine.rollup(&root.id, false, None).unwrap().unrolled_line_count(), 28);
    // J2 = 1, J1 = 1 + 2 * 1, J0 = 1 + 2 * 3, root = 2 * 7
    assert_eq!(engine.total_cost(&root.id, false, None).unwrap(), Decimal::from(14));
}
