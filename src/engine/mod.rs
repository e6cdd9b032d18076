//! BOM engine - the operation surface collaborators call
//!
//! `BomEngine` owns one database connection. Each mutating call is one
//! IMMEDIATE transaction covering its validation reads and its writes; reads
//! run in a deferred transaction and see a consistent snapshot. Identifiers
//! are always stable ids, never SKUs.

pub mod clone;
pub mod cycle;
pub mod ledger;
pub mod registry;
pub mod rollup;
pub mod structure;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::instrument;

use crate::core::config::Config;
use crate::core::db::Database;
use crate::core::error::BomResult;
use crate::core::identity::{LineId, PartId};
use crate::entities::history::{CostHistoryEntry, LifecycleChange};
use crate::entities::line::{BomLine, LinePatch, NewLine};
use crate::entities::part::{LifecycleStatus, NewPart, Part, PartPatch};
use crate::entities::tree::{BomTree, CloneReport};

pub use clone::CloneService;
pub use cycle::{Ancestry, CycleGuard, EdgeSet};
pub use ledger::CostHistoryLedger;
pub use registry::{PartFilter, PartRegistry};
pub use rollup::{round_money, Rollup, RollupEngine, RollupSource, StoreSource};
pub use structure::StructureStore;

/// Engine facade over one database
pub struct BomEngine {
    db: Database,
    config: Config,
}

impl BomEngine {
    /// Open the database named in `config`
    pub fn open(config: Config) -> BomResult<Self> {
        config.validate()?;
        let db = Database::open(&config)?;
        Ok(Self { db, config })
    }

    /// Engine over a private in-memory database
    pub fn open_in_memory(config: Config) -> BomResult<Self> {
        config.validate()?;
        let db = Database::open_in_memory(&config)?;
        Ok(Self { db, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ----- parts -----

    #[instrument(skip(self, new), fields(sku = %new.sku))]
    pub fn create_part(&mut self, new: NewPart) -> BomResult<Part> {
        let author = self.config.author.clone();
        self.db.write("create_part", |tx| {
            PartRegistry::new(tx, &author).create(new.clone())
        })
    }

    pub fn get_part(&self, id: &PartId) -> BomResult<Part> {
        self.db.read(|conn| PartRegistry::new(conn, "").get(id))
    }

    pub fn find_part_by_sku(&self, sku: &str) -> BomResult<Option<Part>> {
        self.db.read(|conn| PartRegistry::new(conn, "").find_by_sku(sku))
    }

    pub fn list_parts(&self, filter: &PartFilter) -> BomResult<Vec<Part>> {
        self.db.read(|conn| PartRegistry::new(conn, "").list(filter))
    }

    #[instrument(skip(self, patch))]
    pub fn update_part(&mut self, id: &PartId, patch: PartPatch, reason: &str) -> BomResult<Part> {
        let author = self.config.author.clone();
        self.db.write("update_part", |tx| {
            PartRegistry::new(tx, &author).update(id, patch.clone(), reason)
        })
    }

    /// Change the standard cost, effective now
    pub fn set_part_cost(&mut self, id: &PartId, new_cost: Decimal, reason: &str) -> BomResult<Part> {
        self.set_part_cost_at(id, new_cost, reason, Utc::now())
    }

    /// Change the standard cost with an explicit effective date
    #[instrument(skip(self))]
    pub fn set_part_cost_at(
        &mut self,
        id: &PartId,
        new_cost: Decimal,
        reason: &str,
        effective_date: DateTime<Utc>,
    ) -> BomResult<Part> {
        let author = self.config.author.clone();
        let (part, _entry) = self.db.write("set_part_cost", |tx| {
            PartRegistry::new(tx, &author).set_cost(id, new_cost, reason, effective_date)
        })?;
        Ok(part)
    }

    /// Forward lifecycle move; reverse moves fail with `InvalidTransition`
    pub fn set_lifecycle(&mut self, id: &PartId, status: LifecycleStatus, reason: &str) -> BomResult<Part> {
        self.change_lifecycle(id, status, reason, None)
    }

    /// Lifecycle move that may go backwards when `override_reason` is given
    pub fn set_lifecycle_with_override(
        &mut self,
        id: &PartId,
        status: LifecycleStatus,
        reason: &str,
        override_reason: &str,
    ) -> BomResult<Part> {
        self.change_lifecycle(id, status, reason, Some(override_reason))
    }

    #[instrument(skip(self))]
    fn change_lifecycle(
        &mut self,
        id: &PartId,
        status: LifecycleStatus,
        reason: &str,
        override_reason: Option<&str>,
    ) -> BomResult<Part> {
        let author = self.config.author.clone();
        self.db.write("set_lifecycle", |tx| {
            PartRegistry::new(tx, &author).set_lifecycle(id, status, reason, override_reason)
        })
    }

    /// Cost changes, newest first
    pub fn cost_history(&self, id: &PartId, limit: Option<usize>) -> BomResult<Vec<CostHistoryEntry>> {
        self.db.read(|conn| {
            PartRegistry::new(conn, "").get(id)?;
            CostHistoryLedger::new(conn).history_of(id, limit)
        })
    }

    /// Standard cost in effect at `date`
    pub fn cost_as_of(&self, id: &PartId, date: DateTime<Utc>) -> BomResult<Option<Decimal>> {
        self.db.read(|conn| CostHistoryLedger::new(conn).cost_as_of(id, date))
    }

    /// Lifecycle changes, newest first
    pub fn lifecycle_history(&self, id: &PartId, limit: Option<usize>) -> BomResult<Vec<LifecycleChange>> {
        self.db.read(|conn| {
            let registry = PartRegistry::new(conn, "");
            registry.get(id)?;
            registry.lifecycle_history(id, limit)
        })
    }

    // ----- structure -----

    #[instrument(skip(self, new), fields(parent = %new.parent_id, child = %new.child_id))]
    pub fn add_line(&mut self, new: NewLine) -> BomResult<BomLine> {
        self.db
            .write("add_line", |tx| StructureStore::new(tx).add_line(&new))
    }

    #[instrument(skip(self, patch))]
    pub fn update_line(&mut self, id: &LineId, patch: LinePatch) -> BomResult<BomLine> {
        self.db
            .write("update_line", |tx| StructureStore::new(tx).update_line(id, &patch))
    }

    #[instrument(skip(self))]
    pub fn move_line(&mut self, id: &LineId, new_parent: &PartId) -> BomResult<BomLine> {
        self.db
            .write("move_line", |tx| StructureStore::new(tx).move_line(id, new_parent))
    }

    #[instrument(skip(self))]
    pub fn deactivate_line(&mut self, id: &LineId) -> BomResult<()> {
        self.db.write("deactivate_line", |tx| {
            StructureStore::new(tx).deactivate_line(id)?;
            Ok(())
        })
    }

    pub fn get_line(&self, id: &LineId) -> BomResult<BomLine> {
        self.db.read(|conn| StructureStore::new(conn).get_line(id))
    }

    pub fn children_of(&self, id: &PartId, include_inactive: bool) -> BomResult<Vec<BomLine>> {
        self.db
            .read(|conn| StructureStore::new(conn).children_of(id, include_inactive))
    }

    pub fn parents_of(&self, id: &PartId) -> BomResult<Vec<BomLine>> {
        self.db.read(|conn| StructureStore::new(conn).parents_of(id))
    }

    /// Every part that uses `id` directly or transitively, ordered by SKU
    #[instrument(skip(self))]
    pub fn where_used(&self, id: &PartId) -> BomResult<Vec<Part>> {
        self.db.read(|conn| {
            let registry = PartRegistry::new(conn, "");
            registry.get(id)?;
            let store = StructureStore::new(conn);
            let ancestors = CycleGuard::new(&store.ancestry()).ancestors_of(id)?;
            let mut parts = ancestors
                .iter()
                .map(|a| registry.get(a))
                .collect::<BomResult<Vec<_>>>()?;
            parts.sort_by(|a, b| a.sku.cmp(&b.sku));
            Ok(parts)
        })
    }

    /// Whether adding `parent → child` would be rejected as a cycle
    pub fn would_create_cycle(&self, parent: &PartId, child: &PartId) -> BomResult<bool> {
        self.db.read(|conn| {
            let store = StructureStore::new(conn);
            CycleGuard::new(&store.ancestry()).would_create_cycle(parent, child)
        })
    }

    // ----- roll-ups -----

    /// Materialized tree at current costs
    pub fn get_tree(&self, id: &PartId, include_inactive: bool) -> BomResult<BomTree> {
        self.tree(id, include_inactive, None)
    }

    /// Materialized tree at the costs in effect at `as_of`
    pub fn get_tree_as_of(
        &self,
        id: &PartId,
        include_inactive: bool,
        as_of: DateTime<Utc>,
    ) -> BomResult<BomTree> {
        self.tree(id, include_inactive, Some(as_of))
    }

    /// Unrounded roll-up, for callers that aggregate further
    pub fn rollup(
        &self,
        id: &PartId,
        include_inactive: bool,
        as_of: Option<DateTime<Utc>>,
    ) -> BomResult<Rollup> {
        self.db.read(|conn| {
            let source = StoreSource::new(conn);
            RollupEngine::new(&source).rollup(id, as_of, include_inactive)
        })
    }

    #[instrument(skip(self))]
    fn tree(
        &self,
        id: &PartId,
        include_inactive: bool,
        as_of: Option<DateTime<Utc>>,
    ) -> BomResult<BomTree> {
        self.rollup(id, include_inactive, as_of)?
            .to_tree(self.config.currency_decimals, self.config.max_tree_lines)
    }

    /// Rolled-up cost of `id`, rounded for display, without building a tree
    pub fn total_cost(
        &self,
        id: &PartId,
        include_inactive: bool,
        as_of: Option<DateTime<Utc>>,
    ) -> BomResult<Decimal> {
        let rollup = self.rollup(id, include_inactive, as_of)?;
        Ok(round_money(rollup.total_cost(), self.config.currency_decimals))
    }

    // ----- clone -----

    #[instrument(skip(self))]
    pub fn clone_subtree(&mut self, source: &PartId, target: &PartId) -> BomResult<CloneReport> {
        self.db
            .write("clone_subtree", |tx| CloneService::new(tx).clone_subtree(source, target))
    }
}
