//! Cycle guard - keeps the parent → child graph acyclic
//!
//! An edge `parent → child` closes a cycle exactly when `child` is already an
//! ancestor of `parent` (or is `parent`). The guard answers that by walking
//! upward from `parent` through `parent_ids`, which only touches the ancestor
//! set of `parent` rather than the whole graph.
//!
//! Walks use three-colour marking. Meeting a node that is still on the current
//! path means the stored graph already contains a cycle; that is reported as
//! `CorruptStructure` instead of looping.

use std::collections::{BTreeSet, HashMap};

use tracing::error;

use crate::core::error::{BomError, BomResult};
use crate::core::identity::PartId;
use crate::core::logging::ALERT_TARGET;

/// Read port over the edge relation
pub trait Ancestry {
    /// Direct parents of `part`
    fn parent_ids(&self, part: &PartId) -> BomResult<Vec<PartId>>;

    /// Direct children of `part`
    fn child_ids(&self, part: &PartId) -> BomResult<Vec<PartId>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    InProgress,
    Done,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

/// Outcome of one walk
struct Walk {
    found: bool,
    visited: BTreeSet<PartId>,
}

/// Cycle checks and reachability over any `Ancestry`
pub struct CycleGuard<'a, A: Ancestry + ?Sized> {
    graph: &'a A,
}

impl<'a, A: Ancestry + ?Sized> CycleGuard<'a, A> {
    pub fn new(graph: &'a A) -> Self {
        Self { graph }
    }

    /// Whether adding `parent → child` would close a cycle
    pub fn would_create_cycle(&self, parent: &PartId, child: &PartId) -> BomResult<bool> {
        if parent == child {
            return Ok(true);
        }
        Ok(self.walk(parent, Direction::Up, Some(child))?.found)
    }

    /// Fail with `WouldCreateCycle` if the edge is not allowed
    pub fn check_edge(&self, parent: &PartId, child: &PartId) -> BomResult<()> {
        if self.would_create_cycle(parent, child)? {
            return Err(BomError::WouldCreateCycle {
                parent: *parent,
                child: *child,
            });
        }
        Ok(())
    }

    /// Every transitive parent of `part`
    pub fn ancestors_of(&self, part: &PartId) -> BomResult<BTreeSet<PartId>> {
        Ok(self.walk(part, Direction::Up, None)?.visited)
    }

    /// Every transitive child of `part`
    pub fn descendants_of(&self, part: &PartId) -> BomResult<BTreeSet<PartId>> {
        Ok(self.walk(part, Direction::Down, None)?.visited)
    }

    fn next(&self, part: &PartId, direction: Direction) -> BomResult<Vec<PartId>> {
        match direction {
            Direction::Up => self.graph.parent_ids(part),
            Direction::Down => self.graph.child_ids(part),
        }
    }

    fn walk(&self, start: &PartId, direction: Direction, target: Option<&PartId>) -> BomResult<Walk> {
        let mut color: HashMap<PartId, Color> = HashMap::new();
        let mut stack: Vec<(PartId, Vec<PartId>)> = Vec::new();

        color.insert(*start, Color::InProgress);
        stack.push((*start, self.next(start, direction)?));

        loop {
            let Some(frame) = stack.last_mut() else {
                break;
            };
            match frame.1.pop() {
                Some(next) => {
                    if target == Some(&next) {
                        return Ok(Walk {
                            found: true,
                            visited: BTreeSet::new(),
                        });
                    }
                    match color.get(&next) {
                        None => {
                            color.insert(next, Color::InProgress);
                            let pending = self.next(&next, direction)?;
                            stack.push((next, pending));
                        }
                        Some(Color::InProgress) => {
                            error!(
                                target: ALERT_TARGET,
                                part = %next,
                                from = %start,
                                "cycle found in stored BOM structure"
                            );
                            return Err(BomError::CorruptStructure(next));
                        }
                        Some(Color::Done) => {}
                    }
                }
                None => {
                    if let Some((node, _)) = stack.pop() {
                        color.insert(node, Color::Done);
                    }
                }
            }
        }

        let visited = color.into_keys().filter(|id| id != start).collect();
        Ok(Walk {
            found: false,
            visited,
        })
    }
}

/// Edge list held in memory; used for dry runs, historical views and tests
#[derive(Debug, Default, Clone)]
pub struct EdgeSet {
    edges: Vec<(PartId, PartId)>,
}

impl EdgeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `parent → child` without any check
    pub fn insert(&mut self, parent: PartId, child: PartId) {
        self.edges.push((parent, child));
    }

    /// Record `parent → child` if it keeps the set acyclic
    pub fn try_insert(&mut self, parent: PartId, child: PartId) -> BomResult<()> {
        CycleGuard::new(self).check_edge(&parent, &child)?;
        self.insert(parent, child);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

impl Ancestry for EdgeSet {
    fn parent_ids(&self, part: &PartId) -> BomResult<Vec<PartId>> {
        Ok(self
            .edges
            .iter()
            .filter(|(_, c)| c == part)
            .map(|(p, _)| *p)
            .collect())
    }

    fn child_ids(&self, part: &PartId) -> BomResult<Vec<PartId>> {
        Ok(self
            .edges
            .iter()
            .filter(|(p, _)| p == part)
            .map(|(_, c)| *c)
            .collect())
    }
}
