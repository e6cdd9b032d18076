//! Entity type definitions

pub mod history;
pub mod line;
pub mod part;
pub mod tree;

pub use history::{CostHistoryEntry, LifecycleChange};
pub use line::{BomLine, LinePatch, NewLine};
pub use part::{LifecycleStatus, NewPart, Part, PartPatch, PartType, QuantityBounds, Sku};
pub use tree::{BomTree, CloneReport, PartSummary, TreeLine};
