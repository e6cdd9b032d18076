//! Tessera BOM: a bill-of-materials structural engine
//!
//! Parts and the parent → child lines between them are kept in SQLite as a flat
//! edge relation that is guaranteed acyclic. On top of that the engine offers
//! cost roll-ups over shared sub-assemblies, structural clones and an audited,
//! append-only history of cost and lifecycle changes.

pub mod cli;
pub mod core;
pub mod engine;
pub mod entities;

pub use crate::core::{BomError, BomResult, Config};
pub use crate::engine::BomEngine;
