//! Engine error taxonomy
//!
//! Every failure is returned as a typed `BomError`; nothing is swallowed or
//! replaced by a default. `kind()` groups variants the way callers act on them:
//! validation and lifecycle errors are fixed by the caller, structural errors are
//! fatal to the request, and only contention is worth retrying.

use miette::Diagnostic;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::core::identity::{IdParseError, LineId, PartId};
use crate::entities::part::LifecycleStatus;

/// Result alias used throughout the engine
pub type BomResult<T> = std::result::Result<T, BomError>;

/// Broad classes of engine failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, rejected before any write
    Validation,
    /// Referenced record does not exist
    NotFound,
    /// Cycle or corrupted graph
    Structural,
    /// Lifecycle gate or transition refused
    Lifecycle,
    /// Lock not acquired in time; transient
    Contention,
    /// Roll-up refused because a price is missing
    Cost,
    /// Storage, configuration or I/O failure
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::NotFound => write!(f, "not-found"),
            ErrorKind::Structural => write!(f, "structural"),
            ErrorKind::Lifecycle => write!(f, "lifecycle"),
            ErrorKind::Contention => write!(f, "contention"),
            ErrorKind::Cost => write!(f, "cost"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// Errors returned by engine operations
#[derive(Debug, Error, Diagnostic)]
pub enum BomError {
    // ----- validation -----
    #[error("Invalid SKU '{sku}': {reason}")]
    #[diagnostic(
        code(tbom::invalid_sku),
        help("SKUs use uppercase letters, digits, '_' and '-' only")
    )]
    InvalidSku { sku: String, reason: String },

    #[error("SKU '{0}' is already used by another part")]
    #[diagnostic(code(tbom::duplicate_sku))]
    DuplicateSku(String),

    #[error("SKU of part {0} cannot change: the part is referenced by BOM lines")]
    #[diagnostic(code(tbom::sku_locked))]
    SkuLocked(PartId),

    #[error("Invalid quantity bounds: min {min} is greater than max {max}")]
    #[diagnostic(code(tbom::invalid_bounds))]
    InvalidBounds { min: Decimal, max: Decimal },

    #[error("Conversion factor must be greater than zero (got {0})")]
    #[diagnostic(code(tbom::invalid_conversion_factor))]
    InvalidConversionFactor(Decimal),

    #[error("Decimal precision must be between 0 and 6 (got {0})")]
    #[diagnostic(code(tbom::invalid_precision))]
    InvalidPrecision(u32),

    #[error("Standard cost cannot be negative (got {0})")]
    #[diagnostic(code(tbom::negative_cost))]
    NegativeCost(Decimal),

    #[error("A part cannot be its own child ({0})")]
    #[diagnostic(code(tbom::self_reference))]
    SelfReference(PartId),

    #[error("Quantity per must be greater than zero at the part's precision (got {0})")]
    #[diagnostic(code(tbom::invalid_quantity))]
    InvalidQuantity(Decimal),

    #[error("Scrap percentage must be in [0, 100) (got {0})")]
    #[diagnostic(code(tbom::invalid_scrap))]
    InvalidScrap(Decimal),

    #[error("Quantity {qty} is outside the bounds allowed for part {part} ({bounds})")]
    #[diagnostic(code(tbom::quantity_out_of_bounds))]
    QuantityOutOfBounds {
        part: PartId,
        qty: Decimal,
        bounds: String,
    },

    #[error("Unit '{uom}' is not valid for part {part} (expected '{usage}' or '{purchase}')")]
    #[diagnostic(code(tbom::unit_mismatch))]
    UnitMismatch {
        part: PartId,
        uom: String,
        usage: String,
        purchase: String,
    },

    #[error("Part {parent} already has an active line to {child}")]
    #[diagnostic(
        code(tbom::duplicate_line),
        help("update the existing line instead of adding a second one")
    )]
    DuplicateLine { parent: PartId, child: PartId },

    #[error("A non-empty reason is required")]
    #[diagnostic(code(tbom::empty_reason))]
    EmptyReason,

    #[error("Line {0} is already inactive")]
    #[diagnostic(code(tbom::line_inactive))]
    LineInactive(LineId),

    #[error("Invalid id: {0}")]
    #[diagnostic(code(tbom::invalid_id))]
    InvalidId(#[from] IdParseError),

    // ----- not found -----
    #[error("Part not found: {0}")]
    #[diagnostic(code(tbom::part_not_found))]
    PartNotFound(String),

    #[error("BOM line not found: {0}")]
    #[diagnostic(code(tbom::line_not_found))]
    LineNotFound(LineId),

    // ----- structural -----
    #[error("Adding {parent} → {child} would create a cycle")]
    #[diagnostic(
        code(tbom::would_create_cycle),
        help("{child} is already an ancestor of {parent}")
    )]
    WouldCreateCycle { parent: PartId, child: PartId },

    #[error("Clone source and target are the same part ({0})")]
    #[diagnostic(code(tbom::same_subtree))]
    SameSubtree(PartId),

    #[error("Corrupt BOM structure: cycle detected through {0}")]
    #[diagnostic(
        code(tbom::corrupt_structure),
        help("the stored structure violates the acyclic invariant; report this to an operator")
    )]
    CorruptStructure(PartId),

    #[error("Tree under {root} would expand to {lines} lines (limit {limit})")]
    #[diagnostic(
        code(tbom::tree_too_large),
        help("use --total for the roll-up alone, or raise max_tree_lines")
    )]
    TreeTooLarge { root: PartId, lines: u64, limit: u64 },

    // ----- lifecycle -----
    #[error("Part {part} is {status}; new BOM lines to it are not allowed")]
    #[diagnostic(code(tbom::obsolete_part))]
    ObsoletePart {
        part: PartId,
        status: LifecycleStatus,
    },

    #[error("Invalid lifecycle transition: {from} → {to}")]
    #[diagnostic(
        code(tbom::invalid_transition),
        help("reverse transitions require an explicit override reason")
    )]
    InvalidTransition {
        from: LifecycleStatus,
        to: LifecycleStatus,
    },

    // ----- contention -----
    #[error("Could not acquire the database lock in time; retry the operation")]
    #[diagnostic(code(tbom::contention))]
    Contention,

    // ----- cost -----
    #[error("Part {0} is purchased but has no standard cost")]
    #[diagnostic(
        code(tbom::missing_cost),
        help("set a standard cost before rolling up assemblies that use it")
    )]
    MissingCost(PartId),

    // ----- internal -----
    #[error("Database error: {0}")]
    #[diagnostic(code(tbom::database))]
    Database(rusqlite::Error),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(tbom::config))]
    Config(String),

    #[error("IO error: {0}")]
    #[diagnostic(code(tbom::io))]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for BomError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                BomError::Contention
            }
            _ => BomError::Database(err),
        }
    }
}

impl BomError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BomError::InvalidSku { .. }
            | BomError::DuplicateSku(_)
            | BomError::SkuLocked(_)
            | BomError::InvalidBounds { .. }
            | BomError::InvalidConversionFactor(_)
            | BomError::InvalidPrecision(_)
            | BomError::NegativeCost(_)
            | BomError::SelfReference(_)
            | BomError::InvalidQuantity(_)
            | BomError::InvalidScrap(_)
            | BomError::QuantityOutOfBounds { .. }
            | BomError::UnitMismatch { .. }
            | BomError::DuplicateLine { .. }
            | BomError::EmptyReason
            | BomError::LineInactive(_)
            | BomError::InvalidId(_) => ErrorKind::Validation,
            BomError::PartNotFound(_) | BomError::LineNotFound(_) => ErrorKind::NotFound,
            BomError::WouldCreateCycle { .. }
            | BomError::SameSubtree(_)
            | BomError::CorruptStructure(_)
            | BomError::TreeTooLarge { .. } => ErrorKind::Structural,
            BomError::ObsoletePart { .. } | BomError::InvalidTransition { .. } => {
                ErrorKind::Lifecycle
            }
            BomError::Contention => ErrorKind::Contention,
            BomError::MissingCost(_) => ErrorKind::Cost,
            BomError::Database(_) | BomError::Config(_) | BomError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Only contention is transient
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Contention
    }

    /// Shorthand for a missing part
    pub fn part_not_found(id: &PartId) -> Self {
        BomError::PartNotFound(id.to_string())
    }
}
