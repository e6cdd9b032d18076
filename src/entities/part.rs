//! Part entity type - purchased, manufactured and phantom parts

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::error::{BomError, BomResult};
use crate::core::identity::PartId;

/// Highest supported quantity precision (decimal places)
pub const MAX_DECIMAL_PRECISION: u32 = 6;

/// Longest accepted SKU
const MAX_SKU_LEN: usize = 64;

/// How a part is sourced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[derive(Default)]
pub enum PartType {
    #[default]
    Purchased,
    Manufactured,
    /// Logical grouping node, no cost of its own
    Phantom,
}

impl std::fmt::Display for PartType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartType::Purchased => write!(f, "PURCHASED"),
            PartType::Manufactured => write!(f, "MANUFACTURED"),
            PartType::Phantom => write!(f, "PHANTOM"),
        }
    }
}

impl std::str::FromStr for PartType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PURCHASED" => Ok(PartType::Purchased),
            "MANUFACTURED" => Ok(PartType::Manufactured),
            "PHANTOM" => Ok(PartType::Phantom),
            _ => Err(format!(
                "Invalid part type: {}. Use purchased, manufactured, or phantom",
                s
            )),
        }
    }
}

/// Lifecycle state, ordered from newest to retired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[derive(Default)]
pub enum LifecycleStatus {
    #[default]
    Active,
    PhaseOut,
    Obsolete,
    Discontinued,
}

impl LifecycleStatus {
    /// Position along ACTIVE → PHASE_OUT → OBSOLETE → DISCONTINUED
    pub fn rank(&self) -> u8 {
        match self {
            LifecycleStatus::Active => 0,
            LifecycleStatus::PhaseOut => 1,
            LifecycleStatus::Obsolete => 2,
            LifecycleStatus::Discontinued => 3,
        }
    }

    /// Forward moves (including skipping states) need no override
    pub fn is_forward_transition(&self, to: LifecycleStatus) -> bool {
        to.rank() > self.rank()
    }

    /// New BOM lines may not point at retired parts
    pub fn blocks_new_usage(&self) -> bool {
        matches!(
            self,
            LifecycleStatus::Obsolete | LifecycleStatus::Discontinued
        )
    }
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleStatus::Active => write!(f, "ACTIVE"),
            LifecycleStatus::PhaseOut => write!(f, "PHASE_OUT"),
            LifecycleStatus::Obsolete => write!(f, "OBSOLETE"),
            LifecycleStatus::Discontinued => write!(f, "DISCONTINUED"),
        }
    }
}

impl std::str::FromStr for LifecycleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "ACTIVE" => Ok(LifecycleStatus::Active),
            "PHASE_OUT" => Ok(LifecycleStatus::PhaseOut),
            "OBSOLETE" => Ok(LifecycleStatus::Obsolete),
            "DISCONTINUED" => Ok(LifecycleStatus::Discontinued),
            _ => Err(format!(
                "Invalid lifecycle status: {}. Use active, phase-out, obsolete, or discontinued",
                s
            )),
        }
    }
}

/// Human part key: uppercase letters, digits, `_` and `-`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sku(String);

fn sku_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z0-9_-]+$").expect("static SKU pattern"))
}

impl Sku {
    /// Validate and wrap a SKU
    pub fn parse(raw: &str) -> BomResult<Self> {
        let invalid = |reason: &str| BomError::InvalidSku {
            sku: raw.to_string(),
            reason: reason.to_string(),
        };
        if raw.is_empty() {
            return Err(invalid("SKU is empty"));
        }
        if raw.len() > MAX_SKU_LEN {
            return Err(invalid("SKU is longer than 64 characters"));
        }
        if !sku_pattern().is_match(raw) {
            return Err(invalid("only A-Z, 0-9, '_' and '-' are allowed"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Sku {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Sku {
    type Error = BomError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Sku::parse(&value)
    }
}

impl From<Sku> for String {
    fn from(sku: Sku) -> Self {
        sku.0
    }
}

/// Optional bounds a line's qtyPer must satisfy when this part is the child
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Decimal>,
}

impl QuantityBounds {
    pub fn validate(&self) -> BomResult<()> {
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(BomError::InvalidBounds { min, max });
            }
        }
        Ok(())
    }

    pub fn contains(&self, qty: Decimal) -> bool {
        self.min.map_or(true, |min| qty >= min) && self.max.map_or(true, |max| qty <= max)
    }
}

impl std::fmt::Display for QuantityBounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.min, self.max) {
            (Some(min), Some(max)) => write!(f, "{}..={}", min, max),
            (Some(min), None) => write!(f, ">= {}", min),
            (None, Some(max)) => write!(f, "<= {}", max),
            (None, None) => write!(f, "unbounded"),
        }
    }
}

/// A part record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    /// Stable identifier
    pub id: PartId,

    /// Human key, immutable once referenced by a BOM line
    pub sku: Sku,

    pub name: String,

    #[serde(rename = "type")]
    pub part_type: PartType,

    /// Usage unit of measure
    pub uom: String,

    /// Purchase unit of measure
    pub purchase_uom: String,

    /// usage quantity = purchased quantity × conversion_factor
    pub conversion_factor: Decimal,

    /// Standard cost per `uom`; `None` means not yet priced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_cost: Option<Decimal>,

    /// Cost the part was created with (history baseline)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_cost: Option<Decimal>,

    /// Rounding granularity for quantities of this part
    pub decimal_precision: u32,

    #[serde(default)]
    pub lifecycle_status: LifecycleStatus,

    #[serde(default)]
    pub bounds: QuantityBounds,

    pub created: DateTime<Utc>,

    pub updated: DateTime<Utc>,

    pub author: String,
}

impl Part {
    /// Round a quantity of this part to its precision
    pub fn round_quantity(&self, qty: Decimal) -> Decimal {
        qty.round_dp_with_strategy(
            self.decimal_precision,
            rust_decimal::RoundingStrategy::MidpointAwayFromZero,
        )
    }

    /// Check a candidate qtyPer against this part's bounds
    pub fn check_quantity(&self, qty: Decimal) -> BomResult<()> {
        if self.bounds.contains(qty) {
            Ok(())
        } else {
            Err(BomError::QuantityOutOfBounds {
                part: self.id,
                qty,
                bounds: self.bounds.to_string(),
            })
        }
    }

    /// Whether `uom` is a unit this part can be consumed in
    pub fn accepts_uom(&self, uom: &str) -> bool {
        uom == self.uom || uom == self.purchase_uom
    }
}

/// Input for creating a part
#[derive(Debug, Clone)]
pub struct NewPart {
    pub sku: String,
    pub name: String,
    pub part_type: PartType,
    pub uom: String,
    pub purchase_uom: Option<String>,
    pub conversion_factor: Decimal,
    pub std_cost: Option<Decimal>,
    pub decimal_precision: u32,
    pub bounds: QuantityBounds,
    pub author: String,
}

impl NewPart {
    /// A part with `EA` units, factor 1 and whole-unit precision
    pub fn new(sku: impl Into<String>, name: impl Into<String>, part_type: PartType) -> Self {
        Self {
            sku: sku.into(),
            name: name.into(),
            part_type,
            uom: "EA".to_string(),
            purchase_uom: None,
            conversion_factor: Decimal::ONE,
            std_cost: None,
            decimal_precision: 0,
            bounds: QuantityBounds::default(),
            author: String::new(),
        }
    }

    pub fn with_cost(mut self, cost: Decimal) -> Self {
        self.std_cost = Some(cost);
        self
    }

    pub fn with_uom(mut self, uom: impl Into<String>) -> Self {
        self.uom = uom.into();
        self
    }

    pub fn with_purchase_uom(mut self, uom: impl Into<String>, factor: Decimal) -> Self {
        self.purchase_uom = Some(uom.into());
        self.conversion_factor = factor;
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.decimal_precision = precision;
        self
    }

    pub fn with_bounds(mut self, min: Option<Decimal>, max: Option<Decimal>) -> Self {
        self.bounds = QuantityBounds { min, max };
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }
}

/// Field-level changes for `update`; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct PartPatch {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub part_type: Option<PartType>,
    pub uom: Option<String>,
    pub purchase_uom: Option<String>,
    pub conversion_factor: Option<Decimal>,
    pub std_cost: Option<Decimal>,
    pub decimal_precision: Option<u32>,
    /// `Some(None)` clears the bound
    pub min_quantity: Option<Option<Decimal>>,
    pub max_quantity: Option<Option<Decimal>>,
    pub lifecycle_status: Option<LifecycleStatus>,
}

impl PartPatch {
    pub fn is_empty(&self) -> bool {
        self.sku.is_none()
            && self.name.is_none()
            && self.part_type.is_none()
            && self.uom.is_none()
            && self.purchase_uom.is_none()
            && self.conversion_factor.is_none()
            && self.std_cost.is_none()
            && self.decimal_precision.is_none()
            && self.min_quantity.is_none()
            && self.max_quantity.is_none()
            && self.lifecycle_status.is_none()
    }
}

/// Shared numeric checks for create and update
pub(crate) fn validate_numeric(
    conversion_factor: Decimal,
    std_cost: Option<Decimal>,
    decimal_precision: u32,
    bounds: &QuantityBounds,
) -> BomResult<()> {
    if conversion_factor <= Decimal::ZERO {
        return Err(BomError::InvalidConversionFactor(conversion_factor));
    }
    if let Some(cost) = std_cost {
        if cost < Decimal::ZERO {
            return Err(BomError::NegativeCost(cost));
        }
    }
    if decimal_precision > MAX_DECIMAL_PRECISION {
        return Err(BomError::InvalidPrecision(decimal_precision));
    }
    bounds.validate()
}
