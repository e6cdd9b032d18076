//! Shared helper functions for CLI commands
//!
//! Argument parsers used by clap, part/line resolution and engine setup.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use miette::Result;
use rust_decimal::Decimal;
use tracing::debug;

use crate::cli::GlobalOpts;
use crate::core::config::Config;
use crate::core::error::BomError;
use crate::core::identity::{LineId, PartId};
use crate::engine::BomEngine;
use crate::entities::part::Part;

/// Load configuration, apply `--db`, and open the engine
pub fn open_engine(global: &GlobalOpts) -> Result<BomEngine> {
    let mut config = Config::load()?;
    if let Some(db) = &global.db {
        config.database = db.clone();
    }
    debug!(database = %config.database.display(), "opening engine");
    Ok(BomEngine::open(config)?)
}

/// Resolve a part argument: a `PRT-…` id or a SKU
pub fn resolve_part(engine: &BomEngine, arg: &str) -> Result<Part> {
    let arg = arg.trim();
    if arg.to_uppercase().starts_with("PRT-") {
        let id = PartId::from_str(arg).map_err(BomError::from)?;
        return Ok(engine.get_part(&id)?);
    }
    match engine.find_part_by_sku(arg)? {
        Some(part) => Ok(part),
        None => Err(BomError::PartNotFound(arg.to_string()).into()),
    }
}

/// Parse a `LINE-…` id
pub fn parse_line_id(arg: &str) -> Result<LineId> {
    Ok(LineId::from_str(arg.trim()).map_err(BomError::from)?)
}

/// clap value parser for fixed-point decimals
pub fn parse_decimal(s: &str) -> Result<Decimal, String> {
    Decimal::from_str(s.trim()).map_err(|e| format!("invalid decimal '{}': {}", s, e))
}

/// clap value parser for points in time
///
/// Accepts RFC 3339 or a plain `YYYY-MM-DD`, which means the end of that day
/// in UTC so changes effective on the day are included.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, String> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_micro_opt(23, 59, 59, 999_999))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid date '{}': use YYYY-MM-DD or RFC 3339", s))
}

/// Truncate a string to max_len, adding "..." if truncated
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Optional value shown as text, `-` when absent
pub fn or_dash<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}
