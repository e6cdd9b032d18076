//! SQLite serialization for typed enums, decimals and timestamps
//!
//! Enums are stored by their display names, decimals as canonical strings (never
//! REAL, so no binary floating point touches money), timestamps as fixed-width
//! RFC 3339 UTC strings that sort lexicographically.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::Row;
use rust_decimal::Decimal;

use crate::entities::part::{LifecycleStatus, PartType};

// =========================================================================
// PartType - ToSql/FromSql
// =========================================================================

impl ToSql for PartType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for PartType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse().map_err(|e: String| {
            FromSqlError::Other(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e,
            )))
        })
    }
}

// =========================================================================
// LifecycleStatus - ToSql/FromSql
// =========================================================================

impl ToSql for LifecycleStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for LifecycleStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse().map_err(|e: String| {
            FromSqlError::Other(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e,
            )))
        })
    }
}

// =========================================================================
// Decimal and timestamp helpers
// =========================================================================

/// Canonical timestamp text
pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(row: &Row<'_>, col: &str, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    let idx = row.as_ref().column_index(col).unwrap_or(0);
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Read a NOT NULL decimal column
pub(crate) fn decimal_col(row: &Row<'_>, col: &str) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(col)?;
    Decimal::from_str(&raw).map_err(|e| conversion_error(row, col, e))
}

/// Read a nullable decimal column
pub(crate) fn opt_decimal_col(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(col)?;
    raw.map(|s| Decimal::from_str(&s).map_err(|e| conversion_error(row, col, e)))
        .transpose()
}

/// Bind a nullable decimal
pub(crate) fn opt_decimal_param(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.to_string())
}

/// Read a timestamp column
pub(crate) fn datetime_col(row: &Row<'_>, col: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(col)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(row, col, e))
}
