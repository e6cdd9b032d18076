//! Entity identity - prefixed ULID identifiers
//!
//! Every record the engine stores carries an opaque, stable id of the form
//! `PREFIX-<ULID>` (e.g. `PRT-01HV4K3Z5N8R2M6T7Q9W0XYABC`). Ids never change when a
//! part is renamed; the human-facing SKU is a separate field.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use ulid::Ulid;

/// Record type prefixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityPrefix {
    /// Part record
    Prt,
    /// BOM line (parent → child edge)
    Line,
    /// Cost history entry
    Cost,
    /// Lifecycle history entry
    Life,
}

impl EntityPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityPrefix::Prt => "PRT",
            EntityPrefix::Line => "LINE",
            EntityPrefix::Cost => "COST",
            EntityPrefix::Life => "LIFE",
        }
    }
}

impl fmt::Display for EntityPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityPrefix {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PRT" => Ok(EntityPrefix::Prt),
            "LINE" => Ok(EntityPrefix::Line),
            "COST" => Ok(EntityPrefix::Cost),
            "LIFE" => Ok(EntityPrefix::Life),
            _ => Err(IdParseError::UnknownPrefix(s.to_string())),
        }
    }
}

/// Errors produced while parsing an id string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdParseError {
    #[error("Missing '-' separator in id: {0}")]
    MissingSeparator(String),

    #[error("Unknown id prefix: {0}")]
    UnknownPrefix(String),

    #[error("Expected {expected} id, found {found}")]
    WrongPrefix {
        expected: EntityPrefix,
        found: EntityPrefix,
    },

    #[error("Invalid ULID in id: {0}")]
    InvalidUlid(String),
}

/// Split `PREFIX-ULID`, check the prefix and parse the ULID
fn parse_prefixed(s: &str, expected: EntityPrefix) -> Result<Ulid, IdParseError> {
    let (prefix, ulid) = s
        .split_once('-')
        .ok_or_else(|| IdParseError::MissingSeparator(s.to_string()))?;
    let found: EntityPrefix = prefix.parse()?;
    if found != expected {
        return Err(IdParseError::WrongPrefix { expected, found });
    }
    Ulid::from_string(ulid).map_err(|_| IdParseError::InvalidUlid(s.to_string()))
}

macro_rules! prefixed_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Ulid);

        impl $name {
            pub const PREFIX: EntityPrefix = $prefix;

            /// Generate a fresh id
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// The underlying ULID
            pub fn ulid(&self) -> Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", Self::PREFIX, self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_prefixed(s, Self::PREFIX).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.to_string()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: IdParseError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

prefixed_id!(
    /// Stable identifier of a part
    PartId,
    EntityPrefix::Prt
);

prefixed_id!(
    /// Stable identifier of a BOM line
    LineId,
    EntityPrefix::Line
);

prefixed_id!(
    /// Identifier of a cost history entry
    CostEntryId,
    EntityPrefix::Cost
);

prefixed_id!(
    /// Identifier of a lifecycle history entry
    LifecycleEntryId,
    EntityPrefix::Life
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_id_format() {
        let id = PartId::new();
        let s = id.to_string();
        assert!(s.starts_with("PRT-"));
        // 3 prefix + 1 dash + 26 ULID
        assert_eq!(s.len(), 30);
    }

    #[test]
    fn test_id_parse_roundtrip() {
        let id = LineId::new();
        let parsed: LineId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_id_parse_rejects_wrong_prefix() {
        let line = LineId::new().to_string();
        let err = line.parse::<PartId>().unwrap_err();
        assert_eq!(
            err,
            IdParseError::WrongPrefix {
                expected: EntityPrefix::Prt,
                found: EntityPrefix::Line,
            }
        );
    }

    #[test]
    fn test_id_parse_errors() {
        assert!(matches!(
            "PRT01ABC".parse::<PartId>(),
            Err(IdParseError::MissingSeparator(_))
        ));
        assert!(matches!(
            "REQ-01ABC".parse::<PartId>(),
            Err(IdParseError::UnknownPrefix(_))
        ));
        assert!(matches!(
            "PRT-not-a-ulid".parse::<PartId>(),
            Err(IdParseError::InvalidUlid(_))
        ));
    }

    #[test]
    fn test_prefix_is_case_insensitive() {
        let id = PartId::new();
        let lower = id.to_string().replacen("PRT", "prt", 1);
        assert_eq!(lower.parse::<PartId>().unwrap(), id);
    }
}
