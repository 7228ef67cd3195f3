// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed variable values and comparison semantics.
//!
//! Variables flow into the engine opaquely (the expression layer that
//! produces them is out of scope) but the engine must know their type to
//! validate query operators and to evaluate sentry guards.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// A variable scope: name to typed value.
pub type Variables = HashMap<String, VariableValue>;

/// A typed variable value.
///
/// Serializes as a tagged JSON object (`{"type": "integer", "value": 42}`)
/// so values survive the persistence layer and the HTTP API without losing
/// their type. Bytes are carried as base64 strings in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum VariableValue {
    /// A UTF-8 string value.
    String(String),
    /// A 64-bit signed integer value.
    Integer(i64),
    /// A 64-bit floating point value.
    Double(f64),
    /// A boolean value.
    Boolean(bool),
    /// A point in time.
    Date(DateTime<Utc>),
    /// Raw bytes (base64-encoded in JSON).
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    /// An arbitrary JSON document (complex serialized object).
    Json(serde_json::Value),
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

impl VariableValue {
    /// Human-readable type name, used in validation error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Double(_) => "double",
            Self::Boolean(_) => "boolean",
            Self::Date(_) => "date",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }

    /// Whether ordering comparisons (`>`, `>=`, `<`, `<=`) are defined for
    /// this value. Booleans, byte arrays and complex serialized objects
    /// support equality only.
    pub fn supports_ordering(&self) -> bool {
        matches!(
            self,
            Self::String(_) | Self::Integer(_) | Self::Double(_) | Self::Date(_)
        )
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }
}

/// Comparison operators available to variable filters and sentry guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Comparison {
    /// `=`
    Equals,
    /// `<>`
    NotEquals,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// SQL-style `LIKE` with `%` wildcards; strings only.
    Like,
}

impl Comparison {
    /// The SQL operator symbol (`Like` maps to the `LIKE` keyword).
    pub fn sql_symbol(&self) -> &'static str {
        match self {
            Self::Equals => "=",
            Self::NotEquals => "<>",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Like => "LIKE",
        }
    }

    /// Whether this is an ordering comparison.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Self::GreaterThan | Self::GreaterThanOrEqual | Self::LessThan | Self::LessThanOrEqual
        )
    }
}

/// Validate that `op` is defined for `value`.
///
/// Ordering operators on booleans, bytes or complex serialized values and
/// `LIKE` on anything but strings are rejected with a validation error, as
/// is a `LIKE` pattern on a non-string filter value.
pub fn ensure_operator_supported(name: &str, value: &VariableValue, op: Comparison) -> Result<()> {
    if op.is_ordering() && !value.supports_ordering() {
        return Err(EngineError::validation(
            name,
            format!(
                "variables of type {} support equality comparison only",
                value.type_name()
            ),
        ));
    }
    if op == Comparison::Like && !matches!(value, VariableValue::String(_)) {
        return Err(EngineError::validation(
            name,
            format!(
                "'like' comparison requires a string value, got {}",
                value.type_name()
            ),
        ));
    }
    Ok(())
}

/// Evaluate `lhs op rhs`. Returns `None` when the values are incomparable
/// (different non-numeric types); guards treat that as "not satisfied".
pub fn compare(lhs: &VariableValue, op: Comparison, rhs: &VariableValue) -> Option<bool> {
    use VariableValue::*;

    if op == Comparison::Like {
        return match (lhs, rhs) {
            (String(value), String(pattern)) => Some(like_match(value, pattern)),
            _ => None,
        };
    }

    let ordering = match (lhs, rhs) {
        (String(a), String(b)) => a.partial_cmp(b),
        (Boolean(a), Boolean(b)) => {
            // Equality only; ordering operators were rejected upstream.
            return match op {
                Comparison::Equals => Some(a == b),
                Comparison::NotEquals => Some(a != b),
                _ => None,
            };
        }
        (Date(a), Date(b)) => a.partial_cmp(b),
        (Bytes(a), Bytes(b)) => {
            return match op {
                Comparison::Equals => Some(a == b),
                Comparison::NotEquals => Some(a != b),
                _ => None,
            };
        }
        (Json(a), Json(b)) => {
            return match op {
                Comparison::Equals => Some(a == b),
                Comparison::NotEquals => Some(a != b),
                _ => None,
            };
        }
        // Integers and doubles compare against each other numerically.
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    }?;

    Some(match op {
        Comparison::Equals => ordering.is_eq(),
        Comparison::NotEquals => !ordering.is_eq(),
        Comparison::GreaterThan => ordering.is_gt(),
        Comparison::GreaterThanOrEqual => ordering.is_ge(),
        Comparison::LessThan => ordering.is_lt(),
        Comparison::LessThanOrEqual => ordering.is_le(),
        Comparison::Like => unreachable!("handled above"),
    })
}

/// Match `value` against a `LIKE` pattern where `%` matches any run of
/// characters: starts-with (`string%`), ends-with (`%string`) or contains
/// (`%string%`). Patterns without a wildcard require exact equality.
pub fn like_match(value: &str, pattern: &str) -> bool {
    let segments: Vec<&str> = pattern.split('%').collect();
    if segments.len() == 1 {
        return value == pattern;
    }

    let mut rest = value;

    // First segment is anchored at the start unless the pattern opens with %.
    let first = segments[0];
    if !first.is_empty() {
        match rest.strip_prefix(first) {
            Some(r) => rest = r,
            None => return false,
        }
    }

    // Last segment is anchored at the end unless the pattern closes with %.
    let last = segments[segments.len() - 1];
    if !last.is_empty() {
        match rest.strip_suffix(last) {
            Some(r) => rest = r,
            None => return false,
        }
    }

    // Middle segments match greedily left to right.
    for segment in &segments[1..segments.len() - 1] {
        if segment.is_empty() {
            continue;
        }
        match rest.find(segment) {
            Some(idx) => rest = &rest[idx + segment.len()..],
            None => return false,
        }
    }

    true
}
