//! Duration parsing: `"5m"`, `"2h"`, `"500ms"`, or a raw millisecond integer.

use serde_json::Value;

use crate::error::EngineError;

/// Parses a duration expressed either as a non-negative integer
/// (milliseconds) or a string matching `^\d+(ms|s|m|h|d)$` (case
/// insensitive).
pub fn parse_duration_value(value: &Value) -> Result<i64, EngineError> {
    match value {
        Value::Number(n) => {
            let ms = n
                .as_i64()
                .filter(|v| *v >= 0)
                .ok_or_else(|| EngineError::InvalidDuration(value.to_string()))?;
            Ok(ms)
        }
        Value::String(s) => parse_duration_str(s),
        other => Err(EngineError::InvalidDuration(other.to_string())),
    }
}

/// Parses a duration string such as `"5m"`. See [`parse_duration_value`]
/// for the full contract.
pub fn parse_duration_str(s: &str) -> Result<i64, EngineError> {
    let trimmed = s.trim();
    let lower = trimmed.to_ascii_lowercase();

    let unit_len = if lower.ends_with("ms") {
        2
    } else if lower.ends_with('s') || lower.ends_with('m') || lower.ends_with('h') || lower.ends_with('d') {
        1
    } else {
        return Err(invalid(s));
    };

    if lower.len() <= unit_len {
        return Err(invalid(s));
    }

    let (digits, unit) = lower.split_at(lower.len() - unit_len);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(s));
    }

    let count: i64 = digits.parse().map_err(|_| invalid(s))?;
    let multiplier = match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return Err(invalid(s)),
    };

    Ok(count * multiplier)
}

fn invalid(s: &str) -> EngineError {
    EngineError::InvalidDuration(s.to_string())
}
