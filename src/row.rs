//! Row objects returned by readers and the scalar coercions used to chart them
//!
//! A row is a JSON object whose key order is the column order reported by the
//! backend (`serde_json` is built with `preserve_order`). Coercions are lenient:
//! they mirror how a browser would turn a cell into a number or a label and never
//! fail, so a non-numeric cell becomes `NaN` rather than an error.

use serde_json::Value;

/// A single result row: column name → scalar value, in backend column order
pub type Row = serde_json::Map<String, Value>;

/// Column names of a row, in order
pub fn column_names(row: &Row) -> Vec<String> {
    row.keys().cloned().collect()
}

/// The value at a column position, if the row has that many columns
pub fn value_at(row: &Row, position: usize) -> Option<&Value> {
    row.values().nth(position)
}

/// Coerce a cell to a number.
///
/// - missing cell → `NaN`
/// - `null` → `0`
/// - booleans → `1` / `0`
/// - strings → parsed after trimming, blank → `0`, unparseable → `NaN`
/// - arrays and objects → `NaN`
pub fn to_number(value: Option<&Value>) -> f64 {
    match value {
        None => f64::NAN,
        Some(Value::Null) => 0.0,
        Some(Value::Bool(b)) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => parse_number(s),
        Some(Value::Array(_)) | Some(Value::Object(_)) => f64::NAN,
    }
}

fn parse_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        // Rust accepts "inf"/"nan" spellings that a browser would not
        t if t.chars().any(|c| c.is_ascii_alphabetic() && !matches!(c, 'e' | 'E')) => f64::NAN,
        t => t.parse::<f64>().unwrap_or(f64::NAN),
    }
}

/// Coerce a cell to a label.
///
/// Whole numbers print without a fractional part (`10.0` → `"10"`), `null`
/// prints as `"null"` and a missing cell as `"undefined"`.
pub fn to_label(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                format_float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Some(other) => other.to_string(),
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}
