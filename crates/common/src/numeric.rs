//! Lenient numeric extraction for semi-structured amount and price fields.
//!
//! Raw payloads carry amounts as JSON numbers, numeric strings, and
//! occasionally arrays or objects. Anything that is not a finite scalar
//! number degrades to `None`; nothing here returns an error.

use rusqlite::types::ValueRef;

/// Parse a trimmed numeric string. Rejects empty input, `inf` and `NaN`.
pub fn parse_number(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    // f64::from_str accepts "inf"/"nan"; amounts never legitimately spell those.
    if t.bytes().any(|b| b.is_ascii_alphabetic() && b != b'e' && b != b'E') {
        return None;
    }
    t.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Same policy for a SQLite value, backing the `try_to_double` SQL function.
pub fn sql_number(value: ValueRef<'_>) -> Option<f64> {
    match value {
        // i64 -> f64 is the documented SQLite REAL affinity conversion.
        #[allow(clippy::cast_precision_loss)]
        ValueRef::Integer(i) => Some(i as f64),
        ValueRef::Real(r) => Some(r).filter(|v| v.is_finite()),
        ValueRef::Text(t) => std::str::from_utf8(t).ok().and_then(parse_number),
        ValueRef::Null | ValueRef::Blob(_) => None,
    }
}
