//! Primitive comparisons.

use moonlet_core::string::StringInterner;
use moonlet_core::value::TValue;

/// Equality without metamethods: numbers by value, everything else by
/// identity (strings are interned, so identity is content).
pub fn raw_equal(a: TValue, b: TValue) -> bool {
    a.raw_equals(&b)
}

/// `a < b` for two numbers or two strings; `None` otherwise.
pub fn less_than(a: TValue, b: TValue, strings: &StringInterner) -> Option<bool> {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return Some(x < y);
    }
    match (a.as_string_id(), b.as_string_id()) {
        (Some(x), Some(y)) => Some(strings.get_bytes(x) < strings.get_bytes(y)),
        _ => None,
    }
}

/// `a <= b` for two numbers or two strings; `None` otherwise.
pub fn less_equal(a: TValue, b: TValue, strings: &StringInterner) -> Option<bool> {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return Some(x <= y);
    }
    match (a.as_string_id(), b.as_string_id()) {
        (Some(x), Some(y)) => Some(strings.get_bytes(x) <= strings.get_bytes(y)),
        _ => None,
    }
}
