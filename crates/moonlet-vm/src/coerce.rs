//! Number/string coercions.

use moonlet_core::number::{format_number, str_to_number};
use moonlet_core::string::{StringId, StringInterner};
use moonlet_core::value::TValue;

/// Numeric value of `v`: numbers as-is, strings when they parse as a
/// numeral.
pub fn to_number(v: TValue, strings: &StringInterner) -> Option<f64> {
    if let Some(n) = v.as_number() {
        Some(n)
    } else if let Some(sid) = v.as_string_id() {
        str_to_number(strings.get_bytes(sid))
    } else {
        None
    }
}

/// Like [`to_number`] but truncates toward zero, the way integer
/// arguments are read.
pub fn to_integer(v: TValue, strings: &StringInterner) -> Option<i64> {
    to_number(v, strings).filter(|n| !n.is_nan()).map(|n| n as i64)
}

/// String operand of a concatenation: strings as-is, numbers formatted.
pub fn to_string_for_concat(v: TValue, strings: &mut StringInterner) -> Option<StringId> {
    if let Some(sid) = v.as_string_id() {
        Some(sid)
    } else {
        v.as_number().map(|n| strings.intern(format_number(n).as_bytes()))
    }
}

/// Whether `v` can take part in a raw concatenation.
pub fn is_concatable(v: TValue) -> bool {
    v.is_string() || v.is_number()
}
